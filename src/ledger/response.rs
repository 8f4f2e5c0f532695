use serde::Serialize;
use serde_json::Value;

/// Result envelope returned by every ledger action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
}

impl ApiResponse {
  pub fn ok() -> Self {
    Self {
      success: true,
      data: None,
      error: None,
      id: None,
    }
  }

  pub fn with_data<T: Serialize>(data: &T) -> Self {
    match serde_json::to_value(data) {
      Ok(value) => Self {
        data: Some(value),
        ..Self::ok()
      },
      Err(e) => Self::failure(format!("Failed to serialize data: {}", e)),
    }
  }

  pub fn with_id(id: impl Into<String>) -> Self {
    Self {
      id: Some(id.into()),
      ..Self::ok()
    }
  }

  pub fn failure(error: impl Into<String>) -> Self {
    Self {
      success: false,
      data: None,
      error: Some(error.into()),
      id: None,
    }
  }

  pub fn to_json(&self) -> String {
    // Serializing plain strings, bools and Values cannot fail
    serde_json::to_string(self).unwrap_or_else(|_| r#"{"success":false}"#.to_string())
  }
}
