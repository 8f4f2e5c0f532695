use thiserror::Error;

/// Transport-level failure while fetching a resource.
///
/// HTTP error statuses are not represented here: a 404 or 500 is still a
/// response. Only failures that leave the caller without any response are.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Failed to connect to {url}: {reason}")]
  Connect { url: String, reason: String },

  #[error("Request to {url} timed out")]
  Timeout { url: String },

  #[error("Failed to read response body from {url}: {reason}")]
  Body { url: String, reason: String },

  #[error("Request to {url} was aborted")]
  Aborted { url: String },

  #[error("Network error for {url}: {reason}")]
  Other { url: String, reason: String },
}

impl FetchError {
  pub fn url(&self) -> &str {
    match self {
      Self::Connect { url, .. }
      | Self::Timeout { url }
      | Self::Body { url, .. }
      | Self::Aborted { url }
      | Self::Other { url, .. } => url,
    }
  }

  pub(crate) fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
    let url = url.to_string();
    if err.is_timeout() {
      Self::Timeout { url }
    } else if err.is_connect() {
      Self::Connect {
        url,
        reason: err.to_string(),
      }
    } else if err.is_body() || err.is_decode() {
      Self::Body {
        url,
        reason: err.to_string(),
      }
    } else {
      Self::Other {
        url,
        reason: err.to_string(),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_accessor() {
    let err = FetchError::Timeout {
      url: "https://example.org/app/".to_string(),
    };
    assert_eq!(err.url(), "https://example.org/app/");
    assert_eq!(err.to_string(), "Request to https://example.org/app/ timed out");
  }
}
