use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use super::error::FetchError;
use super::request::{Request, Response};

/// Anything that can turn a request into a response over the wire.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send;
}

/// reqwest-backed network client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("cassa/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url().as_str();

    let response = self
      .client
      .get(request.url().clone())
      .send()
      .await
      .map_err(|e| FetchError::from_reqwest(url, &e))?;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::from_reqwest(url, &e))?;

    debug!("GET {} -> {} ({} bytes)", url, status, body.len());

    Ok(Response::new(final_url, status, headers, body.to_vec()))
  }
}
