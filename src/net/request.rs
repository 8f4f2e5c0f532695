use serde::{Deserialize, Serialize};
use url::{Origin, Url};

/// An outgoing GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  url: Url,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self { url }
  }

  pub fn parse(url: &str) -> Result<Self, url::ParseError> {
    Ok(Self::get(Url::parse(url)?))
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn origin(&self) -> Origin {
    self.url.origin()
  }

  /// Key under which this request is cached: the absolute URL without its
  /// fragment. `Url` already normalizes scheme/host case, default ports and
  /// dot segments.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }
}

/// A response received from the network or rebuilt from the cache.
///
/// The body is owned by whoever holds the response and is consumed by
/// [`Response::into_body`]. To keep a copy elsewhere, take a [`Snapshot`]
/// before handing the response on.
#[derive(Debug)]
pub struct Response {
  url: String,
  status: u16,
  headers: Vec<(String, String)>,
  body: Vec<u8>,
}

impl Response {
  pub fn new(
    url: impl Into<String>,
    status: u16,
    headers: Vec<(String, String)>,
    body: impl Into<Vec<u8>>,
  ) -> Self {
    Self {
      url: url.into(),
      status,
      headers,
      body: body.into(),
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn headers(&self) -> &[(String, String)] {
    &self.headers
  }

  /// Case-insensitive header lookup; returns the first match.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Duplicate status, headers and body into an independent snapshot.
  pub fn snapshot(&self) -> Snapshot {
    Snapshot {
      url: self.url.clone(),
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  pub fn into_body(self) -> Vec<u8> {
    self.body
  }

  pub fn text(self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Immutable capture of a response, as stored in a cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Snapshot {
  pub fn into_response(self) -> Response {
    Response {
      url: self.url,
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_strips_fragment() {
    let request = Request::parse("https://Example.org:443/app/./index.html#top").unwrap();
    assert_eq!(request.cache_key(), "https://example.org/app/index.html");
  }

  #[test]
  fn test_cache_key_keeps_query() {
    let request = Request::parse("https://example.org/app/data.json?month=3").unwrap();
    assert_eq!(
      request.cache_key(),
      "https://example.org/app/data.json?month=3"
    );
  }

  #[test]
  fn test_snapshot_is_independent_of_body_consumer() {
    let response = Response::new(
      "https://example.org/app/",
      200,
      vec![("Content-Type".to_string(), "text/html".to_string())],
      "<html></html>",
    );

    let snapshot = response.snapshot();
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.into_body(), b"<html></html>".to_vec());
    assert_eq!(snapshot.body, b"<html></html>".to_vec());
    assert_eq!(snapshot.into_response().text(), "<html></html>");
  }

  #[test]
  fn test_ok_range() {
    assert!(Response::new("u", 204, vec![], "").ok());
    assert!(!Response::new("u", 404, vec![], "").ok());
    assert!(!Response::new("u", 301, vec![], "").ok());
  }
}
