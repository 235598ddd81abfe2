//! Request and response value types.

use serde::{Deserialize, Serialize};
use url::Url;

/// An intercepted request descriptor.
///
/// Consumed transiently while resolving to a response; never stored itself.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A plain GET request, the form every manifest asset is fetched with.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
    }
  }

  /// The identity a request is matched by in the cache store.
  ///
  /// Matching follows the host's default rules: the exact URL with any
  /// fragment removed. The method is deliberately not part of the key: this
  /// system does not special-case non-GET requests.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }
}

/// A response as stored in, or served from, the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Whether the status is in the 2xx range.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup, first match wins.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
