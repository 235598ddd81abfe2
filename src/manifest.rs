//! The asset manifest: the fixed, ordered list of URLs required for offline
//! operation.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Fixed ordered list of asset URLs, relative or absolute.
///
/// Known at configuration time and immutable for the process lifetime. This
/// list is the minimum set of resources the application needs to work
/// offline, and it is the entire externally visible configuration surface
/// besides the cache name and scope.
#[derive(Debug, Clone)]
pub struct AssetManifest {
  urls: Vec<String>,
}

impl AssetManifest {
  pub fn new(urls: Vec<String>) -> Self {
    Self { urls }
  }

  pub fn len(&self) -> usize {
    self.urls.len()
  }

  pub fn is_empty(&self) -> bool {
    self.urls.is_empty()
  }

  /// The entries as written, in manifest order.
  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.urls.iter().map(String::as_str)
  }

  /// Resolve every entry against the interceptor's own location.
  ///
  /// Relative entries (`./`, `./index.html`, `templates/app.tpl`) join
  /// against `scope` per RFC 3986; absolute URLs pass through untouched.
  /// Order and duplicates are preserved.
  pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>> {
    self
      .urls
      .iter()
      .map(|entry| {
        scope
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest entry {}: {}", entry, e))
      })
      .collect()
  }
}
