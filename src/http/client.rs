//! The `Fetcher` seam and the reqwest-backed live fetcher.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::types::{Request, Response};

/// The network seam between the interceptor and the outside world.
///
/// A transport failure (e.g. connection refused, or an interrupted body) is
/// `Err`; an HTTP error status is `Ok` carrying that status. The fetch still
/// yielded a response, and what to do with it is the caller's decision.
///
/// Boxed futures keep the trait object-safe so the interceptor can hold any
/// fetcher behind `dyn Fetcher`.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>>;
}

/// Live HTTP fetcher backed by reqwest.
///
/// No request timeout is configured: a hung fetch blocks the lifecycle event
/// that issued it indefinitely, a known limitation of this design.
#[derive(Clone, Default)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }

  async fn fetch_inner(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid request method {}: {}", request.method, e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name {}: {}", name, e))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| eyre!("Invalid value for header {}: {}", name, e))?;
      headers.insert(name, value);
    }

    let response = self
      .client
      .request(method, request.url.clone())
      .headers(headers)
      .send()
      .await
      .map_err(|e| eyre!("Network fetch for {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body for {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(self.fetch_inner(request))
  }
}
