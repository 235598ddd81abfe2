//! Offline-first caching interceptor.
//!
//! `precache` owns a single named cache store and reacts to two lifecycle
//! events from its host environment: an install event, which pre-populates
//! the store with a fixed manifest of assets, and a fetch event, which
//! resolves an intercepted request to a cached response when one exists and
//! to a live network fetch otherwise.
//!
//! Responses fetched on a cache miss are never written back. The store only
//! ever reflects the install-time manifest, so a cache entry is exactly what
//! the asset looked like when the interceptor was installed.
//!
//! The host adapter is responsible for wiring
//! [`Interceptor::on_install`](interceptor::Interceptor::on_install) and
//! [`Interceptor::on_intercept`](interceptor::Interceptor::on_intercept) to
//! whatever event dispatch the target platform provides, and for installing
//! a `tracing` subscriber if it wants the diagnostics.

pub mod cache;
pub mod config;
pub mod http;
pub mod interceptor;
pub mod manifest;

pub use cache::{CacheStorage, CachedResponse, MemoryStorage, SqliteStorage};
pub use config::Config;
pub use http::{Fetcher, HttpFetcher, Request, Response};
pub use interceptor::{Interceptor, Lifecycle};
pub use manifest::AssetManifest;
