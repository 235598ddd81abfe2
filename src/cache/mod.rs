//! The cache store: a named, persistent map from request key to stored
//! response.
//!
//! Named caches are created lazily on first open and never deleted by this
//! crate; the store outlives any interceptor that fills it. This module
//! provides:
//! - The `CacheStorage` trait over storage backends
//! - `SqliteStorage`, the persistent implementation
//! - `MemoryStorage`, for tests and hosts that don't want persistence

mod storage;

pub use storage::{CacheStorage, CachedResponse, MemoryStorage, SqliteStorage};
