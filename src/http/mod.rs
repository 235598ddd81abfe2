//! HTTP request/response model and the network fetch seam.
//!
//! This module provides:
//! - Plain value types for requests and responses, independent of any
//!   particular HTTP client
//! - The `Fetcher` trait, the seam between the interceptor and the live
//!   network
//! - `HttpFetcher`, the reqwest-backed implementation

mod client;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{Request, Response};
