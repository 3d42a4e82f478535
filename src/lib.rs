//! tinysquid - a concurrent caching forward proxy for HTTP/1.x GET requests.
//!
//! Clients send absolute-URI requests; the proxy answers from a bounded
//! in-memory object cache or dials the origin, forwards a rewritten
//! HTTP/1.0 request, and streams the response back while tee-buffering it
//! for possible admission to the cache.

pub mod cache;
pub mod error;
pub mod http;
pub mod proxy;

/// Number of cache slots.
pub const CACHE_SLOTS: usize = 10;
/// Largest response the cache will admit.
pub const MAX_OBJECT_SIZE: usize = 100 * 1024;
/// Upper bound on resident cache bytes.
pub const MAX_CACHE_BYTES: usize = CACHE_SLOTS * MAX_OBJECT_SIZE;
/// Longest admissible cache key.
pub const MAX_KEY_LEN: usize = 8192;
/// Largest inbound request (line + headers) accepted from a client.
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

pub use cache::{CacheHit, ProxyCache};
pub use error::ProxyError;
pub use http::{
    build_upstream_request, error_page, parse_request, parse_uri, ParsedRequest, RequestTarget,
};
pub use proxy::{handle_client, serve};
