//! HTTP middleware
//!
//! The chain, outermost first: request tracing and compression, the HTTPS
//! redirect, the request-size limit (GET/HEAD/OPTIONS pass through),
//! security headers and CORS (preflights end here), audit logging, rate
//! limiting, then the admission extractors in `auth::extract` at the route
//! level.

pub mod audit;
pub mod limits;
pub mod rate_limit;
pub mod security;
