//! Authentication for relay endpoints.

mod middleware;

pub use middleware::*;
