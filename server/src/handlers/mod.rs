//! Request handlers for the sync endpoints.

mod pull;
mod push;

pub use pull::*;
pub use push::*;
