//! Database module for PostgreSQL persistence.

mod messages;
mod pool;

pub use messages::*;
pub use pool::*;
