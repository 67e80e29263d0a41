//! logsight Core Library
//!
//! This crate provides common types, utilities, and error handling
//! shared across all logsight components.

pub mod error;
pub mod intern;
pub mod types;

pub use error::{Error, Result};
pub use intern::{global_pool, IStr, InternPool, DEFAULT_POOL_CAPACITY};
pub use types::*;

/// Re-export commonly used items
pub mod prelude {
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::intern::{global_pool, IStr, InternPool};
    pub use crate::types::*;
}
