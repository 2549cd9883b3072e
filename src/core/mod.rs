//! Shared foundations: error type and result alias.

pub mod error;

pub use error::{HandyError, Result};
