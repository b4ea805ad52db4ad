//! Shared utilities: error types and logging.

pub mod error;
pub mod logging;

pub use error::{Result, ShlightError};
pub use logging::{init_logging, LogConfig};
