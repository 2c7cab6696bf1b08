//! Shared configuration and error types for fxq crates.
//!
//! Architecture role:
//! - defines [`CompilerConfig`] passed from the client down to the planner
//! - provides the common [`FxqError`] / [`Result`] contracts
//!
//! Key modules:
//! - [`config`]
//! - [`error`]

pub mod config;
pub mod error;

pub use config::{CompilerConfig, SqlDialect};
pub use error::{FxqError, Result};
