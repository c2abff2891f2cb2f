//! Common error types for malscan

use thiserror::Error;

/// Common result type for malscan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the engine and its adapters
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
