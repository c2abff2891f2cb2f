//! Utility modules for malscan-engine

pub mod retry;

pub use retry::retry_until_ready;
