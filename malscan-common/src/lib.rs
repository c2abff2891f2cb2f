//! # malscan Common Library
//!
//! Shared code for the malscan engine and its adapters:
//! - Common error type
//! - Config file loading and environment lookup
//! - Scan event types and EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
