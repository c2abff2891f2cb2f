//! HTTP API handlers for malscan-engine
//!
//! - `GET /health`: liveness and uptime
//! - `GET /info`: runtime, store pool and plugin summary
//! - `POST /scan`: scan a file on the engine host

pub mod health;
pub mod scan;

pub use health::health_routes;
pub use scan::scan_routes;
