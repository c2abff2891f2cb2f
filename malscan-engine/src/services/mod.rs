//! Service modules for the scan engine
//!
//! - Input validation, hashing and content type detection
//! - Container runtime and results store adapters
//! - Plugin registry
//! - Scan orchestration

pub mod hasher;
pub mod orchestrator;
pub mod path_validator;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod type_detector;

pub use orchestrator::{DispatchHandle, ScanOrchestrator, WorkerDispatcher};
pub use registry::{PluginRegistry, RegistryError};
pub use runtime::{ContainerRuntime, DockerCli, RuntimeError};
pub use store::{ElasticsearchConnector, PoolError, ResultStore, StoreConnector, StorePool};
pub use type_detector::{MagicByteDetector, TypeDetector};
