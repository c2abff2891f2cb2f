//! In-memory fakes for integration tests
//!
//! [`FakeRuntime`], [`FakeConnector`]/[`FakeStore`] and [`FakeDetector`]
//! stand in for docker, Elasticsearch and content sniffing. [`Harness`]
//! wires them into a [`ScanOrchestrator`].

#![allow(dead_code)]

use async_trait::async_trait;
use malscan_common::events::EventBus;
use malscan_engine::config::{ScanConfig, ScanLimits, StoreConfig};
use malscan_engine::models::{HashKind, PluginDescriptor, Sample, ScanDocument, ScanId};
use malscan_engine::services::registry::PluginRegistry;
use malscan_engine::services::runtime::{
    ContainerRuntime, InfraUnit, PluginRun, RuntimeError, UnitDescriptor,
};
use malscan_engine::services::store::{ResultStore, StoreConnector, StoreError, StorePool};
use malscan_engine::services::type_detector::{DetectError, TypeDetector};
use malscan_engine::services::ScanOrchestrator;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Container runtime
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRuntime {
    unavailable: bool,
    fail_infra: bool,
    fail_copy: bool,
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    units: Mutex<Vec<UnitDescriptor>>,
    pub removed: Mutex<Vec<String>>,
    pub started: Mutex<Vec<String>>,
    pub copied: Mutex<Vec<String>>,
    pub runs: Mutex<Vec<PluginRun>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight count even when the run future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every runtime call fails as if the daemon were down
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn failing_infra(mut self) -> Self {
        self.fail_infra = true;
        self
    }

    pub fn failing_copy(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_delay(mut self, plugin: &str, delay: Duration) -> Self {
        self.delays.insert(plugin.to_string(), delay);
        self
    }

    /// `plugin` exits non-zero
    pub fn failing(mut self, plugin: &str) -> Self {
        self.failures.insert(plugin.to_string());
        self
    }

    pub fn with_units(self, units: Vec<UnitDescriptor>) -> Self {
        *self.units.lock().unwrap() = units;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn run_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .runs
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.plugin.clone())
            .collect();
        names.sort();
        names
    }

    fn check_available(&self) -> Result<(), RuntimeError> {
        if self.unavailable {
            Err(RuntimeError::Unavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

pub fn unit(id: &str, name: &str, state: &str) -> UnitDescriptor {
    UnitDescriptor {
        id: id.to_string(),
        names: vec![format!("/{}", name)],
        image: "malice/test".to_string(),
        state: state.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn info(&self) -> Result<String, RuntimeError> {
        self.check_available()?;
        Ok("fake-24.0".to_string())
    }

    async fn list_all(&self, include_stopped: bool) -> Result<Vec<UnitDescriptor>, RuntimeError> {
        self.check_available()?;
        Ok(self
            .units
            .lock()
            .unwrap()
            .iter()
            .filter(|u| include_stopped || u.is_running())
            .cloned()
            .collect())
    }

    async fn remove(&self, id: &str, _force: bool, _volumes: bool, _links: bool) -> Result<(), RuntimeError> {
        self.check_available()?;
        self.removed.lock().unwrap().push(id.to_string());
        self.units.lock().unwrap().retain(|u| u.id != id);
        Ok(())
    }

    async fn copy_to_volume(&self, _volume: &str, sample: &Sample) -> Result<(), RuntimeError> {
        self.check_available()?;
        if self.fail_copy {
            return Err(RuntimeError::CommandFailed {
                command: "docker cp".to_string(),
                code: Some(1),
                stderr: "no space left on device".to_string(),
            });
        }
        self.copied.lock().unwrap().push(sample.sha256().to_string());
        Ok(())
    }

    async fn start_infra(&self, unit: &InfraUnit) -> Result<(), RuntimeError> {
        self.check_available()?;
        if self.fail_infra {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker run {}", unit.name),
                code: Some(125),
                stderr: "port is already allocated".to_string(),
            });
        }
        self.started.lock().unwrap().push(unit.name.clone());
        self.units.lock().unwrap().push(UnitDescriptor {
            id: format!("id-{}", unit.name),
            names: vec![format!("/{}", unit.name)],
            image: unit.image.clone(),
            state: "running".to_string(),
        });
        Ok(())
    }

    async fn run_plugin(&self, run: &PluginRun) -> Result<(), RuntimeError> {
        self.runs.lock().unwrap().push(run.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let delay = self
            .delays
            .get(&run.plugin)
            .copied()
            .unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;

        if self.failures.contains(&run.plugin) {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker run {}", run.unit_name),
                code: Some(2),
                stderr: "plugin crashed".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeStore {
    pub documents: Mutex<Vec<ScanDocument>>,
    pub mime_updates: Mutex<Vec<(ScanId, String)>>,
}

#[async_trait]
impl ResultStore for FakeStore {
    async fn store_sample(&self, doc: &ScanDocument) -> Result<ScanId, StoreError> {
        let mut documents = self.documents.lock().unwrap();
        documents.push(doc.clone());
        Ok(ScanId(format!("scan-{}", documents.len())))
    }

    async fn update_mime(&self, scan_id: &ScanId, mime: &str) -> Result<(), StoreError> {
        self.mime_updates
            .lock()
            .unwrap()
            .push((scan_id.clone(), mime.to_string()));
        Ok(())
    }

    fn describe(&self) -> String {
        "fake store".to_string()
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub store: Arc<FakeStore>,
    pub connects: AtomicUsize,
    pub delay: Duration,
    pub fail: bool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for FakeConnector {
    async fn connect(&self, _config: &StoreConfig) -> Result<Arc<dyn ResultStore>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(StoreError::Status {
                status: 401,
                body: "security_exception".to_string(),
            });
        }
        let store: Arc<dyn ResultStore> = self.store.clone();
        Ok(store)
    }
}

// ---------------------------------------------------------------------------
// Content type detection
// ---------------------------------------------------------------------------

pub struct FakeDetector {
    mime: String,
    delay: Duration,
    fail: bool,
}

impl FakeDetector {
    pub fn new(mime: &str) -> Self {
        Self {
            mime: mime.to_string(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn slow(mime: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(mime)
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }
}

#[async_trait]
impl TypeDetector for FakeDetector {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn detect(&self, _sample: &Sample) -> Result<String, DetectError> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(DetectError::Task("sniffer crashed".to_string()));
        }
        Ok(self.mime.clone())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn plugin(name: &str, mime: &[&str]) -> PluginDescriptor {
    PluginDescriptor {
        name: name.to_string(),
        image: format!("malice/{}", name),
        category: "av".to_string(),
        description: String::new(),
        mime: mime.iter().map(|m| m.to_string()).collect(),
        intel: false,
        hash: HashKind::Sha256,
        enabled: true,
        env: BTreeMap::new(),
        args: Vec::new(),
    }
}

pub fn intel_plugin(name: &str) -> PluginDescriptor {
    PluginDescriptor {
        category: "intel".to_string(),
        intel: true,
        hash: HashKind::Sha1,
        ..plugin(name, &["*"])
    }
}

/// Registry of `count` catch-all workers named `av00`, `av01`, ...
pub fn av_plugins(count: usize) -> Vec<PluginDescriptor> {
    (0..count)
        .map(|i| plugin(&format!("av{:02}", i), &["*"]))
        .collect()
}

/// Write a sample of `size` bytes into a fresh temp dir
pub fn sample_file(size: usize) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.bin");
    let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub connector: Arc<FakeConnector>,
    pub pool: Arc<StorePool>,
    pub events: EventBus,
    pub orchestrator: Arc<ScanOrchestrator>,
}

impl Harness {
    pub fn new(runtime: FakeRuntime, plugins: Vec<PluginDescriptor>) -> Self {
        Self::build(
            runtime,
            FakeConnector::new(),
            FakeDetector::new("application/pdf"),
            plugins,
            ScanLimits::default(),
        )
    }

    pub fn build(
        runtime: FakeRuntime,
        connector: FakeConnector,
        detector: FakeDetector,
        plugins: Vec<PluginDescriptor>,
        limits: ScanLimits,
    ) -> Self {
        let config = ScanConfig {
            limits,
            ..ScanConfig::default()
        };
        let runtime = Arc::new(runtime);
        let connector = Arc::new(connector);
        let pool = Arc::new(StorePool::new(connector.clone()));
        let events = EventBus::new(1000);
        let registry = PluginRegistry::new(plugins).unwrap();

        let orchestrator = Arc::new(ScanOrchestrator::new(
            config,
            runtime.clone(),
            pool.clone(),
            Arc::new(detector),
            Arc::new(registry),
            events.clone(),
        ));

        Self {
            runtime,
            connector,
            pool,
            events,
            orchestrator,
        }
    }

    pub fn store(&self) -> &FakeStore {
        &self.connector.store
    }
}
