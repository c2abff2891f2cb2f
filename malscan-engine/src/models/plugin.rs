//! Worker (plugin) descriptors

use super::HashKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static description of an analysis worker
///
/// Loaded from `[[plugin]]` tables of the registry file. Read-only once
/// loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique worker name; also the base of its execution-unit name
    pub name: String,
    pub image: String,
    /// Grouping used in the seed document (e.g. "av", "intel", "document")
    pub category: String,
    #[serde(default)]
    pub description: String,
    /// Content types this worker applies to
    ///
    /// Entries are exact types, `type/*` wildcards, or `*`. Ignored for intel
    /// workers.
    #[serde(default = "default_mime")]
    pub mime: Vec<String>,
    /// Intel workers operate on a hash alone, before type detection
    #[serde(default)]
    pub intel: bool,
    /// Digest handed to intel workers
    #[serde(default)]
    pub hash: HashKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Extra environment passed to the worker unit
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Arguments placed before the sample target
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_mime() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_enabled() -> bool {
    true
}

impl PluginDescriptor {
    /// Whether this worker applies to `mime`
    ///
    /// Parameters (`; charset=...`) and case are ignored.
    pub fn accepts_mime(&self, mime: &str) -> bool {
        let mime = essence(mime);
        self.mime.iter().any(|pattern| {
            let pattern = essence(pattern);
            if pattern == "*" || pattern == "*/*" {
                return true;
            }
            match pattern.strip_suffix("/*") {
                Some(top) => mime
                    .split_once('/')
                    .map(|(t, _)| t == top)
                    .unwrap_or(false),
                None => pattern == mime,
            }
        })
    }

    /// Execution-unit name for one scan
    pub fn unit_name(&self, scan_id: &str) -> String {
        format!("malice_{}_{}", self.name, scan_id)
    }
}

fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}
