//! Plugin registry
//!
//! Worker descriptors come from a TOML file of `[[plugin]]` tables, or from
//! the built-in set when no file is configured. The registry answers three
//! questions: which intel workers to run, which workers apply to a content
//! type, and which workers are enabled per category (for the seed
//! document).

use crate::models::{HashKind, PluginDescriptor};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read plugin registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plugin registry: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate plugin name: {0}")]
    Duplicate(String),
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "plugin")]
    plugins: Vec<PluginDescriptor>,
}

/// Read-only set of worker descriptors
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new(plugins: Vec<PluginDescriptor>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for plugin in &plugins {
            if !seen.insert(plugin.name.as_str()) {
                return Err(RegistryError::Duplicate(plugin.name.clone()));
            }
        }
        Ok(Self { plugins })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(content)?;
        Self::new(file.plugins)
    }

    /// Load a registry file
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            plugins = registry.plugins.len(),
            "Loaded plugin registry"
        );
        Ok(registry)
    }

    /// Registry file when configured, built-in set otherwise
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, RegistryError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                debug!("No plugin registry file configured, using built-in plugins");
                Ok(Self::builtin())
            }
        }
    }

    /// Compiled-in default worker set
    pub fn builtin() -> Self {
        let plugin = |name: &str, category: &str, mime: &[&str], intel: bool, enabled: bool| {
            PluginDescriptor {
                name: name.to_string(),
                image: format!("malice/{}", name),
                category: category.to_string(),
                description: String::new(),
                mime: mime.iter().map(|m| m.to_string()).collect(),
                intel,
                hash: if intel { HashKind::Sha1 } else { HashKind::Sha256 },
                enabled,
                env: BTreeMap::new(),
                args: Vec::new(),
            }
        };

        Self {
            plugins: vec![
                plugin("clamav", "av", &["*"], false, true),
                plugin("avast", "av", &["*"], false, false),
                plugin("yara", "av", &["*"], false, true),
                plugin("fileinfo", "metadata", &["*"], false, true),
                plugin("pdf", "document", &["application/pdf"], false, true),
                plugin("office", "document", &[
                    "application/msword",
                    "application/vnd.ms-excel",
                    "application/vnd.ms-powerpoint",
                    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                    "application/x-ole-storage",
                ], false, true),
                plugin("pescan", "exe", &[
                    "application/vnd.microsoft.portable-executable",
                    "application/x-dosexec",
                ], false, true),
                plugin("nsrl", "intel", &[], true, true),
                plugin("shadow-server", "intel", &[], true, true),
                plugin("virustotal", "intel", &[], true, false),
            ],
        }
    }

    pub fn all(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    /// Enabled intel workers
    pub fn intel_plugins(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .iter()
            .filter(|p| p.enabled && p.intel)
            .cloned()
            .collect()
    }

    /// Enabled, non-intel workers applicable to `mime`
    pub fn plugins_for_mime(&self, mime: &str) -> Vec<PluginDescriptor> {
        self.plugins
            .iter()
            .filter(|p| p.enabled && !p.intel && p.accepts_mime(mime))
            .cloned()
            .collect()
    }

    /// category → worker name → enabled, for every worker
    pub fn plugins_by_category(&self) -> BTreeMap<String, BTreeMap<String, bool>> {
        let mut categories: BTreeMap<String, BTreeMap<String, bool>> = BTreeMap::new();
        for plugin in &self.plugins {
            categories
                .entry(plugin.category.clone())
                .or_default()
                .insert(plugin.name.clone(), plugin.enabled);
        }
        categories
    }
}
