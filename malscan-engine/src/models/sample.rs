//! Sample identity

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Digests of a sample's content
///
/// sha256 is the strong identity; md5 and sha1 are kept for legacy lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

/// Digest selector (intel workers name the hash they look up)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

impl SampleHashes {
    pub fn get(&self, kind: HashKind) -> &str {
        match kind {
            HashKind::Md5 => &self.md5,
            HashKind::Sha1 => &self.sha1,
            HashKind::Sha256 => &self.sha256,
            HashKind::Sha512 => &self.sha512,
        }
    }
}

/// A validated, hashed file under analysis
///
/// Hashes are computed once during registration and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Absolute, normalized path
    pub path: PathBuf,
    pub size: u64,
    pub hashes: SampleHashes,
    /// Populated by content-type detection
    pub mime: Option<String>,
}

impl Sample {
    pub fn new(path: PathBuf, size: u64, hashes: SampleHashes) -> Self {
        Self {
            path,
            size,
            hashes,
            mime: None,
        }
    }

    pub fn sha256(&self) -> &str {
        &self.hashes.sha256
    }

    /// File name component, or the sha256 when the path has none
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.hashes.sha256.clone())
    }
}
