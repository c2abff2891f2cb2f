//! Content-type detection
//!
//! [`TypeDetector`] is the seam the orchestrator calls during TYPE_DETECT;
//! [`MagicByteDetector`] sniffs the sample's leading bytes with `infer`.

use crate::models::Sample;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bytes read from the head of the sample
const SNIFF_LEN: usize = 8192;

pub const TEXT_PLAIN: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Detection task failed: {0}")]
    Task(String),
}

/// Determines a sample's content type
#[async_trait::async_trait]
pub trait TypeDetector: Send + Sync {
    /// Detector name for logging
    fn name(&self) -> &'static str;

    /// Detect the content type of `sample`
    async fn detect(&self, sample: &Sample) -> Result<String, DetectError>;
}

/// Magic-byte detector
///
/// Unknown binary content is `application/octet-stream`; unknown content
/// that decodes as UTF-8 is `text/plain`.
#[derive(Debug, Default, Clone)]
pub struct MagicByteDetector;

impl MagicByteDetector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl TypeDetector for MagicByteDetector {
    fn name(&self) -> &'static str {
        "magic-bytes"
    }

    async fn detect(&self, sample: &Sample) -> Result<String, DetectError> {
        let path: PathBuf = sample.path.clone();
        tokio::task::spawn_blocking(move || detect_path(&path))
            .await
            .map_err(|e| DetectError::Task(e.to_string()))?
    }
}

fn detect_path(path: &Path) -> Result<String, DetectError> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(classify(&head).to_string())
}

fn classify(head: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type();
    }
    if head.is_empty() {
        return OCTET_STREAM;
    }
    match std::str::from_utf8(head) {
        Ok(_) => TEXT_PLAIN,
        // The sniff window may split a multi-byte sequence at its end
        Err(e) if e.error_len().is_none() && head.len() == SNIFF_LEN => TEXT_PLAIN,
        Err(_) => OCTET_STREAM,
    }
}
