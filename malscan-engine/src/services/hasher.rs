//! Sample hashing
//!
//! One streaming pass over the file feeds md5, sha1, sha256 and sha512 at
//! once. Runs on the blocking pool.

use crate::models::SampleHashes;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Compute every digest of the file at `path`
pub async fn hash_file(path: &Path) -> io::Result<SampleHashes> {
    let path_buf = path.to_path_buf();
    tracing::debug!(path = %path_buf.display(), "Hashing sample");

    let hashes = tokio::task::spawn_blocking(move || hash_file_blocking(&path_buf))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Hash task failed: {}", e)))??;

    tracing::debug!(path = %path.display(), sha256 = %hashes.sha256, "Hashed sample");
    Ok(hashes)
}

fn hash_file_blocking(path: &Path) -> io::Result<SampleHashes> {
    let mut file = File::open(path)?;

    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut sha512 = Sha512::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        let chunk = &buffer[..bytes_read];
        md5.update(chunk);
        sha1.update(chunk);
        sha256.update(chunk);
        sha512.update(chunk);
    }

    Ok(SampleHashes {
        md5: format!("{:x}", md5.finalize()),
        sha1: format!("{:x}", sha1.finalize()),
        sha256: format!("{:x}", sha256.finalize()),
        sha512: format!("{:x}", sha512.finalize()),
    })
}
