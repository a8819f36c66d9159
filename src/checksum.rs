//! SHA-512 fingerprints of stored artifacts.

use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha512};
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 64 * 1024;

/// Stream `path` through SHA-512 and return the lowercase hex digest.
///
/// # Errors
///
/// Returns an error if the file is missing or unreadable.
pub async fn checksum_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {} for checksum", path.display()))?;

    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("Failed to read {} for checksum", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
