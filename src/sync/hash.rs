//! Content fingerprints for change detection.
//!
//! Fingerprints are lowercase hex MD5 digests, the same value S3 reports
//! as the ETag of an object uploaded in a single request.

use md5::{Digest, Md5};
use std::io::Read;
use std::path::Path;

/// Fingerprint a byte slice.
pub fn fingerprint(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Fingerprint a file without loading it into memory.
pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 65536]; // 64KB buffer

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprint a file on the blocking pool.
pub async fn fingerprint_file_async(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_file(&path))
        .await
        .map_err(std::io::Error::other)?
}

/// Strip the quotes S3 wraps around ETags.
pub fn normalize_etag(etag: &str) -> &str {
    let trimmed = etag.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
}

/// Compare a local fingerprint against the token a store reported.
///
/// Multipart ETags (`<hex>-<parts>`) never equal a plain digest, so
/// objects uploaded that way are always treated as changed.
pub fn matches(local: &str, remote: &str) -> bool {
    local.eq_ignore_ascii_case(normalize_etag(remote))
}
