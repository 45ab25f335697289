//! Durable file writes.
//!
//! Every file the pipeline produces is written whole: content goes to a
//! hidden sibling temp file which is then renamed over the target, so a
//! reader never observes a partial write.

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SpecWeaverError};

/// Atomically replace `path` with `content`, creating parent directories.
/// Returns the SHA-256 of the written bytes.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<String> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| SpecWeaverError::io(parent, e))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| SpecWeaverError::validation(format!("not a file path: {}", path.display())))?
        .to_string_lossy();
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| SpecWeaverError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| SpecWeaverError::io(path, e))?;

    debug!(path = %path.display(), size = content.len(), "wrote file");
    Ok(sha256_hex(content))
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, data: &T) -> Result<String> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| SpecWeaverError::validation(format!("JSON serialization failed: {e}")))?;
    write_atomic(path, json.as_bytes())
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
