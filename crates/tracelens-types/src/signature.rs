use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;

/// Identity tuple for a source file.
///
/// Size and modification time alone cannot rule out an in-place edit under
/// coarse filesystem timestamp resolution, so the content hash is not
/// optional: two signatures compare equal only when the bytes were equal at
/// capture time. The cache contract (equal signature, identical result)
/// rests on that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    pub path: PathBuf,
    pub file_size: u64,
    /// Last-modified marker, RFC 3339
    pub mod_time: String,
    /// SHA-256 of the full file content, lowercase hex
    pub content_hash: String,
}

/// Capture the signature of a file as it currently exists on disk.
pub fn signature_of(path: &Path) -> Result<FileSignature> {
    let metadata = std::fs::metadata(path)?;
    let mod_time = metadata
        .modified()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_default();

    Ok(FileSignature {
        path: path.to_path_buf(),
        file_size: metadata.len(),
        mod_time,
        content_hash: hash_file(path)?,
    })
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_signature_captures_size_and_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, b"{\"type\":\"user\"}\n").unwrap();

        let sig = signature_of(&path).unwrap();
        assert_eq!(sig.path, path);
        assert_eq!(sig.file_size, 16);
        assert_eq!(sig.content_hash.len(), 64);
        assert!(!sig.mod_time.is_empty());
    }

    #[test]
    fn test_content_edit_changes_hash_even_at_same_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");

        std::fs::write(&path, b"aaaa").unwrap();
        let before = signature_of(&path).unwrap();

        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all(b"aaab").unwrap();
        drop(file);
        let after = signature_of(&path).unwrap();

        assert_eq!(before.file_size, after.file_size);
        assert_ne!(before.content_hash, after.content_hash);
        assert_ne!(before, after);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(signature_of(&dir.path().join("absent.jsonl")).is_err());
    }
}
