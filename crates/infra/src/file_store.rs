//! Content-addressed file storage on the local filesystem.
//!
//! A file is stored under the hex SHA-256 of its bytes, fanned out as `ab/cd/<hash>`.
//! Storing the same bytes twice yields the same key and a single file.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: String,
    pub content_hash: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ContentAddressedStore {
    root: PathBuf,
}

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn key_for(hash: &str) -> String {
    format!("{}/{}/{}", &hash[0..2], &hash[2..4], hash)
}

impl ContentAddressedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are produced by [`put`](Self::put); anything else is rejected so a key can
    /// never escape the root directory.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let parts: Vec<&str> = key.split('/').collect();
        let valid = matches!(parts.as_slice(), [a, b, hash]
            if hash.len() == 64
                && hash.bytes().all(|c| c.is_ascii_hexdigit())
                && *a == &hash[0..2]
                && *b == &hash[2..4]);
        if !valid {
            return Err(StoreError::NotFound(format!("invalid storage key '{key}'")));
        }
        Ok(self.root.join(key))
    }

    /// Write `bytes` (temp file + rename, so readers never see partial files).
    pub fn put(&self, bytes: &[u8]) -> Result<StoredBlob, StoreError> {
        let hash = content_hash(bytes);
        let key = key_for(&hash);
        let path = self.path_for(&key)?;
        let blob = StoredBlob {
            key,
            content_hash: hash,
            size_bytes: bytes.len() as u64,
        };
        if path.exists() {
            return Ok(blob);
        }

        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Unavailable("storage path has no parent".to_string()))?;
        std::fs::create_dir_all(dir)?;
        let tmp = dir.join(format!(".{}.tmp", Uuid::now_v7()));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::debug!(key = %blob.key, size = blob.size_bytes, "stored file");
        Ok(blob)
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("kontor-files-{}", Uuid::now_v7()))
    }

    #[test]
    fn same_content_same_key_and_round_trip() {
        let root = temp_root();
        let store = ContentAddressedStore::new(&root);

        let a = store.put(b"%PDF-1.7 hello").unwrap();
        let b = store.put(b"%PDF-1.7 hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.size_bytes, 14);
        assert!(a.key.ends_with(&a.content_hash));
        assert_eq!(store.get(&a.key).unwrap(), b"%PDF-1.7 hello");

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn malformed_or_unknown_keys_are_not_found() {
        let store = ContentAddressedStore::new(temp_root());
        assert!(matches!(store.get("../../etc/passwd"), Err(StoreError::NotFound(_))));
        let missing = key_for(&content_hash(b"nothing stored"));
        assert!(matches!(store.get(&missing), Err(StoreError::NotFound(_))));
    }
}
