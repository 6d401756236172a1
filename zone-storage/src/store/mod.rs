//! Object store capability used by the repository engine.
//!
//! The engine only ever talks to a backend through [`ObjectStore`]; wire
//! protocol, authentication and consistency are the backend's business.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::error::StorageResult;

pub use fs::FsObjectStore;
pub use memory::MemoryStore;

/// Canned ACL attached to written objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    Private,
    PublicRead,
}

/// Head information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    /// Hex encoded MD5 of the content.
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Payload of a put request.
#[derive(Debug, Clone)]
pub enum PutSource {
    Bytes(Bytes),
    File(PathBuf),
}

/// ObjectStore is the interface the repository uses to reach the backing store.
///
/// All calls are treated as blocking remote calls: none of them is retried and
/// none of them is atomic with any other.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug + 'static {
    /// Returns the object head, or `None` when the key does not exist.
    async fn info(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectInfo>>;

    /// Downloads the object into the local file `dest`, replacing it.
    async fn get(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<()>;

    /// Writes an object, replacing any previous content under the key.
    async fn put(&self, bucket: &str, key: &str, source: PutSource, acl: Acl) -> StorageResult<()>;

    /// Server side copy. Fails when the source does not exist.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        acl: Acl,
    ) -> StorageResult<()>;

    /// Removes an object. Removing a missing key is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Lists every key starting with `prefix`, in no particular order.
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;

    /// Checks if an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        Ok(self.info(bucket, key).await?.is_some())
    }
}

/// Hex encoded MD5 of `data`, the ETag format of single-part uploads.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    faster_hex::hex_string(&hasher.finalize())
}

/// Hex encoded MD5 of a local file.
pub async fn file_md5_hex(path: &Path) -> StorageResult<String> {
    let data = tokio::fs::read(path).await?;
    Ok(md5_hex(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
