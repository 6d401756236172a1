use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::trace;

use super::{md5_hex, Acl, ObjectInfo, ObjectStore, PutSource};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    acl: Acl,
    modified: DateTime<Utc>,
}

/// In-process object store keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object directly, bypassing the [`ObjectStore`] interface.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                acl: Acl::Private,
                modified: Utc::now(),
            },
        );
    }

    /// Returns the content stored under a key.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let objects = self.objects.read().unwrap();
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn acl(&self, bucket: &str, key: &str) -> Option<Acl> {
        let objects = self.objects.read().unwrap();
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.acl)
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_object(&self, bucket: &str, key: &str, data: Bytes, acl: Acl) {
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                acl,
                modified: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn info(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectInfo>> {
        let objects = self.objects.read().unwrap();
        Ok(objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| ObjectInfo {
                size: o.data.len() as u64,
                etag: md5_hex(&o.data),
                last_modified: Some(o.modified),
            }))
    }

    async fn get(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<()> {
        let data = self.object(bucket, key).ok_or_else(|| StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        tokio::fs::write(dest, &data).await?;
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, source: PutSource, acl: Acl) -> StorageResult<()> {
        let data = match source {
            PutSource::Bytes(data) => data,
            PutSource::File(path) => Bytes::from(tokio::fs::read(&path).await?),
        };
        trace!(bucket, key, len = data.len(), "memory put");
        self.write_object(bucket, key, data, acl);
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        acl: Acl,
    ) -> StorageResult<()> {
        let data = self
            .object(src_bucket, src_key)
            .ok_or_else(|| StorageError::NotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            })?;
        self.write_object(dst_bucket, dst_key, data, acl);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut objects = self.objects.write().unwrap();
        objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let objects = self.objects.read().unwrap();
        Ok(objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}
