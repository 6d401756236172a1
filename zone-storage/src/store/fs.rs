use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::{file_md5_hex, Acl, ObjectInfo, ObjectStore, PutSource};
use crate::error::{StorageError, StorageResult};

/// Object store laid out on a local filesystem: `<root>/<bucket>/<key>`.
///
/// Useful for development and for staging a repository before it is pushed to
/// a remote store. ACLs are accepted and ignored.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        check_segment(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let key_path = Path::new(key);
        if key.is_empty()
            || !key_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Backend(format!("invalid object key: {}", key)));
        }
        Ok(self.bucket_path(bucket)?.join(key_path))
    }
}

fn check_segment(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
        return Err(StorageError::Backend(format!("invalid bucket name: {}", bucket)));
    }
    Ok(())
}

async fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn info(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectInfo>> {
        let path = self.object_path(bucket, key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let last_modified = meta.modified().ok().map(DateTime::<Utc>::from);
        Ok(Some(ObjectInfo {
            size: meta.len(),
            etag: file_md5_hex(&path).await?,
            last_modified,
        }))
    }

    async fn get(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::copy(&path, dest).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, bucket: &str, key: &str, source: PutSource, _acl: Acl) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        ensure_parent(&path).await?;
        match source {
            PutSource::Bytes(data) => tokio::fs::write(&path, &data).await?,
            PutSource::File(src) => {
                tokio::fs::copy(&src, &path).await?;
            }
        }
        debug!("Stored object {}/{}", bucket, key);
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        _acl: Acl,
    ) -> StorageResult<()> {
        let src = self.object_path(src_bucket, src_key)?;
        let dst = self.object_path(dst_bucket, dst_key)?;
        if !tokio::fs::try_exists(&src).await? {
            return Err(StorageError::NotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            });
        }
        ensure_parent(&dst).await?;
        tokio::fs::copy(&src, &dst).await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let bucket_root = self.bucket_path(bucket)?;
        let mut keys = Vec::new();
        let mut pending = vec![bucket_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&bucket_root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        Ok(keys)
    }
}
