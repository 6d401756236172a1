#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::yield_now;

use zone_storage::{
    Acl, MemoryStore, ObjectInfo, ObjectStore, PutSource, RepoConfig, StorageError,
    StorageResult, ZoneRepo,
};

pub const BUCKET: &str = "media";

/// MemoryStore wrapper counting every call, with optional injected failures.
/// Every call yields once, so the items of a batch interleave the way they
/// do against a remote store.
#[derive(Debug, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub infos: AtomicUsize,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub copies: AtomicUsize,
    pub deletes: AtomicUsize,
    pub lists: AtomicUsize,
    /// Copies whose destination key contains this string fail.
    pub fail_copy_to: Option<String>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_copies_to(fragment: &str) -> Self {
        Self {
            fail_copy_to: Some(fragment.to_string()),
            ..Self::default()
        }
    }

    pub fn mutations(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
            + self.copies.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.mutations()
            + self.infos.load(Ordering::SeqCst)
            + self.gets.load(Ordering::SeqCst)
            + self.lists.load(Ordering::SeqCst)
    }

    pub fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.object(BUCKET, key).map(|b| b.to_vec())
    }

    pub fn seed(&self, key: &str, data: &[u8]) {
        self.inner.insert(BUCKET, key, data.to_vec());
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn info(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectInfo>> {
        self.infos.fetch_add(1, Ordering::SeqCst);
        yield_now().await;
        self.inner.info(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<()> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        yield_now().await;
        self.inner.get(bucket, key, dest).await
    }

    async fn put(&self, bucket: &str, key: &str, source: PutSource, acl: Acl) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        yield_now().await;
        self.inner.put(bucket, key, source, acl).await
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        acl: Acl,
    ) -> StorageResult<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        yield_now().await;
        if let Some(fragment) = &self.fail_copy_to {
            if dst_key.contains(fragment.as_str()) {
                return Err(StorageError::Backend("injected copy failure".to_string()));
            }
        }
        self.inner
            .copy(src_bucket, src_key, dst_bucket, dst_key, acl)
            .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        yield_now().await;
        self.inner.delete(bucket, key).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        yield_now().await;
        self.inner.list(bucket, prefix).await
    }
}

pub fn config() -> RepoConfig {
    RepoConfig {
        name: "wiki".to_string(),
        bucket: BUCKET.to_string(),
        directory: "images".to_string(),
        deleted_dir: Some("images/deleted".to_string()),
        ..Default::default()
    }
}

pub fn repo_with(store: CountingStore, config: RepoConfig) -> (Arc<CountingStore>, ZoneRepo) {
    let store = Arc::new(store);
    let repo = ZoneRepo::new(store.clone(), config).unwrap();
    (store, repo)
}

pub fn repo() -> (Arc<CountingStore>, ZoneRepo) {
    repo_with(CountingStore::new(), config())
}
