mod common;

use common::{config, repo, BUCKET};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use zone_storage::{
    DeleteItem, FreeTemp, FsObjectStore, IssueKind, MetricsCollector, OpFlags, Operation,
    PublishOutcome, RepoError, SharedMetrics, StoreItem, Zone, ZoneRepo,
};

fn staged(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

#[tokio::test]
async fn store_temp_then_free_temp() {
    let (store, repo) = repo();
    let dir = TempDir::new().unwrap();
    let path = staged(&dir, "upload.bin", b"hello");

    let status = repo.store_temp("Big cat.jpg", &path).await.unwrap();
    assert!(status.is_good());
    let url = status.value.unwrap();
    assert!(url.as_str().starts_with("zrepo://wiki/temp/"));

    let key = repo.resolver().resolve(url.as_str()).unwrap();
    assert!(key.starts_with("images/temp/"));
    assert!(key.ends_with("!Big cat.jpg"));
    assert_eq!(store.content(&key).unwrap(), b"hello");
    // the staging file is left alone
    assert!(path.exists());

    assert_eq!(repo.free_temp(url.as_str()).await.unwrap(), FreeTemp::Deleted);
    assert!(store.content(&key).is_none());
    assert_eq!(repo.free_temp(url.as_str()).await.unwrap(), FreeTemp::NotFound);
}

#[tokio::test]
async fn store_temp_keeps_same_name_uploads_apart() {
    let (_store, repo) = repo();
    let dir = TempDir::new().unwrap();
    let path = staged(&dir, "upload.bin", b"hello");

    let first = repo.store_temp("a.jpg", &path).await.unwrap();
    let url = first.value.unwrap();
    // a second upload within the same second collides and is refused
    let second = repo.store_temp("a.jpg", &path).await.unwrap();
    if second.success_count == 1 {
        assert_ne!(second.value.unwrap(), url);
    } else {
        assert!(second.has_issue(IssueKind::AlreadyExists));
        assert!(second.value.is_none());
    }
}

#[tokio::test]
async fn free_temp_refuses_other_zones() {
    let (store, repo) = repo();
    store.seed("images/a.jpg", b"1");
    let url = repo.resolver().virtual_url(Zone::Public, "a.jpg");

    let err = repo.free_temp(url.as_str()).await.unwrap_err();
    assert!(matches!(err, RepoError::UnsupportedOperation(_)));
    assert_eq!(store.content("images/a.jpg").unwrap(), b"1");

    let err = repo.free_temp("images/temp/a.jpg").await.unwrap_err();
    assert!(matches!(err, RepoError::MalformedLocator(_)));
}

#[tokio::test]
async fn append_concatenates_chunks() {
    let (store, repo) = repo();
    store.seed("images/temp/upload", b"abc");
    let dir = TempDir::new().unwrap();
    let chunk = staged(&dir, "chunk1", b"def");
    let src = repo.resolver().virtual_url(Zone::Temp, "upload");

    let status = repo.append(src.as_str(), &chunk, OpFlags::NONE).await.unwrap();
    assert!(status.is_good());
    assert_eq!(status.value.as_deref(), Some("images/temp/upload"));
    assert_eq!(store.content("images/temp/upload").unwrap(), b"abcdef");
    assert!(chunk.exists());

    let chunk = staged(&dir, "chunk2", b"ghi");
    let status = repo
        .append("images/temp/upload", &chunk, OpFlags::DELETE_SOURCE)
        .await
        .unwrap();
    assert_eq!(status.success_count, 1);
    assert_eq!(store.content("images/temp/upload").unwrap(), b"abcdefghi");
    assert!(!chunk.exists());
}

#[tokio::test]
async fn append_requires_both_sides() {
    let (store, repo) = repo();
    let dir = TempDir::new().unwrap();
    let chunk = staged(&dir, "chunk", b"def");

    let status = repo
        .append("images/temp/missing", &chunk, OpFlags::DELETE_SOURCE)
        .await
        .unwrap();
    assert!(!status.ok);
    assert!(status.has_issue(IssueKind::SourceNotFound));
    assert!(status.value.is_none());
    assert!(chunk.exists());

    store.seed("images/temp/upload", b"abc");
    let status = repo
        .append("images/temp/upload", &dir.path().join("nope"), OpFlags::NONE)
        .await
        .unwrap();
    assert!(!status.ok);
    assert_eq!(store.mutations(), 0);
}

#[tokio::test]
async fn append_refuses_keys_outside_the_zones() {
    let (store, repo) = repo();
    store.seed("images/temp/upload", b"abc");
    let dir = TempDir::new().unwrap();
    let chunk = staged(&dir, "chunk", b"def");

    for key in ["images/../x", "images/temp//upload", "elsewhere/upload"] {
        let status = repo.append(key, &chunk, OpFlags::DELETE_SOURCE).await.unwrap();
        assert!(!status.ok);
        assert!(status.has_issue(IssueKind::InvalidName));
        assert!(status.value.is_none());
    }
    assert_eq!(store.calls(), 0);
    assert!(chunk.exists());
    assert_eq!(store.content("images/temp/upload").unwrap(), b"abc");
}

#[tokio::test]
async fn local_sources_are_uploaded_and_removed() {
    let (store, repo) = repo();
    let dir = TempDir::new().unwrap();
    let kept = staged(&dir, "kept", b"1");
    let moved = staged(&dir, "moved", b"2");

    let status = repo
        .store(&kept.to_string_lossy(), Zone::Public, "kept.jpg", OpFlags::NONE)
        .await
        .unwrap();
    assert!(status.is_good());
    let status = repo
        .store(
            &moved.to_string_lossy(),
            Zone::Thumb,
            "moved.jpg/120px-moved.jpg",
            OpFlags::DELETE_SOURCE,
        )
        .await
        .unwrap();
    assert!(status.is_good());

    assert!(kept.exists());
    assert!(!moved.exists());
    assert_eq!(store.content("images/kept.jpg").unwrap(), b"1");
    assert_eq!(
        store.content("images/thumb/moved.jpg/120px-moved.jpg").unwrap(),
        b"2"
    );
}

#[tokio::test]
async fn filesystem_store_end_to_end() {
    let root = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let repo = ZoneRepo::new(Arc::new(FsObjectStore::new(root.path())), config()).unwrap();
    let on_disk = |key: &str| root.path().join(BUCKET).join(key);

    let first = staged(&staging, "v1", b"version one");
    let status = repo
        .store(
            &first.to_string_lossy(),
            Zone::Public,
            "a/ab/Cat.jpg",
            OpFlags::DELETE_SOURCE,
        )
        .await
        .unwrap();
    assert!(status.is_good());
    assert!(!first.exists());
    assert_eq!(std::fs::read(on_disk("images/a/ab/Cat.jpg")).unwrap(), b"version one");

    let second = staged(&staging, "v2", b"version two");
    let temp = repo.store_temp("Cat.jpg", &second).await.unwrap().value.unwrap();
    let status = repo
        .publish(
            temp.as_str(),
            "a/ab/Cat.jpg",
            "archive/a/ab/20240101000000!Cat.jpg",
            OpFlags::DELETE_SOURCE,
        )
        .await
        .unwrap();
    assert!(status.is_good());
    assert_eq!(status.value.unwrap()[&0], PublishOutcome::Archived);
    assert_eq!(std::fs::read(on_disk("images/a/ab/Cat.jpg")).unwrap(), b"version two");
    assert_eq!(
        std::fs::read(on_disk("images/archive/a/ab/20240101000000!Cat.jpg")).unwrap(),
        b"version one"
    );
    assert_eq!(repo.free_temp(temp.as_str()).await.unwrap(), FreeTemp::NotFound);

    let status = repo
        .delete_batch(vec![DeleteItem::new("a/ab/Cat.jpg", "a/b/abc123.jpg")])
        .await
        .unwrap();
    assert!(status.is_good());
    assert!(!on_disk("images/a/ab/Cat.jpg").exists());
    assert_eq!(
        std::fs::read(on_disk("images/deleted/a/b/abc123.jpg")).unwrap(),
        b"version two"
    );

    let mut keys = Vec::new();
    repo.enumerate(|key| keys.push(key.to_string())).await.unwrap();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "images/archive/a/ab/20240101000000!Cat.jpg",
            "images/deleted/a/b/abc123.jpg",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filesystem_store_batch_writes_a_destination_once() {
    let root = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let repo = ZoneRepo::new(Arc::new(FsObjectStore::new(root.path())), config()).unwrap();
    let on_disk = |key: &str| root.path().join(BUCKET).join(key);

    let sources: Vec<String> = (0..8)
        .map(|i| {
            let data = format!("upload {}", i);
            staged(&staging, &format!("u{}", i), data.as_bytes())
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    let items = sources
        .iter()
        .map(|src| StoreItem::new(src.as_str(), Zone::Public, "Cat.jpg"))
        .collect();

    let status = repo.store_batch(items, OpFlags::DELETE_SOURCE).await.unwrap();
    assert!(status.ok);
    assert_eq!((status.success_count, status.fail_count), (1, 7));
    assert!(status.has_issue(IssueKind::AlreadyExists));
    assert_eq!(std::fs::read(on_disk("images/Cat.jpg")).unwrap(), b"upload 0");
    // refused items keep their sources
    assert!(!std::path::Path::new(&sources[0]).exists());
    assert!(sources[1..].iter().all(|src| std::path::Path::new(src).exists()));
}

#[derive(Default)]
struct Counting {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    rejected: AtomicUsize,
    bytes: AtomicU64,
}

impl MetricsCollector for Counting {
    fn item_succeeded(&self, _op: Operation) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn item_failed(&self, _op: Operation) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn batch_rejected(&self, _op: Operation) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    fn bytes_uploaded(&self, amount: u64) {
        self.bytes.fetch_add(amount, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn metrics_follow_item_outcomes() {
    let (store, repo) = repo();
    let counting = Arc::new(Counting::default());
    let repo = repo.with_metrics(SharedMetrics::new(counting.clone()));
    let dir = TempDir::new().unwrap();
    let path = staged(&dir, "f", b"12345");
    store.seed("images/taken.jpg", b"x");

    let src = path.to_string_lossy().into_owned();
    repo.store(&src, Zone::Public, "new.jpg", OpFlags::NONE).await.unwrap();
    repo.store(&src, Zone::Public, "taken.jpg", OpFlags::NONE).await.unwrap();
    repo.store(&src, Zone::Public, "../x.jpg", OpFlags::NONE).await.unwrap();

    assert_eq!(counting.succeeded.load(Ordering::SeqCst), 1);
    assert_eq!(counting.failed.load(Ordering::SeqCst), 1);
    assert_eq!(counting.rejected.load(Ordering::SeqCst), 1);
    assert_eq!(counting.bytes.load(Ordering::SeqCst), 5);
}
