//! # Zone Storage
//!
//! A zoned, virtual-addressed file repository on top of an object store.
//!
//! Files live in named zones (`public`, `temp`, `thumb`, `deleted`), each
//! mapped to a key prefix in one bucket. Callers address files either by
//! `(zone, relative path)` or by an opaque virtual URL of the form
//! `zrepo://<repo>/<zone>/<path>`.
//!
//! ## Features
//!
//! - **Batch operations**: store, publish, delete and existence checks over
//!   many items, validated as a whole before anything is modified
//! - **Archive on overwrite**: publishing over an existing file moves it to
//!   an archive slot first, and refuses to clobber an occupied slot
//! - **Dedup aware deletion**: content already present in the deletion
//!   archive is not copied again
//! - **Partial failure accounting**: every batch returns a [`Status`] with
//!   per-item success and failure counts and structured issues
//! - **Pluggable backends**: anything implementing [`ObjectStore`]
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zone_storage::{MemoryStore, OpFlags, PublishItem, RepoConfig, ZoneRepo};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RepoConfig {
//!     name: "wiki".to_string(),
//!     deleted_dir: Some("images/deleted".to_string()),
//!     ..Default::default()
//! };
//! let repo = ZoneRepo::new(Arc::new(MemoryStore::new()), config)?;
//!
//! let temp = repo
//!     .store_temp("Cat.jpg", std::path::Path::new("/tmp/upload-1"))
//!     .await?;
//! if let Some(url) = temp.value {
//!     let status = repo
//!         .publish_batch(
//!             vec![PublishItem::new(url.as_str(), "a/ab/Cat.jpg", "archive/a/ab/20240101000000!Cat.jpg")],
//!             OpFlags::DELETE_SOURCE,
//!         )
//!         .await?;
//!     assert_eq!(status.fail_count, 0);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod repo;
pub mod status;
pub mod store;
pub mod validate;
pub mod zone;

pub use config::{FilenamePolicy, RepoConfig};
pub use error::{RepoError, RepoResult, StorageError, StorageResult};
pub use metrics::{MetricsCollector, NoOpMetrics, Operation, SharedMetrics};
pub use repo::{
    DeleteItem, FreeTemp, OpFlags, PublishItem, PublishOutcome, PublishOutcomes, StoreItem,
    ZoneRepo,
};
pub use status::{Issue, IssueKind, Severity, Status};
pub use store::{Acl, FsObjectStore, MemoryStore, ObjectInfo, ObjectStore, PutSource};
pub use validate::{InvalidName, Validator};
pub use zone::{ResolvedUrl, Resolver, VirtualUrl, Zone, VIRTUAL_URL_SCHEME};
