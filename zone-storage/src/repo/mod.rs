//! Batch operation engine.
//!
//! Every batch runs in two phases. The first phase resolves locators,
//! validates names and probes sources; anything wrong there is recorded with
//! [`Status::fatal`] and the batch returns before a single mutating call.
//! Configuration problems (unknown zone, foreign locator, missing archive zone)
//! do not even produce a status, they come back as a [`RepoError`].
//! The second phase executes items on a bounded pool; a failing item is
//! counted and recorded but never stops its siblings.
//!
//! There is no locking. Conflicts are checked immediately before acting, so
//! another writer can still interleave between a check and the mutation that
//! follows it. Callers serialize through their catalog when that matters.

mod append;
mod delete;
mod publish;
mod query;
mod store;

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::ops::BitOr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::RepoConfig;
use crate::error::{RepoResult, StorageError};
use crate::metrics::{Operation, SharedMetrics};
use crate::status::{Issue, IssueKind, Status};
use crate::store::{file_md5_hex, ObjectStore, PutSource};
use crate::validate::Validator;
use crate::zone::{Resolver, VirtualUrl};

pub use delete::DeleteItem;
pub use publish::{PublishItem, PublishOutcome, PublishOutcomes};
pub use store::{FreeTemp, StoreItem};

/// Behaviour switches of the mutating operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpFlags {
    /// Remove the source once it has been placed.
    pub delete_source: bool,
    /// Replace an existing destination instead of failing the item.
    pub overwrite: bool,
    /// Accept an existing destination whose content equals the source.
    pub overwrite_same: bool,
}

impl OpFlags {
    pub const NONE: OpFlags = OpFlags {
        delete_source: false,
        overwrite: false,
        overwrite_same: false,
    };
    pub const DELETE_SOURCE: OpFlags = OpFlags {
        delete_source: true,
        ..OpFlags::NONE
    };
    pub const OVERWRITE: OpFlags = OpFlags {
        overwrite: true,
        ..OpFlags::NONE
    };
    pub const OVERWRITE_SAME: OpFlags = OpFlags {
        overwrite_same: true,
        ..OpFlags::NONE
    };
}

impl BitOr for OpFlags {
    type Output = OpFlags;

    fn bitor(self, rhs: OpFlags) -> OpFlags {
        OpFlags {
            delete_source: self.delete_source || rhs.delete_source,
            overwrite: self.overwrite || rhs.overwrite,
            overwrite_same: self.overwrite_same || rhs.overwrite_same,
        }
    }
}

/// Where a source turned out to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Source {
    Remote(String),
    Local(PathBuf),
}

impl Source {
    fn describe(&self) -> String {
        match self {
            Source::Remote(key) => key.clone(),
            Source::Local(path) => path.display().to_string(),
        }
    }
}

/// A source string after the pure, I/O free part of phase one.
#[derive(Debug, Clone)]
pub(crate) enum SourceRef {
    /// Came from a virtual URL, so it can only be a key.
    Key(String),
    /// Either a key or a local staging path; decided by probing.
    Ambiguous(String),
}

/// Outcome of one executed item.
pub(crate) struct ItemReport<T> {
    result: Result<T, Issue>,
    warnings: Vec<Issue>,
}

impl<T> ItemReport<T> {
    fn success(value: T) -> Self {
        Self {
            result: Ok(value),
            warnings: Vec::new(),
        }
    }

    fn failure(issue: Issue) -> Self {
        Self {
            result: Err(issue),
            warnings: Vec::new(),
        }
    }

    fn with_warnings(mut self, warnings: Vec<Issue>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// Keys written by earlier items of one batch. Items run concurrently, so a
/// key may only be written by one of them.
#[derive(Debug, Default)]
pub(crate) struct ClaimedKeys(HashSet<String>);

impl ClaimedKeys {
    /// Claims all `keys` of one item. When an earlier item holds one of them,
    /// nothing is claimed and that key is returned.
    fn claim<'a>(&mut self, keys: &[&'a str]) -> Option<&'a str> {
        if let Some(taken) = keys.iter().find(|k| self.0.contains(**k)).copied() {
            return Some(taken);
        }
        self.0.extend(keys.iter().map(|k| k.to_string()));
        None
    }
}

fn io_issue(paths: &[&str], err: impl std::fmt::Display) -> Issue {
    Issue::new(IssueKind::StorageIo, paths.iter().copied()).detail(err)
}

/// Zoned file repository on top of an [`ObjectStore`].
///
/// The store is injected; the repository never reaches for a process wide
/// client.
#[derive(Debug, Clone)]
pub struct ZoneRepo {
    store: Arc<dyn ObjectStore>,
    config: RepoConfig,
    resolver: Resolver,
    validator: Validator,
    metrics: SharedMetrics,
}

impl ZoneRepo {
    pub fn new(store: Arc<dyn ObjectStore>, config: RepoConfig) -> RepoResult<Self> {
        config.check()?;
        Ok(Self {
            resolver: Resolver::new(&config),
            validator: Validator::new(config.filename_policy.clone()),
            store,
            config,
            metrics: SharedMetrics::default(),
        })
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Maps a locator to a key: virtual URLs are resolved, anything else is
    /// taken as a key already.
    pub fn locator_key(&self, locator: &str) -> RepoResult<String> {
        if VirtualUrl::is_virtual(locator) {
            self.resolver.resolve(locator)
        } else {
            Ok(locator.to_string())
        }
    }

    /// Pure part of source handling; foreign or malformed locators are fatal.
    pub(crate) fn source_ref(&self, src: &str) -> RepoResult<SourceRef> {
        if VirtualUrl::is_virtual(src) {
            Ok(SourceRef::Key(self.resolver.resolve(src)?))
        } else {
            Ok(SourceRef::Ambiguous(src.to_string()))
        }
    }

    /// Decides at runtime whether a source is already in the store or is a
    /// local staging file, so both kinds share one code path.
    pub(crate) async fn probe_source(&self, src: &SourceRef) -> Result<Source, Issue> {
        match src {
            SourceRef::Key(key) => match self.store.info(self.bucket(), key).await {
                Ok(Some(_)) => Ok(Source::Remote(key.clone())),
                Ok(None) => Err(Issue::new(IssueKind::SourceNotFound, [key.as_str()])),
                Err(e) => Err(io_issue(&[key.as_str()], e)),
            },
            SourceRef::Ambiguous(path) => {
                let remote_err = match self.store.info(self.bucket(), path).await {
                    Ok(Some(_)) => return Ok(Source::Remote(path.clone())),
                    Ok(None) => None,
                    Err(e) => Some(e),
                };
                match tokio::fs::metadata(path).await {
                    Ok(meta) if meta.is_file() => Ok(Source::Local(PathBuf::from(path))),
                    _ => {
                        let issue = Issue::new(IssueKind::SourceNotFound, [path.as_str()]);
                        Err(match remote_err {
                            Some(e) => issue.detail(e),
                            None => issue,
                        })
                    }
                }
            }
        }
    }

    /// Content digest comparable with an object ETag.
    async fn source_digest(&self, source: &Source) -> Result<String, StorageError> {
        match source {
            Source::Remote(key) => self
                .store
                .info(self.bucket(), key)
                .await?
                .map(|info| info.etag)
                .ok_or_else(|| StorageError::NotFound {
                    bucket: self.bucket().to_string(),
                    key: key.clone(),
                }),
            Source::Local(path) => file_md5_hex(path).await,
        }
    }

    /// Emulated rename: copy, then delete the original. Not atomic.
    async fn move_object(&self, src_key: &str, dst_key: &str) -> Result<(), Issue> {
        let bucket = self.bucket();
        debug!("Moving {} to {}", src_key, dst_key);
        self.store
            .copy(bucket, src_key, bucket, dst_key, self.config.acl())
            .await
            .map_err(|e| io_issue(&[src_key, dst_key], e))?;
        self.store
            .delete(bucket, src_key)
            .await
            .map_err(|e| io_issue(&[src_key, dst_key], e))?;
        Ok(())
    }

    /// Puts `source` at `dst_key`, copying remote sources and uploading local
    /// ones. A source that cannot be removed afterwards is only a warning:
    /// the destination is already in place.
    async fn place(
        &self,
        source: &Source,
        dst_key: &str,
        delete_source: bool,
    ) -> Result<Vec<Issue>, Issue> {
        let bucket = self.bucket();
        let acl = self.config.acl();
        let mut warnings = Vec::new();

        match source {
            Source::Remote(src_key) => {
                if src_key != dst_key {
                    self.store
                        .copy(bucket, src_key, bucket, dst_key, acl)
                        .await
                        .map_err(|e| io_issue(&[src_key.as_str(), dst_key], e))?;
                }
                if delete_source && src_key != dst_key {
                    if let Err(e) = self.store.delete(bucket, src_key).await {
                        warn!("Copied {} but could not delete it: {}", src_key, e);
                        warnings.push(io_issue(&[src_key.as_str()], e));
                    }
                }
            }
            Source::Local(path) => {
                let shown = path.display().to_string();
                let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
                self.store
                    .put(bucket, dst_key, PutSource::File(path.clone()), acl)
                    .await
                    .map_err(|e| io_issue(&[shown.as_str(), dst_key], e))?;
                self.metrics.bytes_uploaded(size);
                if delete_source {
                    self.remove_local(path, &mut warnings).await;
                }
            }
        }

        debug!("Placed {} at {}", source.describe(), dst_key);
        Ok(warnings)
    }

    async fn remove_local(&self, path: &std::path::Path, warnings: &mut Vec<Issue>) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not remove local file {}: {}", path.display(), e);
            let shown = path.display().to_string();
            warnings.push(io_issue(&[shown.as_str()], e));
        }
    }

    /// Executes items with at most `max_concurrent_ops` in flight. Reports come
    /// back in item order.
    async fn run_items<I, F, Fut, T>(&self, items: Vec<I>, exec: F) -> Vec<ItemReport<T>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = ItemReport<T>>,
    {
        stream::iter(items)
            .map(exec)
            .buffered(self.config.max_concurrent_ops)
            .collect()
            .await
    }

    /// Folds one item report into the batch status.
    fn fold<T, V>(&self, op: Operation, status: &mut Status<V>, report: ItemReport<T>) -> Option<T> {
        for warning in report.warnings {
            status.warning(warning);
        }
        match report.result {
            Ok(value) => {
                status.succeed();
                self.metrics.item_succeeded(op);
                Some(value)
            }
            Err(issue) => {
                warn!("{} item failed: {}", op, self.resolver.scrub(&issue.to_string()));
                status.error(issue);
                status.fail();
                self.metrics.item_failed(op);
                None
            }
        }
    }

    /// Ends phase one. Returns true when the batch must not execute.
    fn rejected<V>(&self, op: Operation, status: &Status<V>) -> bool {
        if status.ok {
            return false;
        }
        warn!(
            "{} batch rejected during validation: {}",
            op,
            status.messages(|s| self.resolver.scrub(s)).join("; ")
        );
        self.metrics.batch_rejected(op);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claimed_keys() {
        let mut claimed = ClaimedKeys::default();
        assert_eq!(claimed.claim(&["a", "b"]), None);
        assert_eq!(claimed.claim(&["c", "b"]), Some("b"));
        // a refused claim takes nothing
        assert_eq!(claimed.claim(&["c"]), None);
        assert_eq!(claimed.claim(&["a"]), Some("a"));
    }

    #[test]
    fn test_flags_compose() {
        let flags = OpFlags::DELETE_SOURCE | OpFlags::OVERWRITE;
        assert!(flags.delete_source);
        assert!(flags.overwrite);
        assert!(!flags.overwrite_same);
        assert_eq!(OpFlags::default(), OpFlags::NONE);
    }
}
