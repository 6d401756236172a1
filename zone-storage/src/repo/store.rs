use chrono::Utc;
use std::path::Path;
use tracing::{debug, info};

use super::{io_issue, ClaimedKeys, ItemReport, OpFlags, Source, SourceRef, ZoneRepo};
use crate::error::{RepoError, RepoResult};
use crate::metrics::Operation;
use crate::status::{Issue, IssueKind, Status};
use crate::zone::{VirtualUrl, Zone};

/// One `(source, zone, destination)` triplet of a store batch.
///
/// The source is a virtual URL, an object key already in the store, or a
/// local staging path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreItem {
    pub src: String,
    pub zone: Zone,
    pub dest_rel: String,
}

impl StoreItem {
    pub fn new(src: impl Into<String>, zone: Zone, dest_rel: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            zone,
            dest_rel: dest_rel.into(),
        }
    }
}

/// What [`ZoneRepo::free_temp`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeTemp {
    /// The object existed and was deleted.
    Deleted,
    /// Nothing was stored under the locator.
    NotFound,
}

struct PlannedStore {
    source: SourceRef,
    dst_key: String,
}

struct ReadyStore {
    source: Source,
    dst_key: String,
}

impl ZoneRepo {
    /// Stores a single file. See [`store_batch`](Self::store_batch).
    pub async fn store(
        &self,
        src: &str,
        zone: Zone,
        dest_rel: &str,
        flags: OpFlags,
    ) -> RepoResult<Status> {
        self.store_batch(vec![StoreItem::new(src, zone, dest_rel)], flags)
            .await
    }

    /// Stores a batch of files into zones.
    ///
    /// Remote sources are copied (and deleted with `delete_source`), local
    /// sources uploaded (and removed with `delete_source`). An existing
    /// destination fails its item unless `overwrite` is set, or
    /// `overwrite_same` is set and the contents match. A destination named by
    /// several items is written by the first; the others fail the same way.
    pub async fn store_batch(&self, items: Vec<StoreItem>, flags: OpFlags) -> RepoResult<Status> {
        let mut status = Status::new_good();

        let mut claimed = ClaimedKeys::default();
        let mut refused: Vec<ItemReport<()>> = Vec::new();
        let mut planned = Vec::with_capacity(items.len());
        for item in &items {
            let root = self.resolver.zone_path(item.zone)?;
            let source = self.source_ref(&item.src)?;
            if let Err(e) = self.validator.validate(&item.dest_rel) {
                status.fatal(Issue::new(IssueKind::InvalidName, [item.dest_rel.as_str()]).detail(e));
                continue;
            }
            let dst_key = format!("{}/{}", root, item.dest_rel);
            if let Some(taken) = claimed.claim(&[dst_key.as_str()]) {
                refused.push(ItemReport::failure(
                    Issue::new(IssueKind::AlreadyExists, [taken])
                        .detail("written by an earlier item of the batch"),
                ));
                continue;
            }
            planned.push(PlannedStore { source, dst_key });
        }
        if self.rejected(Operation::Store, &status) {
            return Ok(status);
        }

        let mut ready = Vec::with_capacity(planned.len());
        for plan in planned {
            match self.probe_source(&plan.source).await {
                Ok(source) => ready.push(ReadyStore {
                    source,
                    dst_key: plan.dst_key,
                }),
                Err(issue) => status.fatal(issue),
            }
        }
        if self.rejected(Operation::Store, &status) {
            return Ok(status);
        }

        let reports = self
            .run_items(ready, |item| self.store_one(item, flags))
            .await;
        for report in reports.into_iter().chain(refused) {
            self.fold(Operation::Store, &mut status, report);
        }

        info!(
            "Store batch done: {} stored, {} failed",
            status.success_count, status.fail_count
        );
        Ok(status)
    }

    async fn store_one(&self, item: ReadyStore, flags: OpFlags) -> ItemReport<()> {
        let bucket = self.bucket();
        let existing = match self.store.info(bucket, &item.dst_key).await {
            Ok(existing) => existing,
            Err(e) => return ItemReport::failure(io_issue(&[item.dst_key.as_str()], e)),
        };

        if let Some(existing) = existing {
            if !flags.overwrite {
                if !flags.overwrite_same {
                    return ItemReport::failure(Issue::new(
                        IssueKind::AlreadyExists,
                        [item.dst_key.as_str()],
                    ));
                }
                match self.source_digest(&item.source).await {
                    Ok(digest) if digest == existing.etag => {
                        debug!("{} already holds identical content", item.dst_key);
                        let mut warnings = Vec::new();
                        if flags.delete_source {
                            self.drop_source(&item.source, &item.dst_key, &mut warnings)
                                .await;
                        }
                        return ItemReport::success(()).with_warnings(warnings);
                    }
                    Ok(_) => {
                        return ItemReport::failure(
                            Issue::new(IssueKind::AlreadyExists, [item.dst_key.as_str()])
                                .detail("content differs"),
                        )
                    }
                    Err(e) => {
                        let shown = item.source.describe();
                        return ItemReport::failure(io_issue(&[shown.as_str()], e));
                    }
                }
            }
        }

        match self.place(&item.source, &item.dst_key, flags.delete_source).await {
            Ok(warnings) => ItemReport::success(()).with_warnings(warnings),
            Err(issue) => ItemReport::failure(issue),
        }
    }

    async fn drop_source(&self, source: &Source, dst_key: &str, warnings: &mut Vec<Issue>) {
        match source {
            Source::Remote(key) if key != dst_key => {
                if let Err(e) = self.store.delete(self.bucket(), key).await {
                    warnings.push(io_issue(&[key.as_str()], e));
                }
            }
            Source::Remote(_) => {}
            Source::Local(path) => self.remove_local(path, warnings).await,
        }
    }

    /// Stores a file under a fresh name in the temp zone and returns its
    /// virtual URL in the status value.
    ///
    /// The name is `<hash path><UTC timestamp>!<original name>`, which keeps
    /// concurrent uploads of the same file name apart without coordination.
    pub async fn store_temp(
        &self,
        original_name: &str,
        src_path: &Path,
    ) -> RepoResult<Status<VirtualUrl>> {
        let date = Utc::now().format("%Y%m%d%H%M%S");
        let dst_rel = format!(
            "{}{}!{}",
            self.resolver.hash_path(original_name),
            date,
            original_name
        );
        debug!("Storing temp file {} as {}", src_path.display(), dst_rel);

        let src = src_path.to_string_lossy();
        let mut status = Status::new_good();
        status.merge(self.store(&src, Zone::Temp, &dst_rel, OpFlags::NONE).await?);
        if status.ok && status.success_count == 1 {
            status.value = Some(self.resolver.virtual_url(Zone::Temp, &dst_rel));
        }
        Ok(status)
    }

    /// Deletes a temp object by its virtual URL.
    ///
    /// A locator with nothing behind it is reported as [`FreeTemp::NotFound`]
    /// rather than folded into success, so callers can tell a stale locator
    /// from a real deletion. Locators outside the temp zone are refused.
    pub async fn free_temp(&self, url: &str) -> RepoResult<FreeTemp> {
        let resolved = self.resolver.parse(url)?;
        if resolved.zone != Zone::Temp {
            return Err(RepoError::UnsupportedOperation(format!(
                "free_temp on a locator in the {} zone",
                resolved.zone
            )));
        }

        let bucket = self.bucket();
        if self.store.info(bucket, &resolved.key).await?.is_none() {
            debug!("Temp object {} already gone", resolved.key);
            return Ok(FreeTemp::NotFound);
        }

        match self.store.delete(bucket, &resolved.key).await {
            Ok(()) => {
                self.metrics.item_succeeded(Operation::FreeTemp);
                Ok(FreeTemp::Deleted)
            }
            Err(e) => {
                self.metrics.item_failed(Operation::FreeTemp);
                Err(e.into())
            }
        }
    }
}
