use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{io_issue, ClaimedKeys, ItemReport, OpFlags, Source, SourceRef, ZoneRepo};
use crate::error::RepoResult;
use crate::metrics::Operation;
use crate::status::{Issue, IssueKind, Status};
use crate::zone::Zone;

/// One `(source, destination, archive)` triplet of a publish batch. Both
/// relative paths are inside the public zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishItem {
    pub src: String,
    pub dest_rel: String,
    /// Where the current occupant of `dest_rel` goes, if there is one.
    pub archive_rel: String,
}

impl PublishItem {
    pub fn new(
        src: impl Into<String>,
        dest_rel: impl Into<String>,
        archive_rel: impl Into<String>,
    ) -> Self {
        Self {
            src: src.into(),
            dest_rel: dest_rel.into(),
            archive_rel: archive_rel.into(),
        }
    }
}

/// Per-item result of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishOutcome {
    /// Nothing was at the destination before.
    New,
    /// The previous occupant was moved to the archive slot first.
    Archived,
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::New => "new",
            PublishOutcome::Archived => "archived",
        }
    }
}

struct PlannedPublish {
    index: usize,
    source: SourceRef,
    dst_key: String,
    archive_key: String,
}

struct ReadyPublish {
    index: usize,
    source: Source,
    dst_key: String,
    archive_key: String,
}

/// Status value of a publish batch: item index to outcome, for the items
/// that succeeded.
pub type PublishOutcomes = BTreeMap<usize, PublishOutcome>;

impl ZoneRepo {
    /// Publishes a single file. See [`publish_batch`](Self::publish_batch).
    pub async fn publish(
        &self,
        src: &str,
        dest_rel: &str,
        archive_rel: &str,
        flags: OpFlags,
    ) -> RepoResult<Status<PublishOutcomes>> {
        self.publish_batch(vec![PublishItem::new(src, dest_rel, archive_rel)], flags)
            .await
    }

    /// Promotes files into the public zone, archiving whatever they replace.
    ///
    /// When the destination is occupied, its content is moved to the archive
    /// slot before the new file is placed. An occupied archive slot fails the
    /// item without touching either key: the move is a copy followed by a
    /// delete, and copying over an archived version would destroy it.
    ///
    /// A destination or archive slot named by several items belongs to the
    /// first of them. A source that is its own destination or archive slot,
    /// or an item archiving onto its own destination, rejects the batch.
    pub async fn publish_batch(
        &self,
        items: Vec<PublishItem>,
        flags: OpFlags,
    ) -> RepoResult<Status<PublishOutcomes>> {
        let mut status = Status::new_good_with(PublishOutcomes::new());
        let root = self.resolver.zone_path(Zone::Public)?;

        let mut claimed = ClaimedKeys::default();
        let mut refused: Vec<ItemReport<(usize, PublishOutcome)>> = Vec::new();
        let mut planned = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let source = self.source_ref(&item.src)?;
            let mut valid = true;
            for rel in [&item.dest_rel, &item.archive_rel] {
                if let Err(e) = self.validator.validate(rel) {
                    status.fatal(Issue::new(IssueKind::InvalidName, [rel.as_str()]).detail(e));
                    valid = false;
                }
            }
            if !valid {
                continue;
            }
            let dst_key = format!("{}/{}", root, item.dest_rel);
            let archive_key = format!("{}/{}", root, item.archive_rel);
            if dst_key == archive_key {
                status.fatal(
                    Issue::new(IssueKind::KeyConflict, [dst_key.as_str()])
                        .detail("destination is its own archive slot"),
                );
                continue;
            }
            if let Some(taken) = claimed.claim(&[dst_key.as_str(), archive_key.as_str()]) {
                let kind = if taken == dst_key {
                    IssueKind::AlreadyExists
                } else {
                    IssueKind::ArchiveSlotOccupied
                };
                refused.push(ItemReport::failure(
                    Issue::new(kind, [taken]).detail("written by an earlier item of the batch"),
                ));
                continue;
            }
            planned.push(PlannedPublish {
                index,
                source,
                dst_key,
                archive_key,
            });
        }
        if self.rejected(Operation::Publish, &status) {
            return Ok(status);
        }

        let mut ready = Vec::with_capacity(planned.len());
        for plan in planned {
            match self.probe_source(&plan.source).await {
                // placing a key onto itself after archiving it would leave
                // the destination empty
                Ok(Source::Remote(key)) if key == plan.dst_key || key == plan.archive_key => {
                    status.fatal(
                        Issue::new(IssueKind::KeyConflict, [key.as_str()])
                            .detail("source is the destination or its archive slot"),
                    );
                }
                Ok(source) => ready.push(ReadyPublish {
                    index: plan.index,
                    source,
                    dst_key: plan.dst_key,
                    archive_key: plan.archive_key,
                }),
                Err(issue) => status.fatal(issue),
            }
        }
        if self.rejected(Operation::Publish, &status) {
            return Ok(status);
        }

        let reports = self
            .run_items(ready, |item| self.publish_one(item, flags))
            .await;
        let mut outcomes = PublishOutcomes::new();
        for report in reports.into_iter().chain(refused) {
            if let Some((index, outcome)) = self.fold(Operation::Publish, &mut status, report) {
                outcomes.insert(index, outcome);
            }
        }
        status.value = Some(outcomes);

        info!(
            "Publish batch done: {} published, {} failed",
            status.success_count, status.fail_count
        );
        Ok(status)
    }

    async fn publish_one(
        &self,
        item: ReadyPublish,
        flags: OpFlags,
    ) -> ItemReport<(usize, PublishOutcome)> {
        let bucket = self.bucket();

        let occupied = match self.store.info(bucket, &item.dst_key).await {
            Ok(info) => info.is_some(),
            Err(e) => return ItemReport::failure(io_issue(&[item.dst_key.as_str()], e)),
        };

        let outcome = if occupied {
            match self.store.info(bucket, &item.archive_key).await {
                Ok(None) => {}
                Ok(Some(_)) => {
                    return ItemReport::failure(Issue::new(
                        IssueKind::ArchiveSlotOccupied,
                        [item.dst_key.as_str(), item.archive_key.as_str()],
                    ))
                }
                Err(e) => {
                    return ItemReport::failure(io_issue(&[item.archive_key.as_str()], e))
                }
            }
            if let Err(issue) = self.move_object(&item.dst_key, &item.archive_key).await {
                return ItemReport::failure(issue);
            }
            debug!("Archived {} to {}", item.dst_key, item.archive_key);
            PublishOutcome::Archived
        } else {
            PublishOutcome::New
        };

        match self.place(&item.source, &item.dst_key, flags.delete_source).await {
            Ok(warnings) => ItemReport::success((item.index, outcome)).with_warnings(warnings),
            Err(issue) => {
                let report = ItemReport::failure(issue);
                if outcome == PublishOutcome::Archived {
                    // the previous version is only in the archive slot now
                    report.with_warnings(vec![Issue::new(
                        IssueKind::StorageIo,
                        [item.dst_key.as_str(), item.archive_key.as_str()],
                    )
                    .detail("destination was archived before the failure")])
                } else {
                    report
                }
            }
        }
    }
}
