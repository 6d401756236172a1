use std::collections::HashSet;

use tracing::{debug, info};

use super::{io_issue, ClaimedKeys, ItemReport, ZoneRepo};
use crate::error::{RepoError, RepoResult};
use crate::metrics::Operation;
use crate::status::{Issue, IssueKind, Status};
use crate::zone::Zone;

/// One `(source, archive)` pair of a delete batch: the source relative to the
/// public zone, the archive name relative to the deleted zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteItem {
    pub src_rel: String,
    pub archive_rel: String,
}

impl DeleteItem {
    pub fn new(src_rel: impl Into<String>, archive_rel: impl Into<String>) -> Self {
        Self {
            src_rel: src_rel.into(),
            archive_rel: archive_rel.into(),
        }
    }
}

struct PlannedDelete {
    index: usize,
    src_key: String,
    archive_key: String,
}

/// Splits a batch into waves run one after another. Items touching a key of
/// an earlier item of the same wave move to a later one, so the second file
/// archived under one name finds the archive present and only deletes itself.
fn waves(items: Vec<PlannedDelete>) -> Vec<Vec<PlannedDelete>> {
    let mut waves: Vec<(HashSet<String>, Vec<PlannedDelete>)> = Vec::new();
    for item in items {
        let free = waves.iter().position(|(keys, _)| {
            !keys.contains(&item.src_key) && !keys.contains(&item.archive_key)
        });
        let slot = match free {
            Some(slot) => slot,
            None => {
                waves.push((HashSet::new(), Vec::new()));
                waves.len() - 1
            }
        };
        let (keys, wave) = &mut waves[slot];
        keys.insert(item.src_key.clone());
        keys.insert(item.archive_key.clone());
        wave.push(item);
    }
    waves.into_iter().map(|(_, wave)| wave).collect()
}

impl ZoneRepo {
    /// Moves files from the public zone into the deletion archive.
    ///
    /// Archive names are expected to be content addressed, so an archive key
    /// that already exists means this content is archived already: the source
    /// is then just deleted. Items sharing an archive name run one after the
    /// other for that reason. A source named twice fails the later item, and a
    /// source that is its own archive key rejects the batch.
    pub async fn delete_batch(&self, items: Vec<DeleteItem>) -> RepoResult<Status> {
        let archive_root = match self.resolver.zone_path(Zone::Deleted) {
            Ok(root) => root,
            Err(_) => {
                return Err(RepoError::UnsupportedOperation(
                    "no deletion archive zone is configured".to_string(),
                ))
            }
        };
        let public_root = self.resolver.zone_path(Zone::Public)?;

        let mut status = Status::new_good();
        let mut sources = ClaimedKeys::default();
        let mut refused = Vec::new();
        let mut planned = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let mut valid = true;
            for rel in [&item.src_rel, &item.archive_rel] {
                if let Err(e) = self.validator.validate(rel) {
                    status.fatal(Issue::new(IssueKind::InvalidName, [rel.as_str()]).detail(e));
                    valid = false;
                }
            }
            if !valid {
                continue;
            }
            let src_key = format!("{}/{}", public_root, item.src_rel);
            let archive_key = format!("{}/{}", archive_root, item.archive_rel);
            if src_key == archive_key {
                status.fatal(
                    Issue::new(IssueKind::KeyConflict, [src_key.as_str()])
                        .detail("file is its own archive slot"),
                );
                continue;
            }
            if let Some(taken) = sources.claim(&[src_key.as_str()]) {
                refused.push((
                    index,
                    ItemReport::failure(
                        Issue::new(IssueKind::KeyConflict, [taken])
                            .detail("deleted by an earlier item of the batch"),
                    ),
                ));
                continue;
            }
            planned.push(PlannedDelete {
                index,
                src_key,
                archive_key,
            });
        }
        if self.rejected(Operation::Delete, &status) {
            return Ok(status);
        }

        let mut reports = refused;
        for wave in waves(planned) {
            let indices: Vec<usize> = wave.iter().map(|item| item.index).collect();
            let done = self.run_items(wave, |item| self.delete_one(item)).await;
            reports.extend(indices.into_iter().zip(done));
        }
        reports.sort_by_key(|(index, _)| *index);
        for (_, report) in reports {
            self.fold(Operation::Delete, &mut status, report);
        }

        info!(
            "Delete batch done: {} archived, {} failed",
            status.success_count, status.fail_count
        );
        Ok(status)
    }

    async fn delete_one(&self, item: PlannedDelete) -> ItemReport<()> {
        let bucket = self.bucket();
        let archived = match self.store.info(bucket, &item.archive_key).await {
            Ok(info) => info.is_some(),
            Err(e) => return ItemReport::failure(io_issue(&[item.archive_key.as_str()], e)),
        };

        if archived {
            debug!(
                "{} is already archived, deleting {} only",
                item.archive_key, item.src_key
            );
            return match self.store.delete(bucket, &item.src_key).await {
                Ok(()) => ItemReport::success(()),
                Err(e) => ItemReport::failure(io_issue(&[item.src_key.as_str()], e)),
            };
        }

        match self.move_object(&item.src_key, &item.archive_key).await {
            Ok(()) => ItemReport::success(()),
            Err(issue) => ItemReport::failure(issue),
        }
    }
}
