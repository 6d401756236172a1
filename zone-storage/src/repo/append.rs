use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{io_issue, OpFlags, ZoneRepo};
use crate::error::RepoResult;
use crate::metrics::Operation;
use crate::status::{Issue, IssueKind, Status};
use crate::store::PutSource;
use crate::zone::VirtualUrl;

impl ZoneRepo {
    /// Appends a local chunk to an object already in the store.
    ///
    /// The store has no partial write, so this downloads the object, appends
    /// the chunk locally and uploads the result to the same key. Two writers
    /// appending to one key concurrently lose data; callers must make sure
    /// there is only one. The status value is the key on success.
    pub async fn append(
        &self,
        src: &str,
        chunk_path: &Path,
        flags: OpFlags,
    ) -> RepoResult<Status<String>> {
        let key = self.locator_key(src)?;
        let mut status = Status::new_good();

        // virtual URLs are validated while resolving, raw keys are not
        if !VirtualUrl::is_virtual(src) {
            match self.resolver.locate(&key) {
                Some((_, rel)) => {
                    if let Err(e) = self.validator.validate(rel) {
                        status.fatal(Issue::new(IssueKind::InvalidName, [key.as_str()]).detail(e));
                    }
                }
                None => status.fatal(
                    Issue::new(IssueKind::InvalidName, [key.as_str()])
                        .detail("key is outside the repository zones"),
                ),
            }
            if self.rejected(Operation::Append, &status) {
                return Ok(status);
            }
        }

        match tokio::fs::metadata(chunk_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                let shown = chunk_path.display().to_string();
                status.fatal(Issue::new(IssueKind::SourceNotFound, [shown]));
            }
        }
        match self.store.info(self.bucket(), &key).await {
            Ok(Some(_)) => {}
            Ok(None) => status.fatal(Issue::new(IssueKind::SourceNotFound, [key.as_str()])),
            Err(e) => status.fatal(io_issue(&[key.as_str()], e)),
        }
        if self.rejected(Operation::Append, &status) {
            return Ok(status);
        }

        let scratch = std::env::temp_dir().join(format!("zone-append-{}", Uuid::new_v4()));
        let result = self.append_via(&key, chunk_path, &scratch).await;
        if let Err(e) = tokio::fs::remove_file(&scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove scratch file {}: {}", scratch.display(), e);
            }
        }

        match result {
            Ok(()) => {
                status.succeed();
                self.metrics.item_succeeded(Operation::Append);
                if flags.delete_source {
                    let mut warnings = Vec::new();
                    self.remove_local(chunk_path, &mut warnings).await;
                    for warning in warnings {
                        status.warning(warning);
                    }
                }
                status.value = Some(key);
            }
            Err(issue) => {
                warn!("Append to {} failed: {}", key, issue);
                status.error(issue);
                status.fail();
                self.metrics.item_failed(Operation::Append);
            }
        }
        Ok(status)
    }

    async fn append_via(&self, key: &str, chunk_path: &Path, scratch: &Path) -> Result<(), Issue> {
        let bucket = self.bucket();
        let chunk_shown = chunk_path.display().to_string();

        self.store
            .get(bucket, key, scratch)
            .await
            .map_err(|e| Issue::new(IssueKind::AppendRead, [key]).detail(e))?;
        let chunk = tokio::fs::read(chunk_path)
            .await
            .map_err(|e| Issue::new(IssueKind::AppendRead, [chunk_shown.as_str()]).detail(e))?;

        let append_err =
            |e: std::io::Error| Issue::new(IssueKind::AppendWrite, [chunk_shown.as_str(), key]).detail(e);
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(scratch)
            .await
            .map_err(append_err)?;
        file.write_all(&chunk).await.map_err(append_err)?;
        file.flush().await.map_err(append_err)?;
        drop(file);

        self.store
            .put(bucket, key, PutSource::File(scratch.to_path_buf()), self.config.acl())
            .await
            .map_err(|e| Issue::new(IssueKind::AppendWrite, [chunk_shown.as_str(), key]).detail(e))?;
        self.metrics.bytes_uploaded(chunk.len() as u64);

        debug!("Appended {} bytes from {} to {}", chunk.len(), chunk_shown, key);
        Ok(())
    }
}
