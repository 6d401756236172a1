use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::debug;

use super::ZoneRepo;
use crate::error::{RepoError, RepoResult};
use crate::store::ObjectInfo;

impl ZoneRepo {
    /// Checks which locators exist. Virtual URLs are resolved first, any
    /// other string is probed as a key. Nothing is modified.
    pub async fn exists_batch<L: AsRef<str>>(
        &self,
        locators: &[L],
    ) -> RepoResult<HashMap<String, bool>> {
        let keys = locators
            .iter()
            .map(|l| Ok((l.as_ref().to_string(), self.locator_key(l.as_ref())?)))
            .collect::<RepoResult<Vec<_>>>()?;

        let bucket = self.bucket();
        stream::iter(keys)
            .map(|(locator, key)| async move {
                let exists = self.store.exists(bucket, &key).await?;
                Ok::<_, RepoError>((locator, exists))
            })
            .buffer_unordered(self.config.max_concurrent_ops)
            .try_collect()
            .await
    }

    /// Head information for a locator, `None` when nothing is stored there.
    pub async fn file_info(&self, locator: &str) -> RepoResult<Option<ObjectInfo>> {
        let key = self.locator_key(locator)?;
        Ok(self.store.info(self.bucket(), &key).await?)
    }

    /// Calls `callback` once for every object under the repository root, in
    /// no particular order. Returns the number of objects seen.
    pub async fn enumerate<F>(&self, mut callback: F) -> RepoResult<usize>
    where
        F: FnMut(&str),
    {
        let prefix = format!("{}/", self.resolver.root_directory());
        let keys = self.store.list(self.bucket(), &prefix).await?;
        debug!("Enumerating {} objects under {}", keys.len(), prefix);
        for key in &keys {
            callback(key);
        }
        Ok(keys.len())
    }
}
