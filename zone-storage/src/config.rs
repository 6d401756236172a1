use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{RepoError, RepoResult};
use crate::store::Acl;

/// Characters the hosting application never allows in a file name.
pub const DEFAULT_ILLEGAL_CHARS: &str = "#<>[]|{}\\";

/// Longest key most object stores accept.
pub const DEFAULT_MAX_PATH_BYTES: usize = 1024;

pub const DEFAULT_HASH_LEVELS: usize = 2;

pub const DEFAULT_MAX_CONCURRENT_OPS: usize = 8;

/// Filename policy applied by the [`Validator`](crate::validate::Validator).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilenamePolicy {
    /// Every character in this string is rejected anywhere in a relative path.
    pub illegal_chars: String,
    /// Upper bound on the byte length of a relative path.
    pub max_path_bytes: usize,
}

impl Default for FilenamePolicy {
    fn default() -> Self {
        Self {
            illegal_chars: DEFAULT_ILLEGAL_CHARS.to_string(),
            max_path_bytes: DEFAULT_MAX_PATH_BYTES,
        }
    }
}

/// Repository configuration, usually read from a `repo.toml` file.
///
/// ```toml
/// name = "wiki"
/// bucket = "media-bucket"
/// directory = "wiki-images"
/// deleted_dir = "wiki-images/deleted"
/// public = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Repository name, embedded in every virtual URL this instance issues.
    pub name: String,
    /// Bucket holding every zone of this repository.
    pub bucket: String,
    /// Key prefix of the public zone; the other zones default to sub-prefixes.
    pub directory: String,
    /// Public URL of the public zone. Derived from `bucket` and `directory` when unset.
    pub url: Option<String>,
    /// Base URL of the store, without the zone directory.
    pub url_base: Option<String>,
    pub thumb_dir: Option<String>,
    pub thumb_url: Option<String>,
    /// Key prefix of the deletion archive. Deleting is unsupported without it.
    pub deleted_dir: Option<String>,
    /// Number of MD5 prefix levels used for temp-zone names.
    pub hash_levels: usize,
    /// Number of key characters turned into directory levels in the deleted zone.
    /// Falls back to `hash_levels`.
    pub deleted_hash_levels: Option<usize>,
    /// Upload objects world-readable instead of private.
    pub public: bool,
    /// Use https when deriving the default public URL.
    pub ssl: bool,
    /// Upper bound of concurrently executing items in one batch.
    pub max_concurrent_ops: usize,
    pub filename_policy: FilenamePolicy,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            bucket: "media".to_string(),
            directory: "images".to_string(),
            url: None,
            url_base: None,
            thumb_dir: None,
            thumb_url: None,
            deleted_dir: None,
            hash_levels: DEFAULT_HASH_LEVELS,
            deleted_hash_levels: None,
            public: false,
            ssl: true,
            max_concurrent_ops: DEFAULT_MAX_CONCURRENT_OPS,
            filename_policy: FilenamePolicy::default(),
        }
    }
}

impl RepoConfig {
    /// Load and check a configuration from a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> RepoResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| RepoError::Config(format!("Failed to read repository config file: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> RepoResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RepoError::Config(format!("Failed to parse repository config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Rejects settings the resolver could not work with.
    pub fn check(&self) -> RepoResult<()> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(RepoError::Config(format!(
                "repository name '{}' must be non-empty and contain no '/'",
                self.name
            )));
        }
        if self.bucket.is_empty() {
            return Err(RepoError::Config("bucket must not be empty".to_string()));
        }
        if self.directory.trim_matches('/').is_empty() {
            return Err(RepoError::Config("directory must not be empty".to_string()));
        }
        for (field, dir) in [("thumb_dir", &self.thumb_dir), ("deleted_dir", &self.deleted_dir)] {
            if let Some(dir) = dir {
                if dir.trim_matches('/').is_empty() {
                    return Err(RepoError::Config(format!(
                        "{} must not be empty when set",
                        field
                    )));
                }
            }
        }
        if self.max_concurrent_ops == 0 {
            return Err(RepoError::Config(
                "max_concurrent_ops must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Public URL of the public zone.
    pub fn root_url(&self) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "{}://s3.amazonaws.com/{}/{}",
                if self.ssl { "https" } else { "http" },
                self.bucket,
                self.directory.trim_matches('/')
            ),
        }
    }

    pub fn deleted_hash_levels(&self) -> usize {
        self.deleted_hash_levels.unwrap_or(self.hash_levels)
    }

    /// ACL applied to every object written by the repository.
    pub fn acl(&self) -> Acl {
        if self.public {
            Acl::PublicRead
        } else {
            Acl::Private
        }
    }
}
