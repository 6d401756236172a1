use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use zone_storage::{
    DeleteItem, FreeTemp, FsObjectStore, OpFlags, PublishItem, RepoConfig, Status, StoreItem,
    Zone, ZoneRepo,
};

use crate::metrics::SharedMetrics;

#[derive(Args, Debug, Clone)]
pub struct RepoArgs {
    #[arg(long, global = true, help = "Repository config file (TOML)")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Root directory of the filesystem object store"
    )]
    pub fs_root: PathBuf,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct FlagArgs {
    /// Remove the source once it has been placed
    #[arg(long)]
    pub delete_source: bool,

    /// Replace an existing destination
    #[arg(long)]
    pub overwrite: bool,

    /// Accept an existing destination with identical content
    #[arg(long)]
    pub overwrite_same: bool,
}

impl FlagArgs {
    pub fn to_flags(self) -> OpFlags {
        OpFlags {
            delete_source: self.delete_source,
            overwrite: self.overwrite,
            overwrite_same: self.overwrite_same,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store files into a zone
    Store {
        /// Source: virtual URL, object key or local file
        #[arg(required_unless_present = "batch")]
        src: Option<String>,
        /// Destination path relative to the zone
        #[arg(required_unless_present = "batch")]
        dest: Option<String>,
        #[arg(long, default_value = "public")]
        zone: Zone,
        #[arg(long, conflicts_with_all = ["src", "dest"], help = "JSON array of {src, zone, dest}")]
        batch: Option<PathBuf>,
        #[command(flatten)]
        flags: FlagArgs,
    },

    /// Store a local file under a fresh temp name
    StoreTemp {
        /// Original file name, used in the generated name
        name: String,
        /// Local file to upload
        path: PathBuf,
    },

    /// Delete a temp file by virtual URL
    FreeTemp { url: String },

    /// Append a local chunk to a stored file
    Append {
        src: String,
        chunk: PathBuf,
        #[arg(long)]
        delete_source: bool,
    },

    /// Publish files into the public zone, archiving what they replace
    Publish {
        #[arg(required_unless_present = "batch")]
        src: Option<String>,
        #[arg(required_unless_present = "batch")]
        dest: Option<String>,
        #[arg(required_unless_present = "batch")]
        archive: Option<String>,
        #[arg(
            long,
            conflicts_with_all = ["src", "dest", "archive"],
            help = "JSON array of {src, dest, archive}"
        )]
        batch: Option<PathBuf>,
        #[command(flatten)]
        flags: FlagArgs,
    },

    /// Move public files into the deletion archive
    Delete {
        /// Path relative to the public zone
        #[arg(required_unless_present = "batch")]
        src: Option<String>,
        /// Archive name; derived from the content digest when omitted
        archive: Option<String>,
        #[arg(long, conflicts_with_all = ["src", "archive"], help = "JSON array of {src, archive}")]
        batch: Option<PathBuf>,
    },

    /// Check which locators exist
    Exists {
        #[arg(required = true)]
        locators: Vec<String>,
    },

    /// List every object under the repository root
    Enumerate,

    /// Show stored information about a locator
    Info { locator: String },

    /// Show the zone layout of the repository
    Zones,
}

#[derive(Debug, Deserialize)]
struct StoreEntry {
    src: String,
    #[serde(default = "default_zone")]
    zone: String,
    dest: String,
}

fn default_zone() -> String {
    Zone::Public.to_string()
}

#[derive(Debug, Deserialize)]
struct PublishEntry {
    src: String,
    dest: String,
    archive: String,
}

#[derive(Debug, Deserialize)]
struct DeleteEntry {
    src: String,
    archive: Option<String>,
}

fn read_batch<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let entries: Vec<T> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse batch file {}", path.display()))?;
    if entries.is_empty() {
        bail!("batch file {} contains no items", path.display());
    }
    Ok(entries)
}

/// Builds the repository from the config file (or defaults) over a
/// filesystem object store.
pub fn open_repo(args: &RepoArgs, metrics: &SharedMetrics) -> Result<ZoneRepo> {
    let config = match &args.config {
        Some(path) => RepoConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            debug!("No config file given, using defaults");
            RepoConfig::default()
        }
    };

    std::fs::create_dir_all(&args.fs_root)?;
    let fs_root = args.fs_root.canonicalize()?;
    info!("Using fs_root: {}", fs_root.display());

    let repo = ZoneRepo::new(Arc::new(FsObjectStore::new(fs_root)), config)?
        .with_metrics(metrics.to_zone_metrics());
    Ok(repo)
}

/// Status as JSON, with issue messages scrubbed of storage paths.
fn report<V: Serialize>(repo: &ZoneRepo, status: &Status<V>) -> Result<Value> {
    let mut value = serde_json::to_value(status)?;
    let messages = status.messages(|s| repo.resolver().scrub(s));
    value["messages"] = json!(messages);
    Ok(value)
}

/// Default archive name for a deleted file: content digest plus extension,
/// spread over hashed sub-directories.
async fn archive_name(repo: &ZoneRepo, src_rel: &str) -> Result<String> {
    let key = repo.resolver().key(Zone::Public, src_rel)?;
    let Some(info) = repo.file_info(&key).await? else {
        bail!("nothing stored at {}", src_rel);
    };
    let name = match Path::new(src_rel).extension() {
        Some(ext) => format!("{}.{}", info.etag, ext.to_string_lossy().to_lowercase()),
        None => info.etag.clone(),
    };
    Ok(format!("{}{}", repo.resolver().deleted_hash_path(&name), name))
}

#[tokio::main]
pub async fn run(args: RepoArgs, command: Command, metrics: SharedMetrics) -> Result<Value> {
    let repo = open_repo(&args, &metrics)?;

    let output = match command {
        Command::Store {
            src,
            dest,
            zone,
            batch,
            flags,
        } => {
            let items = match (batch, src, dest) {
                (Some(path), _, _) => read_batch::<StoreEntry>(&path)?
                    .into_iter()
                    .map(|e| Ok(StoreItem::new(e.src, e.zone.parse()?, e.dest)))
                    .collect::<Result<Vec<_>>>()?,
                (None, Some(src), Some(dest)) => vec![StoreItem::new(src, zone, dest)],
                _ => bail!("store needs a source and a destination, or --batch"),
            };
            let status = repo.store_batch(items, flags.to_flags()).await?;
            report(&repo, &status)?
        }
        Command::StoreTemp { name, path } => {
            let status = repo.store_temp(&name, &path).await?;
            report(&repo, &status)?
        }
        Command::FreeTemp { url } => {
            let result = match repo.free_temp(&url).await? {
                FreeTemp::Deleted => "deleted",
                FreeTemp::NotFound => "not_found",
            };
            json!({ "url": url, "result": result })
        }
        Command::Append {
            src,
            chunk,
            delete_source,
        } => {
            let flags = if delete_source {
                OpFlags::DELETE_SOURCE
            } else {
                OpFlags::NONE
            };
            let status = repo.append(&src, &chunk, flags).await?;
            report(&repo, &status)?
        }
        Command::Publish {
            src,
            dest,
            archive,
            batch,
            flags,
        } => {
            let items = match (batch, src, dest, archive) {
                (Some(path), ..) => read_batch::<PublishEntry>(&path)?
                    .into_iter()
                    .map(|e| PublishItem::new(e.src, e.dest, e.archive))
                    .collect(),
                (None, Some(src), Some(dest), Some(archive)) => {
                    vec![PublishItem::new(src, dest, archive)]
                }
                _ => bail!("publish needs a source, a destination and an archive name, or --batch"),
            };
            let status = repo.publish_batch(items, flags.to_flags()).await?;
            report(&repo, &status)?
        }
        Command::Delete { src, archive, batch } => {
            let entries = match (batch, src) {
                (Some(path), _) => read_batch::<DeleteEntry>(&path)?,
                (None, Some(src)) => vec![DeleteEntry { src, archive }],
                _ => bail!("delete needs a source, or --batch"),
            };
            let mut items = Vec::with_capacity(entries.len());
            for entry in entries {
                let archive = match entry.archive {
                    Some(archive) => archive,
                    None => archive_name(&repo, &entry.src).await?,
                };
                items.push(DeleteItem::new(entry.src, archive));
            }
            let status = repo.delete_batch(items).await?;
            report(&repo, &status)?
        }
        Command::Exists { locators } => json!(repo.exists_batch(locators.as_slice()).await?),
        Command::Enumerate => {
            let mut keys = Vec::new();
            let count = repo.enumerate(|key| keys.push(key.to_string())).await?;
            keys.sort();
            json!({ "count": count, "keys": keys })
        }
        Command::Info { locator } => {
            let key = repo.locator_key(&locator)?;
            match repo.file_info(&locator).await? {
                Some(info) => json!({
                    "locator": locator,
                    "key": key,
                    "exists": true,
                    "size": info.size,
                    "etag": info.etag,
                    "last_modified": info.last_modified.map(|t| t.to_rfc3339()),
                }),
                None => json!({ "locator": locator, "key": key, "exists": false }),
            }
        }
        Command::Zones => {
            let resolver = repo.resolver();
            let zones: Vec<Value> = Zone::ALL
                .iter()
                .map(|&zone| {
                    let path = resolver.zone_path(zone).ok();
                    json!({
                        "zone": zone.as_str(),
                        "path": path,
                        "url": resolver.zone_url(zone),
                        "configured": path.is_some(),
                    })
                })
                .collect();
            json!({
                "name": repo.name(),
                "repo_url": resolver.repo_url(),
                "root_url": resolver.root_url(),
                "url_base": resolver.url_base(),
                "bucket": repo.config().bucket,
                "hashed": resolver.is_hashed(),
                "zones": zones,
            })
        }
    };

    Ok(output)
}
