//! Zone to key-prefix mapping and virtual URL handling.

use md5::{Digest, Md5};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::config::RepoConfig;
use crate::error::{RepoError, RepoResult};
use crate::validate::Validator;

/// Scheme of every locator issued by a repository.
pub const VIRTUAL_URL_SCHEME: &str = "zrepo";

const SCHEME_PREFIX: &str = "zrepo://";

/// Named logical area of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Zone {
    Public,
    Temp,
    Deleted,
    Thumb,
}

impl Zone {
    pub const ALL: [Zone; 4] = [Zone::Public, Zone::Temp, Zone::Deleted, Zone::Thumb];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Public => "public",
            Zone::Temp => "temp",
            Zone::Deleted => "deleted",
            Zone::Thumb => "thumb",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Zone::Public),
            "temp" => Ok(Zone::Temp),
            "deleted" => Ok(Zone::Deleted),
            "thumb" => Ok(Zone::Thumb),
            _ => Err(RepoError::UnknownZone(s.to_string())),
        }
    }
}

/// Opaque repository-scoped locator: `zrepo://<repo>/<zone>/<encoded path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VirtualUrl(String);

impl VirtualUrl {
    /// Returns true if `s` uses the virtual URL scheme. Says nothing about validity.
    pub fn is_virtual(s: &str) -> bool {
        s.starts_with(SCHEME_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for VirtualUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VirtualUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A virtual URL taken apart and mapped onto this repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub zone: Zone,
    /// Decoded path relative to the zone root.
    pub rel: String,
    /// Physical object key.
    pub key: String,
}

/// Maps zones to key prefixes and public URLs, and virtual URLs to keys.
///
/// Pure lookups only; nothing here touches the object store.
#[derive(Debug, Clone)]
pub struct Resolver {
    name: String,
    public_dir: String,
    temp_dir: String,
    thumb_dir: String,
    deleted_dir: Option<String>,
    url: String,
    thumb_url: String,
    url_base: Option<String>,
    hash_levels: usize,
    deleted_hash_levels: usize,
    validator: Validator,
}

impl Resolver {
    pub fn new(config: &RepoConfig) -> Self {
        let public_dir = config.directory.trim_matches('/').to_string();
        let url = config.root_url();
        Self {
            name: config.name.clone(),
            temp_dir: format!("{}/temp", public_dir),
            thumb_dir: config
                .thumb_dir
                .as_deref()
                .map(|d| d.trim_matches('/').to_string())
                .unwrap_or_else(|| format!("{}/thumb", public_dir)),
            deleted_dir: config
                .deleted_dir
                .as_deref()
                .map(|d| d.trim_matches('/').to_string()),
            thumb_url: config
                .thumb_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("{}/thumb", url)),
            url_base: config.url_base.clone(),
            hash_levels: config.hash_levels,
            deleted_hash_levels: config.deleted_hash_levels(),
            validator: Validator::new(config.filename_policy.clone()),
            public_dir,
            url,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_directory(&self) -> &str {
        &self.public_dir
    }

    pub fn root_url(&self) -> &str {
        &self.url
    }

    pub fn url_base(&self) -> Option<&str> {
        self.url_base.as_deref()
    }

    /// Returns true if names are spread over hashed sub-directories.
    pub fn is_hashed(&self) -> bool {
        self.hash_levels > 0
    }

    /// Key prefix of a zone. Unconfigured zones are an error, never a default.
    pub fn zone_path(&self, zone: Zone) -> RepoResult<&str> {
        match zone {
            Zone::Public => Ok(&self.public_dir),
            Zone::Temp => Ok(&self.temp_dir),
            Zone::Thumb => Ok(&self.thumb_dir),
            Zone::Deleted => self
                .deleted_dir
                .as_deref()
                .ok_or_else(|| RepoError::UnknownZone(zone.to_string())),
        }
    }

    /// Public URL prefix of a zone. The deleted zone never has one.
    pub fn zone_url(&self, zone: Zone) -> Option<String> {
        match zone {
            Zone::Public => Some(self.url.clone()),
            Zone::Temp => Some(format!("{}/temp", self.url)),
            Zone::Thumb => Some(self.thumb_url.clone()),
            Zone::Deleted => None,
        }
    }

    /// Physical key of `rel` inside `zone`. `rel` must already be validated.
    pub fn key(&self, zone: Zone, rel: &str) -> RepoResult<String> {
        Ok(format!("{}/{}", self.zone_path(zone)?, rel))
    }

    /// Locator of the repository root.
    pub fn repo_url(&self) -> String {
        format!("{}{}", SCHEME_PREFIX, self.name)
    }

    /// Builds the locator of `rel` inside `zone`.
    pub fn virtual_url(&self, zone: Zone, rel: &str) -> VirtualUrl {
        let encoded = rel
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        VirtualUrl(format!("{}/{}/{}", self.repo_url(), zone, encoded))
    }

    /// Takes a locator apart. Locators of other repositories are refused.
    pub fn parse(&self, url: &str) -> RepoResult<ResolvedUrl> {
        let rest = url
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| RepoError::MalformedLocator(format!("unknown protocol: {}", url)))?;

        let mut bits = rest.splitn(3, '/');
        let (repo, zone, rel) = match (bits.next(), bits.next(), bits.next()) {
            (Some(repo), Some(zone), Some(rel)) if !rel.is_empty() => (repo, zone, rel),
            _ => {
                return Err(RepoError::MalformedLocator(format!(
                    "expected repository, zone and path: {}",
                    url
                )))
            }
        };

        if repo != self.name {
            return Err(RepoError::ForeignRepository {
                expected: self.name.clone(),
                found: repo.to_string(),
            });
        }

        let zone: Zone = zone.parse()?;
        let rel = urlencoding::decode(rel)
            .map_err(|e| RepoError::MalformedLocator(format!("{}: {}", url, e)))?
            .into_owned();
        self.validator
            .validate(&rel)
            .map_err(|e| RepoError::MalformedLocator(format!("{}: {}", url, e)))?;

        let key = self.key(zone, &rel)?;
        Ok(ResolvedUrl { zone, rel, key })
    }

    /// Physical key a locator points at.
    pub fn resolve(&self, url: &str) -> RepoResult<String> {
        Ok(self.parse(url)?.key)
    }

    /// Hashed directory prefix for a name, e.g. `d/d4/` with two levels.
    pub fn hash_path(&self, name: &str) -> String {
        if self.hash_levels == 0 {
            return String::new();
        }
        let mut hasher = Md5::new();
        hasher.update(name.as_bytes());
        let hash = faster_hex::hex_string(&hasher.finalize());

        let mut path = String::new();
        for i in 1..=self.hash_levels.min(hash.len()) {
            path.push_str(&hash[..i]);
            path.push('/');
        }
        path
    }

    /// Directory prefix for a content-addressed deletion archive key, e.g.
    /// `s/z/a/` for `sza251lrxrc1jad41h5mgilp8nysje52.jpg`.
    pub fn deleted_hash_path(&self, key: &str) -> String {
        let mut path = String::new();
        for c in key.chars().take(self.deleted_hash_levels) {
            path.push(c);
            path.push('/');
        }
        path
    }

    /// Zone holding `key` and the path inside it. The most specific zone
    /// wins, since the temp and thumb roots sit inside the public one.
    pub fn locate<'k>(&self, key: &'k str) -> Option<(Zone, &'k str)> {
        Zone::ALL
            .iter()
            .filter_map(|&zone| {
                let root = self.zone_path(zone).ok()?;
                let rel = key.strip_prefix(root)?.strip_prefix('/')?;
                Some((root.len(), zone, rel))
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, zone, rel)| (zone, rel))
    }

    /// Replaces zone roots in `text` with zone names so messages do not
    /// disclose the storage layout.
    pub fn scrub(&self, text: &str) -> String {
        let mut pairs: Vec<(&str, &str)> = vec![
            (self.public_dir.as_str(), "public"),
            (self.temp_dir.as_str(), "temp"),
            (self.thumb_dir.as_str(), "thumb"),
        ];
        if let Some(deleted) = &self.deleted_dir {
            pairs.push((deleted.as_str(), "deleted"));
        }
        // longest root first, the temp root extends the public one
        pairs.retain(|(root, _)| !root.is_empty());
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        // single pass, so a substituted label is never matched again
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        'scan: while let Some(c) = rest.chars().next() {
            for (root, label) in &pairs {
                if let Some(tail) = rest.strip_prefix(root) {
                    out.push_str(label);
                    rest = tail;
                    continue 'scan;
                }
            }
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::new(&RepoConfig {
            name: "wiki".to_string(),
            bucket: "media".to_string(),
            directory: "images".to_string(),
            deleted_dir: Some("images/deleted".to_string()),
            url: Some("https://cdn.example.org/images".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_zone_paths_and_urls() {
        let r = resolver();
        assert_eq!(r.zone_path(Zone::Public).unwrap(), "images");
        assert_eq!(r.zone_path(Zone::Temp).unwrap(), "images/temp");
        assert_eq!(r.zone_path(Zone::Thumb).unwrap(), "images/thumb");
        assert_eq!(r.zone_path(Zone::Deleted).unwrap(), "images/deleted");

        assert_eq!(r.zone_url(Zone::Temp).unwrap(), "https://cdn.example.org/images/temp");
        assert_eq!(r.zone_url(Zone::Thumb).unwrap(), "https://cdn.example.org/images/thumb");
        assert_eq!(r.zone_url(Zone::Deleted), None);
    }

    #[test]
    fn test_unconfigured_deleted_zone() {
        let r = Resolver::new(&RepoConfig::default());
        assert!(matches!(r.zone_path(Zone::Deleted), Err(RepoError::UnknownZone(_))));
        assert_eq!(r.zone_url(Zone::Deleted), None);
        assert!(matches!(
            r.resolve("zrepo://local/deleted/a.jpg"),
            Err(RepoError::UnknownZone(_))
        ));
    }

    #[test]
    fn test_virtual_url_roundtrip() {
        let r = resolver();
        for zone in Zone::ALL {
            for rel in ["Cat.jpg", "a/ab/20240101120000!My file #1?.jpg", "ü/100%.png"] {
                let url = r.virtual_url(zone, rel);
                let expected = format!("{}/{}", r.zone_path(zone).unwrap(), rel);
                // '#' is illegal by default, the locator cannot resolve it
                if rel.contains('#') {
                    assert!(r.resolve(url.as_str()).is_err());
                    continue;
                }
                assert_eq!(r.resolve(url.as_str()).unwrap(), expected);
            }
        }
        let url = r.virtual_url(Zone::Temp, "a/ab/x y.jpg");
        assert_eq!(url.as_str(), "zrepo://wiki/temp/a/ab/x%20y.jpg");
    }

    #[test]
    fn test_resolve_rejections() {
        let r = resolver();
        assert!(matches!(
            r.resolve("mwrepo://wiki/public/a.jpg"),
            Err(RepoError::MalformedLocator(_))
        ));
        assert!(matches!(r.resolve("zrepo://wiki/public"), Err(RepoError::MalformedLocator(_))));
        assert!(matches!(r.resolve("zrepo://wiki/public/"), Err(RepoError::MalformedLocator(_))));
        assert!(matches!(
            r.resolve("zrepo://other/public/a.jpg"),
            Err(RepoError::ForeignRepository { .. })
        ));
        assert!(matches!(r.resolve("zrepo://wiki/attic/a.jpg"), Err(RepoError::UnknownZone(_))));
        assert!(matches!(
            r.resolve("zrepo://wiki/public/%2E%2E/deleted/a.jpg"),
            Err(RepoError::MalformedLocator(_))
        ));
    }

    #[test]
    fn test_hash_paths() {
        let r = resolver();
        let hash = faster_hex::hex_string(&Md5::digest(b"Cat.jpg"));
        assert_eq!(r.hash_path("Cat.jpg"), format!("{}/{}/", &hash[..1], &hash[..2]));
        assert!(r.is_hashed());
        assert_eq!(r.deleted_hash_path("sza251lrxrc1jad41h5mgilp8nysje52.jpg"), "s/z/");

        let flat = Resolver::new(&RepoConfig {
            hash_levels: 0,
            deleted_hash_levels: Some(3),
            ..Default::default()
        });
        assert_eq!(flat.hash_path("Cat.jpg"), "");
        assert!(!flat.is_hashed());
        assert_eq!(flat.deleted_hash_path("sza251.jpg"), "s/z/a/");
    }

    #[test]
    fn test_locate() {
        let r = resolver();
        assert_eq!(r.locate("images/a/ab/Cat.jpg"), Some((Zone::Public, "a/ab/Cat.jpg")));
        assert_eq!(r.locate("images/temp/x.jpg"), Some((Zone::Temp, "x.jpg")));
        assert_eq!(r.locate("images/deleted/s/z/k.jpg"), Some((Zone::Deleted, "s/z/k.jpg")));
        assert_eq!(r.locate("images/../x.jpg"), Some((Zone::Public, "../x.jpg")));
        assert_eq!(r.locate("imagesx/a.jpg"), None);
        assert_eq!(r.locate("elsewhere/a.jpg"), None);
    }

    #[test]
    fn test_scrub() {
        let r = resolver();
        assert_eq!(
            r.scrub("could not copy images/temp/a/ab/x.jpg to images/a/ab/x.jpg"),
            "could not copy temp/a/ab/x.jpg to public/a/ab/x.jpg"
        );
        assert_eq!(r.scrub("images/deleted/s/z/key.jpg"), "deleted/s/z/key.jpg");
    }

    #[test]
    fn test_scrub_does_not_rescan_labels() {
        let r = Resolver::new(&RepoConfig {
            directory: "temp".to_string(),
            ..Default::default()
        });
        assert_eq!(r.scrub("temp/temp/x.jpg"), "temp/x.jpg");
        assert_eq!(r.scrub("temp/x.jpg and temp/thumb/y.jpg"), "public/x.jpg and thumb/y.jpg");
        assert_eq!(r.scrub("é temp/ü"), "é public/ü");
    }
}
