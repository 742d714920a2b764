//! Derivative file naming and sharded directory layout.
//!
//! Every file the manager reads or writes lives at
//!
//! ```text
//! {prefix}/{hash[..n1]}/{hash[..n2]}/.../{hash}_{size}_{aspect}.{type}
//! ```
//!
//! With the default `2:8` sharding and prefix `/assets/images`:
//!
//! ```text
//! /assets/images/01/01234567/01234567890123456789012345678901_sm_1x1.jpg
//! ```
//!
//! The layout is relied on by whatever serves the files, so it is bit-exact.
//! Shard levels bound the number of entries per directory; the file name
//! alone already identifies the derivative uniquely.

use crate::config::ConfigError;
use crate::model::{ImageRecord, ImageType};
use crate::presets::ORIGINAL;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Largest accepted shard level.
pub const MAX_SHARD_LEVEL: u32 = 31;

/// Exact length of a record hash as accepted in request paths.
pub const HASH_LENGTH: usize = 32;

/// Ordered hash-prefix lengths, one per directory level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec(Vec<u32>);

impl ShardSpec {
    /// Validate a list of levels; each must be in `1..=31`.
    pub fn new(levels: Vec<u32>) -> Result<Self, ConfigError> {
        if levels.is_empty() {
            return Err(ConfigError::Validation(
                "file_levels must name at least one level".into(),
            ));
        }
        if let Some(bad) = levels.iter().find(|&&l| l == 0 || l > MAX_SHARD_LEVEL) {
            return Err(ConfigError::Validation(format!(
                "file_levels entries must be between 1 and {MAX_SHARD_LEVEL}, got {bad}"
            )));
        }
        Ok(Self(levels))
    }

    /// Parse the `n1:n2:...` form. Each part must be a canonical integer
    /// (no sign, no padding, no whitespace).
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let levels = spec
            .split(':')
            .map(|part| match part.parse::<u32>() {
                Ok(n) if n.to_string() == part => Ok(n),
                _ => Err(ConfigError::Validation(format!(
                    "invalid file_levels \"{spec}\": correct form is xx or xx:xx or xx:xx:xx"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(levels)
    }

    pub fn levels(&self) -> &[u32] {
        &self.0
    }
}

impl Default for ShardSpec {
    fn default() -> Self {
        Self(vec![2, 8])
    }
}

impl FromStr for ShardSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, level) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{level}")?;
        }
        Ok(())
    }
}

/// Directory (URL form, starting with the prefix) and file name of one derivative.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativePath {
    pub directory: String,
    pub filename: String,
}

impl DerivativePath {
    /// `"{directory}/{filename}"`.
    pub fn url(&self) -> String {
        format!("{}/{}", self.directory, self.filename)
    }

    /// Location on disk below `image_dir`.
    pub fn file_path(&self, image_dir: &Path) -> PathBuf {
        image_dir
            .join(self.directory.trim_start_matches('/'))
            .join(&self.filename)
    }
}

/// Compute the directory and file name for one derivative.
///
/// Total and injective over `(hash, size, aspect, type)` for the
/// alphanumeric names preset loading enforces
/// ([`check_preset_names`](crate::repository::check_preset_names)).
pub fn resolve_path(
    hash: &str,
    size: &str,
    aspect: &str,
    image_type: ImageType,
    prefix: &str,
    shards: &ShardSpec,
) -> DerivativePath {
    let mut directory = prefix.trim_end_matches('/').to_string();
    for &level in shards.levels() {
        directory.push('/');
        directory.push_str(hash.get(..level as usize).unwrap_or(hash));
    }
    DerivativePath {
        directory,
        filename: format!("{hash}_{size}_{aspect}.{image_type}"),
    }
}

/// Path resolution bound to one prefix and shard layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    prefix: String,
    shards: ShardSpec,
}

impl PathResolver {
    pub fn new(prefix: impl Into<String>, shards: ShardSpec) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { prefix, shards }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn shards(&self) -> &ShardSpec {
        &self.shards
    }

    pub fn resolve(&self, record: &ImageRecord, size: &str, aspect: &str) -> DerivativePath {
        resolve_path(
            &record.hash,
            size,
            aspect,
            record.image_type,
            &self.prefix,
            &self.shards,
        )
    }

    /// Path of the stored original.
    pub fn original(&self, record: &ImageRecord) -> DerivativePath {
        self.resolve(record, ORIGINAL, ORIGINAL)
    }

    /// Public URL of a derivative, optionally with a `?timestamp=` cache buster
    /// taken from the record's last modification.
    pub fn url_for(
        &self,
        record: &ImageRecord,
        size: &str,
        aspect: &str,
        cache_buster: bool,
    ) -> String {
        let url = self.resolve(record, size, aspect).url();
        if cache_buster {
            format!("{}?timestamp={}", url, record.last_modified_timestamp())
        } else {
            url
        }
    }

    /// Parse a request path produced by [`url_for`](Self::url_for) back into
    /// its parts. Returns `None` for anything that does not follow the layout,
    /// including shard directories that disagree with the hash.
    pub fn parse_request_path(&self, path: &str) -> Option<DerivativeRequest> {
        let path = path.split('?').next().unwrap_or(path);
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let mut segments = rest.strip_prefix('/')?.split('/');

        let mut shard_dirs = Vec::with_capacity(self.shards.levels().len());
        for _ in self.shards.levels() {
            shard_dirs.push(segments.next()?);
        }
        let filename = segments.next()?;
        if segments.next().is_some() {
            return None;
        }

        let request = parse_filename(filename)?;
        let shards_match = self
            .shards
            .levels()
            .iter()
            .zip(&shard_dirs)
            .all(|(&level, dir)| request.hash.get(..level as usize) == Some(*dir));
        shards_match.then_some(request)
    }
}

/// The parts of a derivative file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeRequest {
    pub hash: String,
    pub size: String,
    pub aspect: String,
    pub image_type: ImageType,
}

/// Whether `s` is a non-empty run of ASCII letters and digits, the only
/// characters allowed in path segments built from names.
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Parse `"{hash}_{size}_{aspect}.{type}"`.
fn parse_filename(filename: &str) -> Option<DerivativeRequest> {
    let (stem, ext) = filename.rsplit_once('.')?;
    let mut parts = stem.split('_');
    let (hash, size, aspect) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    if hash.len() != HASH_LENGTH || ![hash, size, aspect, ext].into_iter().all(is_token) {
        return None;
    }
    Some(DerivativeRequest {
        hash: hash.to_string(),
        size: size.to_string(),
        aspect: aspect.to_string(),
        image_type: ImageType::from_extension(ext)?,
    })
}

/// Write `bytes` to `path` through a temp file in the same directory, then
/// rename it into place. Readers see the old file or the new one, never a
/// partial write. Parent directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
