//! Image records and preset catalogs.
//!
//! The manager only needs six things from storage, captured by
//! [`ImageRepository`]: look a record up by hash, list both preset
//! catalogs, and stage/remove/flush record changes.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryRepository`] keeps everything in process memory. `flush` is a
//!   no-op; used by tests and embedders that own their own storage.
//! - [`JsonRepository`] keeps a versioned JSON catalog file, loaded on open
//!   and rewritten atomically on `flush`. Staged changes are invisible on
//!   disk until then.
//!
//! ## Catalog format
//!
//! ```json
//! {
//!   "version": 1,
//!   "aspects": [{ "short_name": "or", "width": 0 }, { "short_name": "16x9", "width": 16, "height": 9 }],
//!   "sizes":   [{ "short_name": "or" }, { "short_name": "sm", "max_size": 320 }],
//!   "images":  { "<hash>": { "id": 1, "hash": "<hash>", "type": "jpg", ... } }
//! }
//! ```

use crate::model::{AspectPreset, ImageRecord, SizePreset};
use crate::paths::{is_token, write_atomic};
use crate::presets::ORIGINAL;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Version of the catalog file format.
const CATALOG_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported catalog version {found} (expected {CATALOG_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("Invalid preset name \"{name}\": only ASCII letters and digits are allowed")]
    InvalidPresetName { name: String },
}

/// Reject preset names that would break the `{hash}_{size}_{aspect}` layout.
pub fn check_preset_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), RepositoryError> {
    match names.into_iter().find(|name| !is_token(name)) {
        Some(name) => Err(RepositoryError::InvalidPresetName {
            name: name.to_string(),
        }),
        None => Ok(()),
    }
}

/// Storage the manager reads presets from and writes records to.
pub trait ImageRepository: Sync {
    fn find_image_by_hash(&self, hash: &str) -> Result<Option<ImageRecord>, RepositoryError>;

    fn find_all_aspect_presets(&self) -> Result<Vec<AspectPreset>, RepositoryError>;

    fn find_all_size_presets(&self) -> Result<Vec<SizePreset>, RepositoryError>;

    /// Insert or update a record, assigning an id on first persist.
    fn persist(&self, record: &mut ImageRecord) -> Result<(), RepositoryError>;

    fn remove(&self, record: &ImageRecord) -> Result<(), RepositoryError>;

    /// Make staged changes durable.
    fn flush(&self) -> Result<(), RepositoryError>;
}

/// Serialized catalog: presets plus every record keyed by hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub version: u32,
    #[serde(default)]
    pub aspects: Vec<AspectPreset>,
    #[serde(default)]
    pub sizes: Vec<SizePreset>,
    #[serde(default)]
    pub images: BTreeMap<String, ImageRecord>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self {
            version: CATALOG_VERSION,
            aspects: Vec::new(),
            sizes: Vec::new(),
            images: BTreeMap::new(),
        }
    }

    /// Catalog used when no file exists yet: the reserved `or` entries plus
    /// a few common presets.
    pub fn stock() -> Self {
        let aspect = |name: &str, width, height| AspectPreset {
            short_name: name.to_string(),
            width,
            height,
        };
        let size = |name: &str, max_size| SizePreset {
            short_name: name.to_string(),
            max_size,
        };
        Self {
            aspects: vec![
                aspect(ORIGINAL, 0, None),
                aspect("1x1", 1, Some(1)),
                aspect("4x3", 4, Some(3)),
                aspect("16x9", 16, Some(9)),
            ],
            sizes: vec![
                size(ORIGINAL, None),
                size("sm", Some(320)),
                size("md", Some(800)),
                size("lg", Some(1600)),
            ],
            ..Self::empty()
        }
    }

    fn persist(&mut self, record: &mut ImageRecord) {
        if record.id.is_none() {
            let next = self.images.values().filter_map(|r| r.id).max().unwrap_or(0) + 1;
            record.id = Some(next);
        }
        self.images.insert(record.hash.clone(), record.clone());
    }
}

fn lock(catalog: &Mutex<Catalog>) -> MutexGuard<'_, Catalog> {
    catalog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory repository.
#[derive(Debug)]
pub struct MemoryRepository {
    catalog: Mutex<Catalog>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(Catalog::empty())
    }
}

impl MemoryRepository {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
        }
    }

    pub fn with_presets(aspects: Vec<AspectPreset>, sizes: Vec<SizePreset>) -> Self {
        Self::new(Catalog {
            aspects,
            sizes,
            ..Catalog::empty()
        })
    }

    pub fn set_aspect_presets(&self, aspects: Vec<AspectPreset>) {
        lock(&self.catalog).aspects = aspects;
    }

    pub fn len(&self) -> usize {
        lock(&self.catalog).images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImageRepository for MemoryRepository {
    fn find_image_by_hash(&self, hash: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        Ok(lock(&self.catalog).images.get(hash).cloned())
    }

    fn find_all_aspect_presets(&self) -> Result<Vec<AspectPreset>, RepositoryError> {
        Ok(lock(&self.catalog).aspects.clone())
    }

    fn find_all_size_presets(&self) -> Result<Vec<SizePreset>, RepositoryError> {
        Ok(lock(&self.catalog).sizes.clone())
    }

    fn persist(&self, record: &mut ImageRecord) -> Result<(), RepositoryError> {
        lock(&self.catalog).persist(record);
        Ok(())
    }

    fn remove(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        lock(&self.catalog).images.remove(&record.hash);
        Ok(())
    }

    fn flush(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Repository backed by a JSON catalog file.
#[derive(Debug)]
pub struct JsonRepository {
    path: PathBuf,
    catalog: Mutex<Catalog>,
}

impl JsonRepository {
    /// Load the catalog at `path`, or start from [`Catalog::stock`] when the
    /// file does not exist yet. A corrupt or newer-version file is an error:
    /// unlike a cache, the catalog cannot be rebuilt.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let catalog = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let catalog: Catalog = serde_json::from_str(&content)?;
                if catalog.version != CATALOG_VERSION {
                    return Err(RepositoryError::UnsupportedVersion {
                        found: catalog.version,
                    });
                }
                check_preset_names(
                    catalog
                        .aspects
                        .iter()
                        .map(|a| a.short_name.as_str())
                        .chain(catalog.sizes.iter().map(|s| s.short_name.as_str())),
                )?;
                catalog
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Catalog::stock(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), images = catalog.images.len(), "catalog opened");
        Ok(Self {
            path,
            catalog: Mutex::new(catalog),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageRepository for JsonRepository {
    fn find_image_by_hash(&self, hash: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        Ok(lock(&self.catalog).images.get(hash).cloned())
    }

    fn find_all_aspect_presets(&self) -> Result<Vec<AspectPreset>, RepositoryError> {
        Ok(lock(&self.catalog).aspects.clone())
    }

    fn find_all_size_presets(&self) -> Result<Vec<SizePreset>, RepositoryError> {
        Ok(lock(&self.catalog).sizes.clone())
    }

    fn persist(&self, record: &mut ImageRecord) -> Result<(), RepositoryError> {
        lock(&self.catalog).persist(record);
        Ok(())
    }

    fn remove(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        lock(&self.catalog).images.remove(&record.hash);
        Ok(())
    }

    fn flush(&self) -> Result<(), RepositoryError> {
        let json = serde_json::to_vec_pretty(&*lock(&self.catalog))?;
        write_atomic(&self.path, &json)?;
        tracing::debug!(path = %self.path.display(), "catalog flushed");
        Ok(())
    }
}
