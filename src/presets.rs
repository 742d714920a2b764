//! Named aspect and size presets.
//!
//! Both catalogs are read from the repository the first time they are
//! needed and then kept for the lifetime of the owning
//! [`ImageManager`](crate::manager::ImageManager). They are never refreshed:
//! if presets change in the catalog, build a new manager.

use crate::model::{AspectPreset, SizePreset};
use crate::repository::{ImageRepository, RepositoryError, check_preset_names};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Reserved preset name meaning "the original", for both size and aspect.
pub const ORIGINAL: &str = "or";

/// Target aspect ratio of a preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AspectRatio {
    /// Width divided by height.
    Ratio(f64),
    /// Use the source image's own ratio.
    Derive,
}

impl From<&AspectPreset> for AspectRatio {
    fn from(preset: &AspectPreset) -> Self {
        match preset.height {
            Some(height) => Self::Ratio(preset.width as f64 / height as f64),
            None => Self::Derive,
        }
    }
}

/// Maximum dimension of a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxSize {
    Pixels(u32),
    /// Use the source's own dimension, uncapped.
    Native,
}

impl From<&SizePreset> for MaxSize {
    fn from(preset: &SizePreset) -> Self {
        match preset.max_size {
            Some(px) => Self::Pixels(px),
            None => Self::Native,
        }
    }
}

/// Lazily loaded, per-manager cache of both preset catalogs.
#[derive(Debug, Default)]
pub struct PresetRegistry {
    aspects: OnceLock<BTreeMap<String, AspectRatio>>,
    sizes: OnceLock<BTreeMap<String, MaxSize>>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aspect presets by short name.
    pub fn aspects(
        &self,
        repository: &impl ImageRepository,
    ) -> Result<&BTreeMap<String, AspectRatio>, RepositoryError> {
        if let Some(aspects) = self.aspects.get() {
            return Ok(aspects);
        }
        let loaded = aspect_map(&repository.find_all_aspect_presets()?)?;
        tracing::debug!(count = loaded.len(), "aspect presets loaded");
        Ok(self.aspects.get_or_init(|| loaded))
    }

    /// Size presets by short name.
    pub fn sizes(
        &self,
        repository: &impl ImageRepository,
    ) -> Result<&BTreeMap<String, MaxSize>, RepositoryError> {
        if let Some(sizes) = self.sizes.get() {
            return Ok(sizes);
        }
        let loaded = size_map(&repository.find_all_size_presets()?)?;
        tracing::debug!(count = loaded.len(), "size presets loaded");
        Ok(self.sizes.get_or_init(|| loaded))
    }
}

fn aspect_map(
    presets: &[AspectPreset],
) -> Result<BTreeMap<String, AspectRatio>, RepositoryError> {
    check_preset_names(presets.iter().map(|p| p.short_name.as_str()))?;
    Ok(presets
        .iter()
        .map(|p| (p.short_name.clone(), AspectRatio::from(p)))
        .collect())
}

fn size_map(presets: &[SizePreset]) -> Result<BTreeMap<String, MaxSize>, RepositoryError> {
    check_preset_names(presets.iter().map(|p| p.short_name.as_str()))?;
    Ok(presets
        .iter()
        .map(|p| (p.short_name.clone(), MaxSize::from(p)))
        .collect())
}

/// Comma-separated preset names, for error messages.
pub struct NameList<'a, V>(pub &'a BTreeMap<String, V>);

impl<V> fmt::Display for NameList<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.keys().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}
