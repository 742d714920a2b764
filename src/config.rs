//! Manager configuration module.
//!
//! Handles loading, validating, and merging `config.toml` files. User files
//! are sparse: their values are merged on top of the stock defaults, so a
//! file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! image_dir = "public"          # Filesystem root URL paths resolve against
//! prefix = "/assets/images"     # URL and directory prefix for all images
//! driver = "raster"             # Codec driver (only "raster" is supported)
//! mock_image = false            # Serve placeholders for missing originals
//! file_levels = "2:8"           # Hash-prefix lengths per shard directory
//! quality = 90                  # Lossy encoding quality (1-100)
//! catalog = "catalog.json"      # JSON catalog, relative to image_dir
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::paths::{PathResolver, ShardSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The only codec driver this crate ships.
pub const SUPPORTED_DRIVER: &str = "raster";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Manager configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Directory the URL-form paths are resolved against on disk.
    pub image_dir: String,
    /// Prefix of every image URL and directory. A trailing `/` is ignored.
    pub prefix: String,
    pub driver: String,
    /// Substitute a blank placeholder when an original is missing.
    pub mock_image: bool,
    /// Sharding spec, `n1:n2:...`.
    pub file_levels: String,
    pub quality: u32,
    /// JSON catalog path. Relative paths are taken from `image_dir`.
    pub catalog: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            image_dir: "public".to_string(),
            prefix: "/assets/images".to_string(),
            driver: SUPPORTED_DRIVER.to_string(),
            mock_image: false,
            file_levels: "2:8".to_string(),
            quality: 90,
            catalog: "catalog.json".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver != SUPPORTED_DRIVER {
            return Err(ConfigError::Validation(format!(
                "driver must be \"{SUPPORTED_DRIVER}\", got \"{}\"",
                self.driver
            )));
        }
        if self.quality == 0 || self.quality > 100 {
            return Err(ConfigError::Validation("quality must be 1-100".into()));
        }
        self.shard_spec()?;
        Ok(())
    }

    pub fn shard_spec(&self) -> Result<ShardSpec, ConfigError> {
        ShardSpec::parse(&self.file_levels)
    }

    pub fn resolver(&self) -> Result<PathResolver, ConfigError> {
        Ok(PathResolver::new(self.prefix.clone(), self.shard_spec()?))
    }

    pub fn image_dir(&self) -> PathBuf {
        PathBuf::from(&self.image_dir)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.image_dir().join(&self.catalog)
    }
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// The documented stock file as a raw TOML value, the base layer for merging.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::from_str(stock_config_toml())?)
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ManagerConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ManagerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the TOML file at `path`.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ManagerConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    let config = resolve_config(base, overlay)?;
    tracing::debug!(path = %path.display(), ?config, "configuration loaded");
    Ok(config)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Image Derivatives Configuration
# ===============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Filesystem directory that image URLs are resolved against.
# Originals and derivatives are stored below <image_dir><prefix>/...
image_dir = "public"

# URL and directory prefix of every image. A trailing "/" is ignored.
prefix = "/assets/images"

# Codec driver. Only "raster" (the built-in pure Rust codec) is supported.
driver = "raster"

# When an original is missing on disk, render a blank placeholder of the
# same type instead of failing. Placeholder renders are never written to disk.
mock_image = false

# Directory sharding: hash-prefix lengths, one per directory level.
# "2:8" stores abcdef... under ab/abcdefgh/. Each level must be 1-31.
file_levels = "2:8"

# JPEG encoding quality (1 = worst, 100 = best).
quality = 90

# JSON catalog holding presets and image records, relative to image_dir.
catalog = "catalog.json"
"##
}
