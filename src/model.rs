//! Records shared between the manager, the repository, and the path resolver.
//!
//! These types are serialized into the JSON catalog by
//! [`JsonRepository`](crate::repository::JsonRepository) and must stay
//! backwards compatible with catalogs already on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// File types an original may be stored as.
///
/// `jpeg` is normalized to [`ImageType::Jpg`] when parsed, so every JPEG
/// original ends up with a `.jpg` file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Jpg,
    Png,
    Gif,
}

impl ImageType {
    /// Parse a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Lowercase extension used in derivative file names.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unsupported image type \"{s}\""))
    }
}

/// One stored original image.
///
/// `hash` is the content-addressing key every file path is derived from; it
/// never changes once assigned. `width`/`height` describe the original as it
/// currently sits on disk and are rewritten by in-place crop and rotate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Assigned by the repository on first persist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub hash: String,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub original_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub animated: bool,
}

impl ImageRecord {
    /// A fresh record with a random hash and no dimensions yet.
    pub fn new(image_type: ImageType, original_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            hash: generate_hash(),
            image_type,
            width: 0,
            height: 0,
            caption: None,
            original_name: original_name.into(),
            created_at: now,
            last_modified_at: Some(now),
            animated: false,
        }
    }

    /// Seconds since the epoch of the last modification, `0` when unknown.
    pub fn last_modified_timestamp(&self) -> i64 {
        self.last_modified_at.map(|t| t.timestamp()).unwrap_or(0)
    }

    pub fn touch(&mut self) {
        self.last_modified_at = Some(Utc::now());
    }
}

/// 32 lowercase hex characters, alphanumeric and safe in URLs and file names.
pub fn generate_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Named aspect ratio row. A missing `height` means "use the source ratio".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectPreset {
    pub short_name: String,
    pub width: u32,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Named maximum dimension row. A missing `max_size` means "native".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizePreset {
    pub short_name: String,
    #[serde(default)]
    pub max_size: Option<u32>,
}
