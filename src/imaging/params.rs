//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [`ImageManager`](crate::manager::ImageManager)
//! (which decides what derivative to build) and the
//! [`backend`](super::backend) (which does the pixel work). This separation
//! allows swapping backends (e.g. for testing with a mock) without changing
//! manager logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1-100, default 90). Clamped on construction.
//! - [`CropRect`]: Integer crop box in source pixels.
//! - [`Rotation`]: Quarter turn left or right.
//! - [`Operation`]: One step of a transform chain.
//! - [`FrameMode`]: Whether a source is transformed as one still or frame by frame.
//! - [`RenderParams`]: Source, mode, operations, and output format for one render.

use crate::model::ImageType;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Crop box in source pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the box lies entirely inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

/// Quarter-turn rotation of an original.
///
/// `Right` turns the picture clockwise, `Left` counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Left,
    Right,
}

impl Rotation {
    /// Counter-clockwise degrees, the convention most codecs use.
    pub fn degrees(self) -> u32 {
        match self {
            Self::Left => 90,
            Self::Right => 270,
        }
    }
}

impl FromStr for Rotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(format!(
                "rotation has to be either left or right, \"{other}\" given"
            )),
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

/// One step of a transform chain, applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Crop(CropRect),
    /// Exact resize, aspect already decided by the caller.
    Resize { width: u32, height: u32 },
    Rotate(Rotation),
    Greyscale,
}

/// How a source is decoded and transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// One buffer, EXIF orientation applied.
    Still,
    /// Every frame of an animated GIF, durations kept, infinite loop.
    Animated,
}

impl FrameMode {
    pub fn for_animated(animated: bool) -> Self {
        if animated { Self::Animated } else { Self::Still }
    }
}

/// Where the encoded source comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceImage {
    Path(PathBuf),
    /// Encoded bytes already in memory (placeholders).
    Bytes(Vec<u8>),
}

impl SourceImage {
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }
}

/// Full specification of one decode → transform → encode pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub source: SourceImage,
    pub mode: FrameMode,
    pub operations: Vec<Operation>,
    pub format: ImageType,
    pub quality: Quality,
}
