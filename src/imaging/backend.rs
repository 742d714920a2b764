//! Image codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the whole codec surface the manager needs:
//! identify, read the EXIF orientation, detect animation, and render (decode,
//! transform, encode) one source.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Everything is statically linked into the binary.

use super::params::{FrameMode, RenderParams, SourceImage};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// An encoded image held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Trait for image codec backends.
///
/// Every backend must implement all four operations so the manager stays
/// backend-agnostic.
pub trait ImageBackend: Sync {
    /// Dimensions as the manager sees them: after EXIF auto-orientation for
    /// stills, the logical screen size for animations.
    fn identify(&self, source: &SourceImage, mode: FrameMode) -> Result<Dimensions, BackendError>;

    /// Raw EXIF Orientation tag (1-8), `None` when absent or unreadable.
    fn exif_orientation(&self, path: &Path) -> Result<Option<u16>, BackendError>;

    /// Whether the file is a GIF with more than one frame.
    fn is_animated(&self, path: &Path) -> Result<bool, BackendError>;

    /// Decode the source, apply the operations in order (per frame for
    /// [`FrameMode::Animated`]), and encode.
    fn render(&self, params: &RenderParams) -> Result<Encoded, BackendError>;
}
