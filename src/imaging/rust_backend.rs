//! Pure Rust codec backend over the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF) | `image::ImageReader` with guessed format |
//! | Orientation | `kamadak-exif` Orientation tag + `image` flips/rotations |
//! | Animated frames | `image::codecs::gif::GifDecoder::into_frames` |
//! | Crop / resize | `DynamicImage::crop_imm` / `resize_exact` (Lanczos3) |
//! | Encode | `JpegEncoder` (quality), `PngEncoder`, `GifEncoder` (infinite loop) |
//!
//! Stills and animations share one [`Canvas`] interface, so a chain of
//! [`Operation`]s is written once and the frame mode picks the canvas. Frames
//! of an animation are transformed in parallel with rayon, order preserved.

use super::backend::{BackendError, Dimensions, Encoded, ImageBackend};
use super::params::{CropRect, FrameMode, Operation, Quality, RenderParams, Rotation, SourceImage};
use crate::model::ImageType;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, Frame, ImageReader};
use rayon::prelude::*;
use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn processing(context: &str, err: impl std::fmt::Display) -> BackendError {
    BackendError::ProcessingFailed(format!("{context}: {err}"))
}

fn read_source(source: &SourceImage) -> Result<Cow<'_, [u8]>, BackendError> {
    match source {
        SourceImage::Path(path) => Ok(Cow::Owned(std::fs::read(path)?)),
        SourceImage::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
    }
}

/// Extract EXIF Orientation tag (1-8). Returns None if missing or invalid.
pub fn detect_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    (1..=8).contains(&orientation).then_some(orientation)
}

/// Undo an EXIF orientation so the pixels read upright.
fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Decode a still and apply its stored orientation.
fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, BackendError> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
        .map_err(|e| processing("Failed to decode image", e))?;
    Ok(match detect_exif_orientation(bytes) {
        Some(orientation) => apply_orientation(img, orientation),
        None => img,
    })
}

/// Decode every frame of a GIF, composited to full canvas size.
fn decode_frames(bytes: &[u8]) -> Result<Vec<Frame>, BackendError> {
    let decoder =
        GifDecoder::new(Cursor::new(bytes)).map_err(|e| processing("Failed to open GIF", e))?;
    decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| processing("Failed to extract GIF frames", e))
}

/// Pixel operations shared by stills and animations.
trait Canvas: Sized {
    fn crop(self, rect: CropRect) -> Self;
    fn resize(self, width: u32, height: u32) -> Self;
    fn rotate(self, rotation: Rotation) -> Self;
    fn greyscale(self) -> Self;
    fn dimensions(&self) -> (u32, u32);

    fn apply(self, operations: &[Operation]) -> Self {
        operations.iter().fold(self, |canvas, op| match *op {
            Operation::Crop(rect) => canvas.crop(rect),
            Operation::Resize { width, height } => canvas.resize(width, height),
            Operation::Rotate(rotation) => canvas.rotate(rotation),
            Operation::Greyscale => canvas.greyscale(),
        })
    }
}

/// A single decoded buffer.
struct Still(DynamicImage);

impl Canvas for Still {
    fn crop(self, rect: CropRect) -> Self {
        Self(self.0.crop_imm(rect.x, rect.y, rect.width, rect.height))
    }

    fn resize(self, width: u32, height: u32) -> Self {
        Self(self.0.resize_exact(width, height, FilterType::Lanczos3))
    }

    fn rotate(self, rotation: Rotation) -> Self {
        Self(match rotation {
            Rotation::Right => self.0.rotate90(),
            Rotation::Left => self.0.rotate270(),
        })
    }

    fn greyscale(self) -> Self {
        Self(self.0.grayscale())
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }
}

/// Ordered frames with their delays.
struct Animation(Vec<Frame>);

impl Animation {
    fn map_frames(self, f: impl Fn(Still) -> Still + Send + Sync) -> Self {
        Self(
            self.0
                .into_par_iter()
                .map(|frame| {
                    let delay = frame.delay();
                    let Still(img) = f(Still(DynamicImage::ImageRgba8(frame.into_buffer())));
                    Frame::from_parts(img.to_rgba8(), 0, 0, delay)
                })
                .collect(),
        )
    }
}

impl Canvas for Animation {
    fn crop(self, rect: CropRect) -> Self {
        self.map_frames(|s| s.crop(rect))
    }

    fn resize(self, width: u32, height: u32) -> Self {
        self.map_frames(|s| s.resize(width, height))
    }

    fn rotate(self, rotation: Rotation) -> Self {
        self.map_frames(|s| s.rotate(rotation))
    }

    fn greyscale(self) -> Self {
        self.map_frames(Still::greyscale)
    }

    fn dimensions(&self) -> (u32, u32) {
        self.0
            .first()
            .map(|f| f.buffer().dimensions())
            .unwrap_or((0, 0))
    }

    // One pass per frame instead of one per operation.
    fn apply(self, operations: &[Operation]) -> Self {
        self.map_frames(|s| s.apply(operations))
    }
}

fn encode_still(
    img: &DynamicImage,
    format: ImageType,
    quality: Quality,
) -> Result<Vec<u8>, BackendError> {
    let mut bytes = Vec::new();
    match format {
        ImageType::Jpg => {
            let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.value() as u8);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|e| processing("JPEG encode failed", e))?;
        }
        ImageType::Png => {
            img.write_with_encoder(PngEncoder::new(&mut bytes))
                .map_err(|e| processing("PNG encode failed", e))?;
        }
        ImageType::Gif => {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder
                .encode_frame(Frame::new(img.to_rgba8()))
                .map_err(|e| processing("GIF encode failed", e))?;
        }
    }
    Ok(bytes)
}

fn encode_animation(frames: Vec<Frame>) -> Result<Vec<u8>, BackendError> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut bytes, 10);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| processing("GIF encode failed", e))?;
        encoder
            .encode_frames(frames)
            .map_err(|e| processing("GIF encode failed", e))?;
    }
    Ok(bytes)
}

impl ImageBackend for RustBackend {
    fn identify(&self, source: &SourceImage, mode: FrameMode) -> Result<Dimensions, BackendError> {
        let bytes = read_source(source)?;
        let (width, height) = ImageReader::new(Cursor::new(bytes.as_ref()))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| processing("Failed to read dimensions", e))?;
        let quarter_turned = mode == FrameMode::Still
            && matches!(detect_exif_orientation(&bytes), Some(5..=8));
        Ok(if quarter_turned {
            Dimensions {
                width: height,
                height: width,
            }
        } else {
            Dimensions { width, height }
        })
    }

    fn exif_orientation(&self, path: &Path) -> Result<Option<u16>, BackendError> {
        let bytes = std::fs::read(path)?;
        Ok(detect_exif_orientation(&bytes))
    }

    fn is_animated(&self, path: &Path) -> Result<bool, BackendError> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        let decoder = GifDecoder::new(file).map_err(|e| processing("Failed to open GIF", e))?;
        let mut frames = decoder.into_frames();
        let mut count = 0;
        while count < 2 {
            match frames.next() {
                Some(frame) => {
                    frame.map_err(|e| processing("Failed to read GIF frame", e))?;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count > 1)
    }

    fn render(&self, params: &RenderParams) -> Result<Encoded, BackendError> {
        let bytes = read_source(&params.source)?;
        tracing::debug!(
            source = %params.source.describe(),
            mode = ?params.mode,
            operations = ?params.operations,
            "render"
        );

        match params.mode {
            FrameMode::Still => {
                let canvas = Still(decode_oriented(&bytes)?).apply(&params.operations);
                let (width, height) = canvas.dimensions();
                Ok(Encoded {
                    bytes: encode_still(&canvas.0, params.format, params.quality)?,
                    mime: params.format.mime(),
                    width,
                    height,
                })
            }
            FrameMode::Animated => {
                let canvas = Animation(decode_frames(&bytes)?).apply(&params.operations);
                let (width, height) = canvas.dimensions();
                Ok(Encoded {
                    bytes: encode_animation(canvas.0)?,
                    mime: ImageType::Gif.mime(),
                    width,
                    height,
                })
            }
        }
    }
}
