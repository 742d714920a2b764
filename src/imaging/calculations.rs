//! Pure crop and resize planning.
//!
//! All functions here are pure and testable without any I/O or images.
//! Planning stays in floating point; values are truncated to whole pixels
//! once, when a plan is turned into codec [`Operation`]s.

use super::params::{CropRect, Operation};
use crate::presets::{AspectRatio, MaxSize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Invalid source dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Centered crop box plus final resize dimensions, in floating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivativePlan {
    pub crop_x: f64,
    pub crop_y: f64,
    pub crop_width: f64,
    pub crop_height: f64,
    pub resize_width: f64,
    pub resize_height: f64,
}

/// Values this close below a whole pixel count as that pixel.
const PIXEL_EPSILON: f64 = 1e-6;

/// Truncate to whole pixels, absorbing float error such as `(w / h) * h`
/// landing just under `w`.
fn to_pixels(value: f64) -> u32 {
    (value + PIXEL_EPSILON) as u32
}

impl DerivativePlan {
    /// Crop box truncated to whole pixels.
    pub fn crop_rect(&self) -> CropRect {
        CropRect {
            x: to_pixels(self.crop_x),
            y: to_pixels(self.crop_y),
            width: to_pixels(self.crop_width),
            height: to_pixels(self.crop_height),
        }
    }

    /// Resize dimensions truncated to whole pixels.
    pub fn resize_dimensions(&self) -> (u32, u32) {
        (to_pixels(self.resize_width), to_pixels(self.resize_height))
    }

    /// `true` when truncation leaves an empty crop or output.
    pub fn is_degenerate(&self) -> bool {
        let (w, h) = self.resize_dimensions();
        self.crop_rect().is_empty() || w == 0 || h == 0
    }

    /// Crop then resize, as codec operations.
    pub fn operations(&self) -> Vec<Operation> {
        let (width, height) = self.resize_dimensions();
        vec![
            Operation::Crop(self.crop_rect()),
            Operation::Resize { width, height },
        ]
    }
}

/// Plan the crop box and resize dimensions for one derivative.
///
/// 1. The crop box is the largest centered box of the target aspect that
///    fits the source: full width when the target is wider than the source,
///    full height otherwise.
/// 2. Landscape targets (`aspect > 1`) are capped on width, everything else
///    on height. A [`MaxSize::Native`] cap is the source's own dimension.
///    The cap never upscales past the crop box.
///
/// A zero cap passes through as a zero-size output; callers decide whether
/// to reject it (see [`DerivativePlan::is_degenerate`]).
///
/// # Examples
/// ```
/// # use image_derivatives::imaging::plan_derivative;
/// # use image_derivatives::presets::{AspectRatio, MaxSize};
/// // 1920x1200 to a 100px square: crop the middle 1200x1200, scale to 100x100
/// let plan = plan_derivative(1920, 1200, AspectRatio::Ratio(1.0), MaxSize::Pixels(100)).unwrap();
/// assert_eq!(plan.crop_rect().x, 360);
/// assert_eq!(plan.resize_dimensions(), (100, 100));
/// ```
pub fn plan_derivative(
    orig_width: u32,
    orig_height: u32,
    target_aspect: AspectRatio,
    max_size: MaxSize,
) -> Result<DerivativePlan, PlanError> {
    if orig_height == 0 {
        return Err(PlanError::InvalidDimensions {
            width: orig_width,
            height: orig_height,
        });
    }

    let orig_w = orig_width as f64;
    let orig_h = orig_height as f64;
    let orig_aspect = orig_w / orig_h;

    let aspect = match target_aspect {
        AspectRatio::Ratio(r) => r,
        AspectRatio::Derive => orig_aspect,
    };

    let (crop_x, crop_y, crop_width, crop_height) = if aspect > orig_aspect {
        // Keep the width
        let height = orig_w / aspect;
        (0.0, (orig_h - height) / 2.0, orig_w, height)
    } else {
        // Keep the height
        let width = orig_h * aspect;
        ((orig_w - width) / 2.0, 0.0, width, orig_h)
    };

    let (resize_width, resize_height) = if aspect > 1.0 {
        let cap = match max_size {
            MaxSize::Pixels(px) => px as f64,
            MaxSize::Native => orig_w,
        };
        let width = cap.min(crop_width);
        (width, width / aspect)
    } else {
        let cap = match max_size {
            MaxSize::Pixels(px) => px as f64,
            MaxSize::Native => orig_h,
        };
        let height = cap.min(crop_height);
        (height * aspect, height)
    };

    Ok(DerivativePlan {
        crop_x,
        crop_y,
        crop_width,
        crop_height,
        resize_width,
        resize_height,
    })
}
