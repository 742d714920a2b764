//! Image processing in pure Rust, statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` + EXIF orientation |
//! | **Animation detection** | `GifDecoder::into_frames` (stop at the second frame) |
//! | **Crop → resize** | `crop_imm` + `resize_exact` (Lanczos3), per frame for GIFs |
//! | **Rotate / greyscale** | `rotate90` / `rotate270` / `grayscale` |
//!
//! The module is split into:
//! - **Calculations**: The crop/resize planner, pure and unit testable
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Placeholder**: Blank images for mock mode

pub mod backend;
mod calculations;
pub mod params;
pub mod placeholder;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, Encoded, ImageBackend};
pub use calculations::{DerivativePlan, PlanError, plan_derivative};
pub use params::{CropRect, FrameMode, Operation, Quality, RenderParams, Rotation, SourceImage};
pub use rust_backend::RustBackend;
