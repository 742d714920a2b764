//! Blank stand-ins for originals that are missing on disk.
//!
//! With `mock_image` enabled, a derivative request for a record whose
//! original file is gone renders one of these instead, so development
//! databases work without the production image tree. Placeholders are
//! built in memory in the record's own type (and as a two-frame animation
//! for animated records) so the normal pipeline handles them unchanged.

use super::backend::BackendError;
use super::params::Quality;
use crate::model::ImageType;
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{Delay, DynamicImage, Frame, Rgba, RgbaImage};

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

const BLANK: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FRAME_DELAY_MS: u32 = 500;

/// Encoded blank image matching a record's type and animation flag.
pub fn blank(image_type: ImageType, animated: bool) -> Result<Vec<u8>, BackendError> {
    let canvas = RgbaImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, BLANK);
    let mut bytes = Vec::new();
    let failed = |e: image::ImageError| {
        BackendError::ProcessingFailed(format!("Failed to build placeholder: {e}"))
    };

    match (image_type, animated) {
        (ImageType::Gif, true) => {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.set_repeat(Repeat::Infinite).map_err(failed)?;
            let delay = Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1);
            let frames = [
                Frame::from_parts(canvas.clone(), 0, 0, delay),
                Frame::from_parts(canvas, 0, 0, delay),
            ];
            encoder.encode_frames(frames).map_err(failed)?;
        }
        (ImageType::Gif, false) => {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.encode_frame(Frame::new(canvas)).map_err(failed)?;
        }
        (ImageType::Jpg, _) => {
            let quality = Quality::default().value() as u8;
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
                .map_err(failed)?;
        }
        (ImageType::Png, _) => {
            DynamicImage::ImageRgba8(canvas)
                .write_with_encoder(PngEncoder::new(&mut bytes))
                .map_err(failed)?;
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::AnimationDecoder;
    use image::codecs::gif::GifDecoder;
    use std::io::Cursor;

    #[test]
    fn blank_decodes_with_placeholder_dimensions() {
        for ty in [ImageType::Jpg, ImageType::Png, ImageType::Gif] {
            let bytes = blank(ty, false).unwrap();
            let img = image::load_from_memory(&bytes).unwrap();
            assert_eq!(
                (img.width(), img.height()),
                (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT),
                "{ty}"
            );
        }
    }

    #[test]
    fn blank_format_matches_type() {
        assert_eq!(
            image::guess_format(&blank(ImageType::Png, false).unwrap()).unwrap(),
            image::ImageFormat::Png
        );
        assert_eq!(
            image::guess_format(&blank(ImageType::Jpg, false).unwrap()).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn animated_blank_has_two_frames() {
        let bytes = blank(ImageType::Gif, true).unwrap();
        let frames = GifDecoder::new(Cursor::new(bytes))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap();
        assert_eq!(frames.len(), 2);
    }
}
