use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageEncoder, RgbaImage};

use crate::errors::{PilotError, PilotResult};
use crate::executor::channel::CommandChannel;
use crate::perception::traits::ScreenCapture;
use crate::perception::types::RawImage;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;
const MIN_JPEG_QUALITY: u8 = 10;
const QUALITY_STEP: u8 = 10;

/// Decodes PNG/JPEG bytes into an RGBA8 frame.
pub fn decode_image(bytes: &[u8]) -> PilotResult<RawImage> {
    let decoded = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = decoded.dimensions();
    Ok(RawImage {
        width,
        height,
        pixels: decoded.into_raw(),
    })
}

fn encode_jpeg(rgb: &image::RgbImage, quality: u8) -> PilotResult<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Encodes `image` as JPEG, lowering quality by 10 from `start_quality` while the
/// output exceeds `max_size_kb` and quality stays above 10. Returns standard base64.
pub fn encode_jpeg_base64(
    image: &RawImage,
    max_size_kb: usize,
    start_quality: u8,
) -> PilotResult<String> {
    let rgba = RgbaImage::from_raw(image.width, image.height, image.pixels.clone())
        .ok_or_else(|| {
            PilotError::Perception(format!(
                "pixel buffer does not match {}x{} RGBA",
                image.width, image.height
            ))
        })?;
    let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

    let mut quality = start_quality.clamp(MIN_JPEG_QUALITY, 100);
    let mut bytes = encode_jpeg(&rgb, quality)?;
    while bytes.len() / 1024 > max_size_kb && quality > MIN_JPEG_QUALITY {
        quality = quality.saturating_sub(QUALITY_STEP).max(MIN_JPEG_QUALITY);
        bytes = encode_jpeg(&rgb, quality)?;
    }

    tracing::debug!(quality, size_kb = bytes.len() / 1024, "screenshot encoded");
    Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
}

/// Screen capture through `screencap -p` on the privileged command channel.
pub struct ShellScreenCapture {
    channel: Arc<dyn CommandChannel>,
}

impl ShellScreenCapture {
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ScreenCapture for ShellScreenCapture {
    async fn capture(&self) -> PilotResult<RawImage> {
        let png = self
            .channel
            .exec_binary("screencap -p")
            .await
            .map_err(|e| PilotError::Perception(format!("screencap failed: {e}")))?;
        if png.is_empty() {
            return Err(PilotError::Perception("screencap returned no data".into()));
        }
        let frame = decode_image(&png)
            .map_err(|e| PilotError::Perception(format!("cannot decode screenshot: {e}")))?;
        tracing::debug!(width = frame.width, height = frame.height, "screenshot captured");
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_frame(width: u32, height: u32) -> RawImage {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..width * height {
            for _ in 0..3 {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                pixels.push((seed >> 16) as u8);
            }
            pixels.push(255);
        }
        RawImage { width, height, pixels }
    }

    #[test]
    fn encodes_valid_jpeg() {
        let frame = RawImage {
            width: 8,
            height: 8,
            pixels: vec![200; 8 * 8 * 4],
        };
        let b64 = encode_jpeg_base64(&frame, 500, DEFAULT_JPEG_QUALITY).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let back = decode_image(&bytes).unwrap();
        assert_eq!((back.width, back.height), (8, 8));
    }

    #[test]
    fn tight_budget_lowers_quality() {
        let frame = noise_frame(256, 256);
        let loose = encode_jpeg_base64(&frame, 10_000, DEFAULT_JPEG_QUALITY).unwrap();
        let tight = encode_jpeg_base64(&frame, 1, DEFAULT_JPEG_QUALITY).unwrap();
        assert!(tight.len() < loose.len());
    }

    #[test]
    fn mismatched_buffer_is_a_perception_error() {
        let frame = RawImage {
            width: 10,
            height: 10,
            pixels: vec![0; 3],
        };
        let err = encode_jpeg_base64(&frame, 100, DEFAULT_JPEG_QUALITY).unwrap_err();
        assert!(matches!(err, PilotError::Perception(_)));
    }
}
