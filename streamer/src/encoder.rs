use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::camera::RawFrame;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("frame buffer holds {got} bytes, expected {expected} for {width}x{height} RGB")]
    BufferSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
    #[error("JPEG encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Compresses raw camera frames to JPEG.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn encode(&self, frame: &RawFrame) -> Result<Vec<u8>, EncodeError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.rgb.len() != expected {
            return Err(EncodeError::BufferSize {
                got: frame.rgb.len(),
                expected,
                width: frame.width,
                height: frame.height,
            });
        }
        let mut out = Vec::with_capacity(expected / 8);
        JpegEncoder::new_with_quality(&mut out, self.quality).encode(
            &frame.rgb,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }
}
