//! Decoded frames and their JPEG boundary encoding.

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Local};
use image::ImageEncoder;

/// JPEG quality for streamed frames.
pub const STREAM_JPEG_QUALITY: u8 = 80;
/// JPEG quality for snapshots and session stills.
pub const STILL_JPEG_QUALITY: u8 = 90;

/// A decoded RGB frame (width x height x 3) with its capture timestamp.
///
/// Frames are ephemeral: they live for the duration of one streaming part or
/// one snapshot response unless explicitly persisted by `storage`.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Local::now(),
        }
    }

    /// Encode to JPEG. This is the transmission boundary; capture code never
    /// deals in encoded images.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        ensure!(
            self.data.len() == (self.width * self.height * 3) as usize,
            "frame buffer is {} bytes, expected {}x{}x3",
            self.data.len(),
            self.width,
            self.height
        );
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
            .write_image(
                &self.data,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("encode jpeg")?;
        Ok(out)
    }
}
