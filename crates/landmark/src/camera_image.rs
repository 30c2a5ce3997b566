//! CPU camera images and their conversion into an uploadable JPEG.
//!
//! Tracking engines usually hand out YUV frames in the sensor's native
//! orientation. Before analysis the frame is converted to RGB, rotated
//! upright and written to disk as a JPEG.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use image::{RgbImage, codecs::jpeg::JpegEncoder, imageops};

use crate::error::ScanError;

/// Pixel layout of a [`CameraImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Full-resolution Y plane followed by interleaved V/U at quarter resolution.
    Nv21,
    /// Packed 8-bit RGB.
    Rgb8,
}

/// A camera image copied out of the tracking engine.
#[derive(Debug, Clone)]
pub struct CameraImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Raw pixel bytes.
    pub data: Vec<u8>,
    /// Clockwise rotation needed to display the image upright (0, 90, 180 or 270).
    pub rotation_degrees: u32,
}

impl CameraImage {
    /// Expected length of `data` for the declared size and format.
    #[must_use]
    pub fn expected_len(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        match self.format {
            PixelFormat::Nv21 => pixels + 2 * chroma_len(self.width, self.height),
            PixelFormat::Rgb8 => pixels * 3,
        }
    }

    /// Convert to an upright RGB image.
    pub fn to_rgb(&self) -> Result<RgbImage, ScanError> {
        if self.data.len() < self.expected_len() {
            return Err(ScanError::InvalidImage {
                detail: format!(
                    "{}x{} {:?} needs {} bytes, got {}",
                    self.width,
                    self.height,
                    self.format,
                    self.expected_len(),
                    self.data.len()
                ),
            });
        }

        let rgb = match self.format {
            PixelFormat::Nv21 => nv21_to_rgb(self.width, self.height, &self.data),
            PixelFormat::Rgb8 => self.data[..self.expected_len()].to_vec(),
        };
        let image = RgbImage::from_raw(self.width, self.height, rgb).ok_or_else(|| {
            ScanError::InvalidImage {
                detail: "pixel buffer does not match dimensions".to_string(),
            }
        })?;

        rotate(&image, self.rotation_degrees)
    }

    /// Encode the upright image as JPEG bytes.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, ScanError> {
        let rgb = self.to_rgb()?;
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)?;
        Ok(bytes)
    }

    /// Encode the upright image as JPEG and write it to `path`.
    pub fn write_jpeg(&self, path: &Path, quality: u8) -> Result<(), ScanError> {
        let rgb = self.to_rgb()?;
        let mut writer = BufWriter::new(File::create(path)?);
        JpegEncoder::new_with_quality(&mut writer, quality).encode_image(&rgb)?;
        writer.flush()?;
        tracing::debug!(
            "Wrote {}x{} snapshot to {}",
            rgb.width(),
            rgb.height(),
            path.display()
        );
        Ok(())
    }
}

/// Bytes in one NV21 chroma plane (V or U) for the given size.
fn chroma_len(width: u32, height: u32) -> usize {
    width.div_ceil(2) as usize * height.div_ceil(2) as usize
}

/// Convert NV21 to packed RGB using full-range BT.601 coefficients.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names
)]
fn nv21_to_rgb(width: u32, height: u32, data: &[u8]) -> Vec<u8> {
    let width = width as usize;
    let height = height as usize;
    let chroma_stride = width.div_ceil(2) * 2;
    let (luma, chroma) = data.split_at(width * height);

    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        for col in 0..width {
            let y = f32::from(luma[row * width + col]);
            let offset = (row / 2) * chroma_stride + (col / 2) * 2;
            let v = f32::from(chroma[offset]) - 128.0;
            let u = f32::from(chroma[offset + 1]) - 128.0;

            let r = y + 1.402 * v;
            let g = y - 0.344_136 * u - 0.714_136 * v;
            let b = y + 1.772 * u;
            rgb.extend([r, g, b].map(|c| c.round().clamp(0.0, 255.0) as u8));
        }
    }
    rgb
}

/// Rotate clockwise by a multiple of 90 degrees.
fn rotate(image: &RgbImage, degrees: u32) -> Result<RgbImage, ScanError> {
    match degrees % 360 {
        0 => Ok(image.clone()),
        90 => Ok(imageops::rotate90(image)),
        180 => Ok(imageops::rotate180(image)),
        270 => Ok(imageops::rotate270(image)),
        other => Err(ScanError::InvalidImage {
            detail: format!("unsupported rotation {other}"),
        }),
    }
}
