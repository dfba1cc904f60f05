//! Image file encoding.
//!
//! Post-processed buffers are float images in `[0, 1]`; this module quantizes
//! them to the per-modality file encoding and writes them with the `image`
//! crate: 8/16-bit PNG or 32-bit float OpenEXR.

use crate::postprocess::CompositeImage;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb, Rgb32FImage, Rgba};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{width}x{height} image needs {expected} samples, got {actual}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("{format:?} cannot store {bit_depth:?} samples")]
    Unsupported { format: FileFormat, bit_depth: BitDepth },
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Container format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Png,
    OpenExr,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Png => "png",
            FileFormat::OpenExr => "exr",
        }
    }
}

/// Channel layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Bw,
    Rgb,
    Rgba,
}

impl ColorMode {
    pub fn channels(&self) -> usize {
        match self {
            ColorMode::Bw => 1,
            ColorMode::Rgb => 3,
            ColorMode::Rgba => 4,
        }
    }
}

/// Bits per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitDepth {
    Eight,
    Sixteen,
    Float32,
}

/// File encoding of one output image. Part of the renderer-global state that
/// a pass saves and restores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputSettings {
    pub format: FileFormat,
    pub color_mode: ColorMode,
    pub bit_depth: BitDepth,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self::png8_rgba()
    }
}

impl OutputSettings {
    /// 8-bit RGBA PNG, the scene default.
    pub fn png8_rgba() -> Self {
        Self {
            format: FileFormat::Png,
            color_mode: ColorMode::Rgba,
            bit_depth: BitDepth::Eight,
        }
    }

    /// 16-bit grayscale PNG.
    pub fn png16_bw() -> Self {
        Self {
            format: FileFormat::Png,
            color_mode: ColorMode::Bw,
            bit_depth: BitDepth::Sixteen,
        }
    }

    /// 16-bit RGB PNG.
    pub fn png16_rgb() -> Self {
        Self {
            format: FileFormat::Png,
            color_mode: ColorMode::Rgb,
            bit_depth: BitDepth::Sixteen,
        }
    }

    /// 32-bit float OpenEXR with the given layout.
    pub fn exr(color_mode: ColorMode) -> Self {
        Self {
            format: FileFormat::OpenExr,
            color_mode,
            bit_depth: BitDepth::Float32,
        }
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    pub fn is_float(&self) -> bool {
        self.bit_depth == BitDepth::Float32
    }
}

/// Quantize a unit value to 8 bits.
pub fn quantize_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Quantize a unit value to 16 bits.
pub fn quantize_u16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

// Rec. 709 luma for color sources written as grayscale.
fn luma(rgb: &[f32]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// Reshape the composite to the requested channel layout.
fn reshape(image: &CompositeImage, mode: ColorMode) -> Vec<f32> {
    let src = image.channels;
    let dst = mode.channels();
    let mut out = Vec::with_capacity(image.pixel_count() * dst);
    for px in image.data.chunks_exact(src) {
        match (src, mode) {
            (1, ColorMode::Bw) => out.push(px[0]),
            (_, ColorMode::Bw) => out.push(luma(px)),
            (1, ColorMode::Rgb) => out.extend_from_slice(&[px[0]; 3]),
            (1, ColorMode::Rgba) => out.extend_from_slice(&[px[0], px[0], px[0], 1.0]),
            (_, ColorMode::Rgb) => out.extend_from_slice(&px[..3]),
            (3, ColorMode::Rgba) => out.extend_from_slice(&[px[0], px[1], px[2], 1.0]),
            (_, ColorMode::Rgba) => out.extend_from_slice(&px[..4]),
        }
    }
    out
}

/// Encode `image` with `settings` and write it to `path`.
pub fn write_image(
    image: &CompositeImage,
    settings: &OutputSettings,
    path: &Path,
) -> Result<(), EncodeError> {
    let expected = image.pixel_count() * image.channels;
    if image.data.len() != expected {
        return Err(EncodeError::BufferSize {
            width: image.width,
            height: image.height,
            expected,
            actual: image.data.len(),
        });
    }

    let (w, h) = (image.width, image.height);
    let samples = reshape(image, settings.color_mode);
    let actual = samples.len();
    let size_error = || EncodeError::BufferSize {
        width: w,
        height: h,
        expected: image.pixel_count() * settings.color_mode.channels(),
        actual,
    };

    let dynamic = match (settings.format, settings.bit_depth) {
        (FileFormat::Png, BitDepth::Eight) => {
            let raw: Vec<u8> = samples.iter().copied().map(quantize_u8).collect();
            match settings.color_mode {
                ColorMode::Bw => DynamicImage::ImageLuma8(
                    ImageBuffer::<Luma<u8>, _>::from_raw(w, h, raw).ok_or_else(size_error)?,
                ),
                ColorMode::Rgb => DynamicImage::ImageRgb8(
                    ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, raw).ok_or_else(size_error)?,
                ),
                ColorMode::Rgba => DynamicImage::ImageRgba8(
                    ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, raw).ok_or_else(size_error)?,
                ),
            }
        }
        (FileFormat::Png, BitDepth::Sixteen) => {
            let raw: Vec<u16> = samples.iter().copied().map(quantize_u16).collect();
            match settings.color_mode {
                ColorMode::Bw => DynamicImage::ImageLuma16(
                    ImageBuffer::<Luma<u16>, _>::from_raw(w, h, raw).ok_or_else(size_error)?,
                ),
                ColorMode::Rgb => DynamicImage::ImageRgb16(
                    ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, raw).ok_or_else(size_error)?,
                ),
                ColorMode::Rgba => DynamicImage::ImageRgba16(
                    ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, raw).ok_or_else(size_error)?,
                ),
            }
        }
        (FileFormat::OpenExr, BitDepth::Float32) => match settings.color_mode {
            // The EXR encoder has no single-channel layout; store gray as RGB.
            ColorMode::Bw => {
                let rgb: Vec<f32> = samples.iter().flat_map(|v| [*v; 3]).collect();
                DynamicImage::ImageRgb32F(
                    Rgb32FImage::from_raw(w, h, rgb).ok_or_else(size_error)?,
                )
            }
            ColorMode::Rgb => DynamicImage::ImageRgb32F(
                Rgb32FImage::from_raw(w, h, samples).ok_or_else(size_error)?,
            ),
            ColorMode::Rgba => DynamicImage::ImageRgba32F(
                ImageBuffer::<Rgba<f32>, _>::from_raw(w, h, samples).ok_or_else(size_error)?,
            ),
        },
        (format, bit_depth) => return Err(EncodeError::Unsupported { format, bit_depth }),
    };

    let format = match settings.format {
        FileFormat::Png => ImageFormat::Png,
        FileFormat::OpenExr => ImageFormat::OpenExr,
    };
    dynamic.save_with_format(path, format)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gray(width: u32, height: u32, values: Vec<f32>) -> CompositeImage {
        CompositeImage {
            width,
            height,
            channels: 1,
            data: values,
        }
    }

    #[test]
    fn test_quantize_bounds() {
        assert_eq!(quantize_u8(-1.0), 0);
        assert_eq!(quantize_u8(2.0), 255);
        assert_eq!(quantize_u16(1.0), 65535);
        assert_eq!(quantize_u16(0.5), 32768);
    }

    #[test]
    fn test_normal_encode_decode_within_16bit_step() {
        let step = 1.0 / 65535.0;
        for i in 0..=200 {
            let v = -1.0 + i as f32 * 0.01;
            let stored = quantize_u16(v * 0.5 + 0.5);
            let decoded = stored as f32 / 65535.0 * 2.0 - 1.0;
            assert!((decoded - v).abs() <= step + 1e-6, "{} -> {}", v, decoded);
        }
    }

    #[test]
    fn test_write_png16_bw() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("depth.png");
        let image = gray(2, 1, vec![0.0, 1.0]);
        write_image(&image, &OutputSettings::png16_bw(), &path).unwrap();

        let loaded = image::open(&path).unwrap();
        assert_eq!(loaded.color(), image::ColorType::L16);
        let luma = loaded.to_luma16();
        assert_eq!(luma.get_pixel(0, 0)[0], 0);
        assert_eq!(luma.get_pixel(1, 0)[0], 65535);
    }

    #[test]
    fn test_write_png16_rgb_from_vector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("normal.png");
        let image = CompositeImage {
            width: 1,
            height: 1,
            channels: 3,
            data: vec![0.5, 1.0, 0.0],
        };
        write_image(&image, &OutputSettings::png16_rgb(), &path).unwrap();
        let loaded = image::open(&path).unwrap();
        assert_eq!(loaded.color(), image::ColorType::Rgb16);
        let px = loaded.to_rgb16().get_pixel(0, 0).0;
        assert_eq!(px, [32768, 65535, 0]);
    }

    #[test]
    fn test_write_png8_rgba() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lit.png");
        let image = CompositeImage {
            width: 1,
            height: 2,
            channels: 4,
            data: vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        };
        write_image(&image, &OutputSettings::png8_rgba(), &path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(loaded.get_pixel(0, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_write_exr_gray() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("depth.exr");
        let image = gray(2, 2, vec![0.0, 0.25, 0.5, 1.0]);
        write_image(&image, &OutputSettings::exr(ColorMode::Bw), &path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgb32f();
        assert!((loaded.get_pixel(1, 0).0[0] - 0.25).abs() < 1e-6);
        assert!((loaded.get_pixel(1, 1).0[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let dir = TempDir::new().unwrap();
        let image = gray(2, 2, vec![0.0; 3]);
        let err = write_image(&image, &OutputSettings::png16_bw(), &dir.path().join("x.png"));
        assert!(matches!(err, Err(EncodeError::BufferSize { expected: 4, .. })));
    }

    #[test]
    fn test_unsupported_combination() {
        let dir = TempDir::new().unwrap();
        let settings = OutputSettings {
            format: FileFormat::Png,
            color_mode: ColorMode::Bw,
            bit_depth: BitDepth::Float32,
        };
        let err = write_image(&gray(1, 1, vec![0.0]), &settings, &dir.path().join("x.png"));
        assert!(matches!(err, Err(EncodeError::Unsupported { .. })));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(OutputSettings::png16_bw().extension(), "png");
        assert_eq!(OutputSettings::exr(ColorMode::Rgb).extension(), "exr");
    }
}
