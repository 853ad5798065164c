// image_asset.rs - Decoded source photograph
//
// Source of truth for surface color and for the footprint every depth
// artifact is resampled to. Row 0 is the top of the image.

use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage, RgbaImage};
use ndarray::Array2;
use std::io::Cursor;

use crate::error::EstimationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorFormat {
    Rgb,
    Rgba,
}

impl ColorFormat {
    pub fn channels(self) -> usize {
        match self {
            ColorFormat::Rgb => 3,
            ColorFormat::Rgba => 4,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImageAsset {
    image: DynamicImage,
    format: ColorFormat,
}

impl ImageAsset {
    /// Decode PNG / JPEG / WebP bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, EstimationError> {
        let format = image::guess_format(bytes)
            .map_err(|e| EstimationError::InvalidInput(format!("unrecognized format: {e}")))?;
        let decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| EstimationError::InvalidInput(e.to_string()))?;
        Self::from_dynamic(decoded)
    }

    /// Grayscale and high bit-depth inputs are widened to 8-bit RGB(A)
    pub fn from_dynamic(image: DynamicImage) -> Result<Self, EstimationError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(EstimationError::InvalidInput(format!(
                "image has no pixels ({w}x{h})"
            )));
        }

        let (image, format) = match image {
            DynamicImage::ImageRgb8(_) => (image, ColorFormat::Rgb),
            DynamicImage::ImageRgba8(_) => (image, ColorFormat::Rgba),
            other if other.color().has_alpha() => {
                (DynamicImage::ImageRgba8(other.to_rgba8()), ColorFormat::Rgba)
            }
            other => (DynamicImage::ImageRgb8(other.to_rgb8()), ColorFormat::Rgb),
        };
        Ok(Self { image, format })
    }

    pub fn from_raw(
        width: u32,
        height: u32,
        format: ColorFormat,
        pixels: Vec<u8>,
    ) -> Result<Self, EstimationError> {
        let image = match format {
            ColorFormat::Rgb => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
            ColorFormat::Rgba => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        };
        let image = image.ok_or_else(|| {
            EstimationError::InvalidInput(format!(
                "pixel buffer does not match {width}x{height} {format:?}"
            ))
        })?;
        Self::from_dynamic(image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn aspect(&self) -> f32 {
        self.width() as f32 / self.height() as f32
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_bytes()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let p = self.image.get_pixel(x, y);
        [p[0], p[1], p[2]]
    }

    /// Nearest texel at texture coordinate (u, v), v = 0 at the top row
    pub fn sample_uv(&self, u: f32, v: f32) -> [u8; 3] {
        let x = (u.clamp(0.0, 1.0) * (self.width() - 1) as f32).round() as u32;
        let y = (v.clamp(0.0, 1.0) * (self.height() - 1) as f32).round() as u32;
        self.rgb(x, y)
    }

    /// Rec.601 luminance in [0, 1], shape (height, width)
    pub fn luminance(&self) -> Array2<f32> {
        let (w, h) = (self.width() as usize, self.height() as usize);
        Array2::from_shape_fn((h, w), |(y, x)| {
            let [r, g, b] = self.rgb(x as u32, y as u32);
            luma(r as f32, g as f32, b as f32) / 255.0
        })
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

/// Rec.601 luma weights
#[inline]
pub(crate) fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    #[test]
    fn garbage_bytes_are_invalid_input() {
        let err = ImageAsset::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
    }

    #[test]
    fn grayscale_is_widened_to_rgb() {
        let gray = GrayImage::from_pixel(3, 2, Luma([200]));
        let asset = ImageAsset::from_dynamic(DynamicImage::ImageLuma8(gray)).unwrap();
        assert_eq!(asset.format(), ColorFormat::Rgb);
        assert_eq!(asset.rgb(2, 1), [200, 200, 200]);
        assert_eq!(asset.pixels().len(), 3 * 2 * 3);
    }

    #[test]
    fn raw_buffer_must_match_dimensions() {
        assert!(ImageAsset::from_raw(2, 2, ColorFormat::Rgba, vec![0; 16]).is_ok());
        assert!(ImageAsset::from_raw(2, 2, ColorFormat::Rgba, vec![0; 12]).is_err());
        assert!(ImageAsset::from_raw(0, 0, ColorFormat::Rgb, vec![]).is_err());
    }

    #[test]
    fn png_round_trip_keeps_pixels() {
        let mut img = RgbImage::new(4, 3);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        let asset = ImageAsset::from_dynamic(DynamicImage::ImageRgb8(img)).unwrap();
        let decoded = ImageAsset::decode(&asset.encode_png().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.rgb(0, 0), [255, 0, 0]);
    }

    #[test]
    fn luminance_uses_top_row_first() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(1, 0, Rgb([255, 255, 255]));
        let asset = ImageAsset::from_dynamic(DynamicImage::ImageRgb8(img)).unwrap();
        let luma = asset.luminance();
        assert_eq!(luma.dim(), (2, 2));
        assert!((luma[[0, 1]] - 1.0).abs() < 1e-5);
        assert_eq!(luma[[1, 1]], 0.0);
    }
}
