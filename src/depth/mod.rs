// depth/ - Depth estimation and normalization
//
// Raw estimator output (DepthField) may have any resolution, 1-4 channels and
// either row order. The normalizer turns it into a DepthMap: one channel,
// values in [0, 1] (1 = closest), row 0 = top, same footprint as the image.

pub mod fallback;
pub mod normalize;

#[cfg(not(target_arch = "wasm32"))]
mod estimator;
#[cfg(not(target_arch = "wasm32"))]
pub mod midas;
#[cfg(not(target_arch = "wasm32"))]
pub mod remote;

#[cfg(not(target_arch = "wasm32"))]
pub use estimator::{DepthEstimator, Primary};
pub use normalize::{normalize, normalize_to};

use image::{DynamicImage, GenericImageView, GrayImage};
use ndarray::{Array2, Array3, Axis, ShapeError};
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::{NormalizationError, RemoteFailure};
use crate::image_asset::ImageAsset;

/// Which strategy produced a depth field. Travels with the result for
/// observability only; nothing downstream branches on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationPath {
    Primary,
    Fallback,
}

impl EstimationPath {
    pub fn as_str(self) -> &'static str {
        match self {
            EstimationPath::Primary => "primary",
            EstimationPath::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOrder {
    /// Row 0 is the top of the image
    TopDown,
    /// Row 0 is the bottom of the image (GL texture convention)
    BottomUp,
}

/// Raw estimator output, shape (rows, cols, channels), values in [0, 1]
#[derive(Clone, Debug, PartialEq)]
pub struct DepthField {
    pub values: Array3<f32>,
    pub row_order: RowOrder,
}

impl DepthField {
    pub fn from_gray(values: Array2<f32>) -> Self {
        Self {
            values: values.insert_axis(Axis(2)),
            row_order: RowOrder::TopDown,
        }
    }

    /// Keeps the decoded channel layout; collapsing is the normalizer's job
    pub fn from_image(img: &DynamicImage) -> Result<Self, ShapeError> {
        let (w, h) = img.dimensions();
        let channels = img.color().channel_count() as usize;
        let (channels, data) = match channels {
            1 => (1, img.to_luma32f().into_raw()),
            2 => (2, img.to_luma_alpha32f().into_raw()),
            3 => (3, img.to_rgb32f().into_raw()),
            _ => (4, img.to_rgba32f().into_raw()),
        };
        let values = Array3::from_shape_vec((h as usize, w as usize, channels), data)?;
        Ok(Self {
            values,
            row_order: RowOrder::TopDown,
        })
    }

    pub fn with_row_order(mut self, row_order: RowOrder) -> Self {
        self.row_order = row_order;
        self
    }

    pub fn width(&self) -> usize {
        self.values.dim().1
    }

    pub fn height(&self) -> usize {
        self.values.dim().0
    }

    pub fn channels(&self) -> usize {
        self.values.dim().2
    }
}

/// Tagged estimator result
#[derive(Clone, Debug)]
pub struct Estimate {
    pub field: DepthField,
    pub path: EstimationPath,
}

/// Primary depth strategy (remote service or local model). Implementations
/// report every failure as a RemoteFailure; the estimator decides what to do
/// with it.
pub trait DepthBackend: Send + Sync + 'static {
    fn estimate(
        &self,
        image: &ImageAsset,
    ) -> impl Future<Output = Result<DepthField, RemoteFailure>> + Send;
}

// ============================================================================
// Normalized depth map
// ============================================================================

/// Aligned depth map: (height, width), values in [0, 1], no NaN, row 0 = top
#[derive(Clone, Debug, PartialEq)]
pub struct DepthMap {
    values: Array2<f32>,
}

impl DepthMap {
    /// Caller guarantees range, finiteness and row order
    pub(crate) fn from_normalized(values: Array2<f32>) -> Self {
        Self { values }
    }

    /// Rebuild a depth map from its exported 8-bit grayscale asset
    pub fn from_gray_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self, NormalizationError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 {
            return Err(NormalizationError::EmptyField(w, h));
        }
        if bytes.len() != w * h {
            return Err(NormalizationError::BufferLength {
                expected: w * h,
                actual: bytes.len(),
            });
        }
        let values = Array2::from_shape_fn((h, w), |(y, x)| bytes[y * w + x] as f32 / 255.0);
        Ok(Self { values })
    }

    pub fn width(&self) -> usize {
        self.values.dim().1
    }

    pub fn height(&self) -> usize {
        self.values.dim().0
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values[[y, x]]
    }

    /// Bilinear sample at texture coordinate (u, v), v = 0 at the top row.
    /// Uses the same (u, v) convention as ImageAsset::sample_uv.
    pub fn sample_uv(&self, u: f32, v: f32) -> f32 {
        let (w, h) = (self.width(), self.height());
        let fx = u.clamp(0.0, 1.0) * (w - 1) as f32;
        let fy = v.clamp(0.0, 1.0) * (h - 1) as f32;
        let (x0, y0) = (fx as usize, fy as usize);
        let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
        let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);

        self.get(x0, y0) * (1.0 - tx) * (1.0 - ty)
            + self.get(x1, y0) * tx * (1.0 - ty)
            + self.get(x0, y1) * (1.0 - tx) * ty
            + self.get(x1, y1) * tx * ty
    }

    pub fn mean(&self) -> f32 {
        self.values.mean().unwrap_or(0.0)
    }

    pub fn variance(&self) -> f32 {
        self.values.var(0.0)
    }

    /// Standalone 8-bit asset (0 = far, 255 = near)
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            image::Luma([(self.get(x as usize, y as usize) * 255.0).round() as u8])
        })
    }
}
