// normalize.rs - Reconcile raw estimator output with the source image
//
// Order of operations:
//   1. Collapse channels to luminance (Rec.601 for color, luma for gray+alpha)
//   2. Flip bottom-up fields so row 0 is the top of the image
//   3. Bilinear resample to the image footprint
//   4. Replace NaN with 0 and clip to [0, 1]

use ndarray::{Array2, Axis, s};
use tracing::debug;

use super::{DepthField, DepthMap, RowOrder};
use crate::error::NormalizationError;
use crate::image_asset::{ImageAsset, luma};

pub fn normalize(field: &DepthField, image: &ImageAsset) -> Result<DepthMap, NormalizationError> {
    normalize_to(field, image.width() as usize, image.height() as usize)
}

pub fn normalize_to(
    field: &DepthField,
    width: usize,
    height: usize,
) -> Result<DepthMap, NormalizationError> {
    let (fw, fh) = (field.width(), field.height());
    if fw == 0 || fh == 0 {
        return Err(NormalizationError::EmptyField(fw, fh));
    }
    if width == 0 || height == 0 {
        return Err(NormalizationError::EmptyTarget(width, height));
    }

    let gray = collapse_channels(field)?;

    let gray = match field.row_order {
        RowOrder::TopDown => gray,
        RowOrder::BottomUp => {
            debug!("flipping bottom-up depth field to top-down");
            gray.slice(s![..;-1, ..]).to_owned()
        }
    };

    let mut depth = if (fw, fh) == (width, height) {
        gray
    } else {
        debug!(from_w = fw, from_h = fh, to_w = width, to_h = height, "resampling depth field");
        bilinear_resize(&gray, width, height)
    };

    depth.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) });

    Ok(DepthMap::from_normalized(depth))
}

fn collapse_channels(field: &DepthField) -> Result<Array2<f32>, NormalizationError> {
    let values = &field.values;
    match field.channels() {
        1 | 2 => Ok(values.index_axis(Axis(2), 0).to_owned()),
        3 | 4 => Ok(values.map_axis(Axis(2), |px| luma(px[0], px[1], px[2]))),
        n => Err(NormalizationError::ChannelCount(n)),
    }
}

/// Pixel-center aligned bilinear resize
fn bilinear_resize(src: &Array2<f32>, tw: usize, th: usize) -> Array2<f32> {
    let (sh, sw) = src.dim();
    let (sx, sy) = (sw as f32 / tw as f32, sh as f32 / th as f32);

    Array2::from_shape_fn((th, tw), |(y, x)| {
        let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, (sw - 1) as f32);
        let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, (sh - 1) as f32);
        let (x0, y0) = (fx as usize, fy as usize);
        let (x1, y1) = ((x0 + 1).min(sw - 1), (y0 + 1).min(sh - 1));
        let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);

        src[[y0, x0]] * (1.0 - tx) * (1.0 - ty)
            + src[[y0, x1]] * tx * (1.0 - ty)
            + src[[y1, x0]] * (1.0 - tx) * ty
            + src[[y1, x1]] * tx * ty
    })
}
