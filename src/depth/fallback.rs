// fallback.rs - Deterministic local depth proxy
//
// Runs whenever the remote estimator is unavailable or fails, so it must work
// for any decodable image with no network. Pure function of the pixels:
// single-threaded, fixed iteration order, no randomness.
//
// Brighter surfaces are treated as closer (rooftops and canopy over roads and
// shadow in top-down shots), with edges as a secondary cue:
//   1. Rec.601 luminance
//   2. Sobel gradient magnitude
//   3. Bilateral smoothing of luminance
//   4. Blend smoothed luminance with gradient
//   5. Two-scale Gaussian blend
//   6. Min-max stretch (a flat image stops here at a constant 0.5)
//   7. Contrast-limited adaptive histogram equalization
//   8. Light Gaussian to remove tile seams

use ndarray::Array2;

use super::DepthField;
use crate::error::EstimationError;
use crate::image_asset::ImageAsset;

const BASE_WEIGHT: f32 = 0.7;
const EDGE_WEIGHT: f32 = 0.3;

const BILATERAL_RADIUS: isize = 3;
const BILATERAL_SIGMA_SPACE: f32 = 3.0;
const BILATERAL_SIGMA_RANGE: f32 = 0.3;

const FINE_SIGMA: f32 = 3.5;
const COARSE_SIGMA: f32 = 8.5;
const FINE_WEIGHT: f32 = 0.6;
const FINAL_SIGMA: f32 = 1.0;

const CLAHE_TILES: usize = 8;
const CLAHE_CLIP: f32 = 2.0;
const BINS: usize = 256;

pub fn estimate(image: &ImageAsset) -> Result<DepthField, EstimationError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EstimationError::InvalidInput("image has no pixels".into()));
    }
    Ok(DepthField::from_gray(depth_proxy(&image.luminance())))
}

/// Luminance (h, w) in [0, 1] -> depth (h, w) in [0, 1]
pub fn depth_proxy(luma: &Array2<f32>) -> Array2<f32> {
    let edges = sobel_magnitude(luma);
    let smooth = bilateral(luma, BILATERAL_RADIUS, BILATERAL_SIGMA_SPACE, BILATERAL_SIGMA_RANGE);
    let blended = smooth * BASE_WEIGHT + edges * EDGE_WEIGHT;

    let fine = gaussian_blur(&blended, FINE_SIGMA);
    let coarse = gaussian_blur(&blended, COARSE_SIGMA);
    let mut depth = fine * FINE_WEIGHT + coarse * (1.0 - FINE_WEIGHT);

    if !stretch(&mut depth) {
        return depth;
    }
    let equalized = clahe(&depth);
    gaussian_blur(&equalized, FINAL_SIGMA)
}

#[inline]
fn clamp_index(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

#[inline]
fn bin_of(v: f32) -> usize {
    ((v.clamp(0.0, 1.0) * (BINS - 1) as f32).round() as usize).min(BINS - 1)
}

/// 3x3 Sobel, normalized by its peak (all zero on a flat image)
fn sobel_magnitude(src: &Array2<f32>) -> Array2<f32> {
    let (h, w) = src.dim();
    let at = |y: isize, x: isize| src[[clamp_index(y, h), clamp_index(x, w)]];

    let mut out = Array2::zeros((h, w));
    let mut peak = 0.0f32;
    for y in 0..h as isize {
        for x in 0..w as isize {
            let gx = (at(y - 1, x + 1) + 2.0 * at(y, x + 1) + at(y + 1, x + 1))
                - (at(y - 1, x - 1) + 2.0 * at(y, x - 1) + at(y + 1, x - 1));
            let gy = (at(y + 1, x - 1) + 2.0 * at(y + 1, x) + at(y + 1, x + 1))
                - (at(y - 1, x - 1) + 2.0 * at(y - 1, x) + at(y - 1, x + 1));
            let m = (gx * gx + gy * gy).sqrt();
            out[[y as usize, x as usize]] = m;
            peak = peak.max(m);
        }
    }

    if peak > 0.0 {
        out.mapv_inplace(|v| v / peak);
    }
    out
}

/// Edge-preserving smoothing of a [0, 1] field. Range weights come from a
/// 256-entry table indexed by the quantized intensity difference.
pub(super) fn bilateral(src: &Array2<f32>, radius: isize, sigma_space: f32, sigma_range: f32) -> Array2<f32> {
    let (h, w) = src.dim();
    let r = radius;
    let side = (2 * r + 1) as usize;

    let spatial: Vec<f32> = (-r..=r)
        .flat_map(|dy| {
            (-r..=r).map(move |dx| {
                let d2 = (dx * dx + dy * dy) as f32;
                (-d2 / (2.0 * sigma_space * sigma_space)).exp()
            })
        })
        .collect();
    let range: Vec<f32> = (0..BINS)
        .map(|i| {
            let d = i as f32 / (BINS - 1) as f32;
            (-(d * d) / (2.0 * sigma_range * sigma_range)).exp()
        })
        .collect();

    let mut out = Array2::zeros((h, w));
    for y in 0..h as isize {
        for x in 0..w as isize {
            let center = src[[y as usize, x as usize]];
            let (mut sum, mut weight) = (0.0f32, 0.0f32);
            for dy in -r..=r {
                let sy = clamp_index(y + dy, h);
                for dx in -r..=r {
                    let v = src[[sy, clamp_index(x + dx, w)]];
                    let k = (dy + r) as usize * side + (dx + r) as usize;
                    let wgt = spatial[k] * range[bin_of((v - center).abs())];
                    sum += v * wgt;
                    weight += wgt;
                }
            }
            out[[y as usize, x as usize]] = sum / weight;
        }
    }
    out
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);
    kernel
}

/// Separable Gaussian with clamped edges
fn gaussian_blur(src: &Array2<f32>, sigma: f32) -> Array2<f32> {
    let (h, w) = src.dim();
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;

    let mut horizontal = Array2::zeros((h, w));
    for y in 0..h {
        for x in 0..w as isize {
            let mut acc = 0.0f32;
            for (i, k) in kernel.iter().enumerate() {
                acc += k * src[[y, clamp_index(x + i as isize - radius, w)]];
            }
            horizontal[[y, x as usize]] = acc;
        }
    }

    let mut out = Array2::zeros((h, w));
    for y in 0..h as isize {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (i, k) in kernel.iter().enumerate() {
                acc += k * horizontal[[clamp_index(y + i as isize - radius, h), x]];
            }
            out[[y as usize, x]] = acc;
        }
    }
    out
}

/// Min-max stretch to [0, 1]. A flat field becomes 0.5 everywhere and
/// false is returned.
fn stretch(values: &mut Array2<f32>) -> bool {
    let (min, max) = values
        .iter()
        .fold((f32::MAX, f32::MIN), |(mn, mx), &v| (mn.min(v), mx.max(v)));
    let range = max - min;
    if range < 1e-6 {
        values.fill(0.5);
        return false;
    }
    values.mapv_inplace(|v| (v - min) / range);
    true
}

/// Tile-wise histogram equalization with clipped histograms, blended
/// bilinearly between tile centers.
fn clahe(src: &Array2<f32>) -> Array2<f32> {
    let (h, w) = src.dim();
    let tile_h = h.div_ceil(CLAHE_TILES.min(h));
    let tile_w = w.div_ceil(CLAHE_TILES.min(w));
    let (tiles_y, tiles_x) = (h.div_ceil(tile_h), w.div_ceil(tile_w));

    let mut luts = vec![[0.0f32; BINS]; tiles_y * tiles_x];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0.0f32; BINS];
            let (y0, y1) = (ty * tile_h, ((ty + 1) * tile_h).min(h));
            let (x0, x1) = (tx * tile_w, ((tx + 1) * tile_w).min(w));
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[bin_of(src[[y, x]])] += 1.0;
                }
            }
            let count = ((y1 - y0) * (x1 - x0)) as f32;

            let limit = (CLAHE_CLIP * count / BINS as f32).max(1.0);
            let mut excess = 0.0f32;
            for b in hist.iter_mut() {
                if *b > limit {
                    excess += *b - limit;
                    *b = limit;
                }
            }
            let share = excess / BINS as f32;

            let lut = &mut luts[ty * tiles_x + tx];
            let mut acc = 0.0f32;
            for (b, out) in hist.iter().zip(lut.iter_mut()) {
                acc += b + share;
                *out = (acc / count).min(1.0);
            }
        }
    }

    let tile_coord = |p: usize, size: usize, tiles: usize| {
        let c = ((p as f32 + 0.5) / size as f32 - 0.5).clamp(0.0, (tiles - 1) as f32);
        let i0 = c as usize;
        (i0, (i0 + 1).min(tiles - 1), c - i0 as f32)
    };

    Array2::from_shape_fn((h, w), |(y, x)| {
        let bin = bin_of(src[[y, x]]);
        let (ty0, ty1, fy) = tile_coord(y, tile_h, tiles_y);
        let (tx0, tx1, fx) = tile_coord(x, tile_w, tiles_x);
        let at = |ty: usize, tx: usize| luts[ty * tiles_x + tx][bin];

        let top = at(ty0, tx0) * (1.0 - fx) + at(ty0, tx1) * fx;
        let bottom = at(ty1, tx0) * (1.0 - fx) + at(ty1, tx1) * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(h: usize, w: usize) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(y, x)| ((x + 2 * y) % 17) as f32 / 16.0)
    }

    #[test]
    fn output_matches_input_shape_and_range() {
        let depth = depth_proxy(&ramp(23, 41));
        assert_eq!(depth.dim(), (23, 41));
        assert!(depth.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
    }

    #[test]
    fn identical_input_gives_bit_identical_output() {
        let luma = ramp(32, 32);
        let a = depth_proxy(&luma);
        let b = depth_proxy(&luma);
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn flat_image_stays_flat() {
        let depth = depth_proxy(&Array2::from_elem((16, 16), 0.3));
        let first = depth[[0, 0]];
        assert!(depth.iter().all(|&v| (v - first).abs() < 1e-5));
    }

    #[test]
    fn brighter_region_reads_closer() {
        let luma = Array2::from_shape_fn((64, 64), |(y, x)| {
            if (20..44).contains(&x) && (20..44).contains(&y) { 0.9 } else { 0.1 }
        });
        let depth = depth_proxy(&luma);
        assert!(depth[[32, 32]] > depth[[2, 2]] + 0.2);
    }

    #[test]
    fn tiny_images_are_handled() {
        for (h, w) in [(1, 1), (1, 7), (5, 1), (3, 9)] {
            let depth = depth_proxy(&ramp(h, w));
            assert_eq!(depth.dim(), (h, w));
            assert!(depth.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn sobel_is_zero_on_flat_input() {
        let edges = sobel_magnitude(&Array2::from_elem((5, 5), 0.7));
        assert!(edges.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn gaussian_kernel_is_normalized() {
        let k = gaussian_kernel(2.0);
        assert_eq!(k.len(), 13);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}
