// midas.rs - Local MiDaS depth model (ONNX Runtime)
//
// Primary strategy for hosts that ship a model file instead of remote
// credentials. Raw model output is relative inverse depth (larger = nearer);
// it is min-max stretched to [0, 1], then lightly smoothed with an
// edge-preserving 5x5 bilateral pass. Resampling to the image footprint is
// left to the normalizer like any other estimator output.

use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array2, Array4, ArrayViewD};
use ort::session::Session;
use ort::value::Value;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

use super::{DepthBackend, DepthField, fallback};
use crate::config::LocalModelConfig;
use crate::error::RemoteFailure;
use crate::image_asset::ImageAsset;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

const MIN_INPUT: u32 = 32;

const SMOOTH_RADIUS: isize = 2;
const SMOOTH_SIGMA_SPACE: f32 = 75.0;
const SMOOTH_SIGMA_RANGE: f32 = 0.1;

pub struct MidasBackend {
    // Session::run needs &mut
    session: Arc<Mutex<Session>>,
    input_name: String,
    input_size: u32,
    model_path: PathBuf,
}

impl MidasBackend {
    pub fn load(config: &LocalModelConfig) -> Result<Self, RemoteFailure> {
        let path = config
            .model_path
            .as_deref()
            .ok_or_else(|| RemoteFailure::Model("no model path configured".into()))?;
        if !path.is_file() {
            return Err(RemoteFailure::Model(format!("model not found at {}", path.display())));
        }

        let session = Session::builder()
            .map_err(model_error)?
            .commit_from_file(path)
            .map_err(model_error)?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "image".into());
        info!(model = %path.display(), input = %input_name, "local depth model loaded");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name,
            input_size: config.input_size.max(MIN_INPUT),
            model_path: path.to_path_buf(),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl DepthBackend for MidasBackend {
    #[instrument(name = "midas_depth", skip_all, fields(w = image.width(), h = image.height()))]
    async fn estimate(&self, image: &ImageAsset) -> Result<DepthField, RemoteFailure> {
        let input = input_tensor(image.as_dynamic(), self.input_size);
        let session = Arc::clone(&self.session);
        let input_name = self.input_name.clone();

        let depth = tokio::task::spawn_blocking(move || infer(&session, input_name, input))
            .await
            .map_err(model_error)??;
        debug!(w = depth.dim().1, h = depth.dim().0, "model depth produced");
        Ok(DepthField::from_gray(depth))
    }
}

fn model_error(e: impl Display) -> RemoteFailure {
    RemoteFailure::Model(e.to_string())
}

fn infer(session: &Mutex<Session>, input_name: String, input: Array4<f32>) -> Result<Array2<f32>, RemoteFailure> {
    let value = Value::from_array(input).map_err(model_error)?;
    let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
    let outputs = session
        .run(ort::inputs![input_name => value])
        .map_err(model_error)?;
    let raw = outputs[0].try_extract_array::<f32>().map_err(model_error)?;
    output_to_depth(raw)
}

/// NCHW, resized to size x size, ImageNet-normalized RGB
pub(crate) fn input_tensor(image: &DynamicImage, size: u32) -> Array4<f32> {
    let rgb = image.resize_exact(size, size, FilterType::Lanczos3).to_rgb8();
    Array4::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
        let p = rgb.get_pixel(x as u32, y as u32);
        (p[c] as f32 / 255.0 - MEAN[c]) / STD[c]
    })
}

/// (1, 1, h, w), (1, h, w) or (h, w) inverse depth -> (h, w) in [0, 1].
/// A flat prediction carries no depth and comes back all zero.
pub(crate) fn output_to_depth(raw: ArrayViewD<'_, f32>) -> Result<Array2<f32>, RemoteFailure> {
    let (h, w) = match raw.shape() {
        [1, 1, h, w] | [1, h, w] | [h, w] => (*h, *w),
        other => return Err(RemoteFailure::Model(format!("unexpected output shape {other:?}"))),
    };
    if h == 0 || w == 0 {
        return Err(RemoteFailure::Model("empty model output".into()));
    }

    let values: Vec<f32> = raw.iter().copied().collect();
    let mut depth = Array2::from_shape_vec((h, w), values).map_err(model_error)?;

    let (lo, hi) = depth
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !(hi - lo > 1e-5) {
        depth.fill(0.0);
        return Ok(depth);
    }
    let range = hi - lo;
    depth.mapv_inplace(|v| if v.is_finite() { (v - lo) / range } else { 0.0 });

    Ok(fallback::bilateral(&depth, SMOOTH_RADIUS, SMOOTH_SIGMA_SPACE, SMOOTH_SIGMA_RANGE))
}
