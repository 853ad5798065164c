// config.rs - Tunables for estimation, reconstruction and the orbit camera
//
// Every struct deserializes with defaults for missing fields so an embedding
// application can hand over a partial JSON document.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

pub const DEFAULT_PROMPT: &str = "Convert this 2D image into a high-quality depth map. \
Lighter areas represent surfaces closer to the camera, darker areas represent surfaces \
farther from the camera. The output must be a grayscale image with exactly the same \
width and height as the input. Keep smooth transitions between depth levels and \
preserve important structural details and edges.";

// ============================================================================
// Remote depth estimation
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Absent or blank means the primary strategy is never attempted
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub prompt: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 30,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl RemoteConfig {
    /// Read `GEMINI_API_KEY` and the `RELIEF_REMOTE_*` overrides, after
    /// loading a `.env` file if one exists.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.api_key = std::env::var("GEMINI_API_KEY").ok();
        if let Ok(endpoint) = std::env::var("RELIEF_REMOTE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("RELIEF_REMOTE_MODEL") {
            config.model = model;
        }
        if let Some(secs) = std::env::var("RELIEF_REMOTE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_secs = secs;
        }
        config
    }

    pub fn credentials(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

// ============================================================================
// Local depth model
// ============================================================================

/// Square side the MiDaS small model expects
pub const DEFAULT_MODEL_INPUT: u32 = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelConfig {
    /// ONNX MiDaS export; when set it takes the primary slot instead of the
    /// remote service
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: DEFAULT_MODEL_INPUT,
        }
    }
}

impl LocalModelConfig {
    /// Read `RELIEF_MIDAS_MODEL` and `RELIEF_MIDAS_INPUT_SIZE`
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.model_path = std::env::var_os("RELIEF_MIDAS_MODEL")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        if let Some(size) = std::env::var("RELIEF_MIDAS_INPUT_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.input_size = size;
        }
        config
    }
}

// ============================================================================
// Mesh reconstruction
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplacementBias {
    /// Added verbatim to every vertex displacement
    Fixed(f32),
    /// Chosen so the mean displacement over all vertices is zero
    Centered,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Vertices per side (R x R grid)
    pub resolution: u32,
    /// Width of the plane along X; depth along Z follows the image aspect
    pub extent: f32,
    pub displacement_scale: f32,
    pub bias: DisplacementBias,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            resolution: 256,
            extent: 10.0,
            displacement_scale: 2.0,
            bias: DisplacementBias::Centered,
        }
    }
}

// ============================================================================
// Orbit camera
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub min_distance: f32,
    pub max_distance: f32,
    /// Fraction of the remaining motion consumed per 60 Hz frame, in (0, 1]
    pub damping: f32,
    /// Radians per pixel of drag
    pub rotate_speed: f32,
    /// World units per pixel of drag, per unit of camera distance
    pub pan_speed: f32,
    /// Log-distance change per scroll unit
    pub zoom_speed: f32,
    pub initial_distance: f32,
    pub initial_yaw: f32,
    pub initial_pitch: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            min_distance: 2.0,
            max_distance: 40.0,
            damping: 0.1,
            rotate_speed: 0.005,
            pan_speed: 0.0015,
            zoom_speed: 0.001,
            initial_distance: 14.0,
            initial_yaw: 0.0,
            initial_pitch: 0.9,
        }
    }
}
