// estimator.rs - Primary -> fallback dispatch
//
// estimate() never reports a primary failure: any primary error (including
// missing credentials) routes to the local fallback. The only hard error is
// an image the fallback itself cannot process.
//
// The primary slot holds the local MiDaS model when a model file is
// configured and loads, otherwise the remote service when credentials exist.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::midas::MidasBackend;
use super::remote::GeminiBackend;
use super::{DepthBackend, DepthField, Estimate, EstimationPath, fallback};
use crate::config::{LocalModelConfig, RemoteConfig};
use crate::error::{EstimationError, RemoteFailure};
use crate::image_asset::ImageAsset;

/// Whichever primary strategy the configuration selected
pub enum Primary {
    Remote(GeminiBackend),
    Local(MidasBackend),
}

impl Primary {
    pub fn name(&self) -> &'static str {
        match self {
            Primary::Remote(_) => "remote",
            Primary::Local(_) => "local_model",
        }
    }
}

impl DepthBackend for Primary {
    async fn estimate(&self, image: &ImageAsset) -> Result<DepthField, RemoteFailure> {
        match self {
            Primary::Remote(backend) => backend.estimate(image).await,
            Primary::Local(backend) => backend.estimate(image).await,
        }
    }
}

pub struct DepthEstimator<B = Primary> {
    primary: Option<B>,
}

impl DepthEstimator<Primary> {
    /// A configured model that fails to load is logged and skipped; without
    /// credentials the remote strategy is skipped outright
    pub fn from_config(remote: &RemoteConfig, local: &LocalModelConfig) -> Self {
        if local.model_path.is_some() {
            match MidasBackend::load(local) {
                Ok(backend) => return Self::with_primary(Primary::Local(backend)),
                Err(failure) => warn!(%failure, "local depth model unavailable"),
            }
        }
        match GeminiBackend::new(remote) {
            Ok(backend) => Self::with_primary(Primary::Remote(backend)),
            Err(RemoteFailure::MissingCredentials) => {
                info!("no remote credentials, depth estimation runs offline");
                Self::offline()
            }
            Err(failure) => {
                warn!(%failure, "remote estimator unavailable, depth estimation runs offline");
                Self::offline()
            }
        }
    }

    pub fn primary_name(&self) -> Option<&'static str> {
        self.primary.as_ref().map(Primary::name)
    }
}

impl<B: DepthBackend> DepthEstimator<B> {
    pub fn with_primary(backend: B) -> Self {
        Self { primary: Some(backend) }
    }

    pub fn offline() -> Self {
        Self { primary: None }
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub async fn estimate(&self, image: Arc<ImageAsset>) -> Result<Estimate, EstimationError> {
        let primary = match &self.primary {
            Some(backend) => backend.estimate(&image).await,
            None => Err(RemoteFailure::MissingCredentials),
        };

        match primary {
            Ok(field) => {
                info!(path = "primary", w = field.width(), h = field.height(), "depth estimated");
                return Ok(Estimate {
                    field,
                    path: EstimationPath::Primary,
                });
            }
            Err(RemoteFailure::MissingCredentials) => debug!("primary skipped"),
            Err(failure) => warn!(%failure, "primary depth estimation failed, using fallback"),
        }

        let field = tokio::task::spawn_blocking(move || fallback::estimate(&image))
            .await
            .map_err(|e| EstimationError::FallbackAborted(e.to_string()))??;
        info!(path = "fallback", w = field.width(), h = field.height(), "depth estimated");

        Ok(Estimate {
            field,
            path: EstimationPath::Fallback,
        })
    }
}
