// pipeline.rs - Upload -> Ready state machine
//
//   Idle -> Estimating -> Normalizing -> Reconstructing -> Ready
//                |              |
//                +--> Failed <--+
//
// Every submission gets a fresh token from a monotonic counter. Stage results
// are applied through transition(), a pure function of (state, event); a
// result carrying any token other than the active one is stale and dropped.
// The newest submission therefore wins regardless of completion order.
//
// Published states go out through a watch channel, so a reader either sees
// the previous Ready mesh or the next one, never a half-built one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{LocalModelConfig, MeshConfig, RemoteConfig};
use crate::depth::{self, DepthBackend, DepthEstimator, DepthMap, EstimationPath, Primary};
use crate::error::{EstimationError, PipelineError, Result};
use crate::image_asset::ImageAsset;
use crate::mesh::{self, Mesh};

pub type Token = u64;

/// Immutable {image, depth map, estimation path} bundle for one submission
#[derive(Clone, Debug)]
pub struct ReconstructionResult {
    pub token: Token,
    pub image: Arc<ImageAsset>,
    pub depth: Arc<DepthMap>,
    pub path: EstimationPath,
}

#[derive(Debug)]
pub struct Reconstruction {
    pub result: ReconstructionResult,
    pub mesh: Arc<Mesh>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Undecodable or unsupported image
    InvalidInput,
    /// Depth could not be reconciled with the image
    Normalization,
    /// A worker task panicked or was cancelled
    Internal,
}

impl FailureKind {
    pub fn of(error: &PipelineError) -> Self {
        match error {
            PipelineError::Estimation(EstimationError::InvalidInput(_)) => FailureKind::InvalidInput,
            PipelineError::Normalization(_) => FailureKind::Normalization,
            PipelineError::Estimation(EstimationError::FallbackAborted(_)) | PipelineError::Worker(_) => {
                FailureKind::Internal
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum PipelineState {
    Idle,
    Estimating { token: Token },
    Normalizing { token: Token, path: EstimationPath },
    Reconstructing { token: Token, path: EstimationPath },
    Ready(Arc<Reconstruction>),
    Failed { token: Token, kind: FailureKind, message: String },
}

impl PipelineState {
    pub fn token(&self) -> Option<Token> {
        match self {
            PipelineState::Idle => None,
            PipelineState::Estimating { token }
            | PipelineState::Normalizing { token, .. }
            | PipelineState::Reconstructing { token, .. }
            | PipelineState::Failed { token, .. } => Some(*token),
            PipelineState::Ready(r) => Some(r.result.token),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Estimating { .. } => "estimating",
            PipelineState::Normalizing { .. } => "normalizing",
            PipelineState::Reconstructing { .. } => "reconstructing",
            PipelineState::Ready(_) => "ready",
            PipelineState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Ready(_) | PipelineState::Failed { .. })
    }

    pub fn reconstruction(&self) -> Option<&Arc<Reconstruction>> {
        match self {
            PipelineState::Ready(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum PipelineEvent {
    Submitted { token: Token },
    Estimated { token: Token, path: EstimationPath },
    Normalized { token: Token },
    Reconstructed(Arc<Reconstruction>),
    Failed { token: Token, error: PipelineError },
}

impl PipelineEvent {
    pub fn token(&self) -> Token {
        match self {
            PipelineEvent::Submitted { token }
            | PipelineEvent::Estimated { token, .. }
            | PipelineEvent::Normalized { token }
            | PipelineEvent::Failed { token, .. } => *token,
            PipelineEvent::Reconstructed(r) => r.result.token,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Transition {
    Advanced(PipelineState),
    /// Event belongs to a superseded submission
    Stale,
    /// Event does not apply to the current stage
    Ignored,
}

pub fn transition(state: &PipelineState, event: &PipelineEvent) -> Transition {
    use PipelineEvent as E;
    use PipelineState as S;

    let token = event.token();
    if let E::Submitted { .. } = event {
        return match state.token() {
            Some(active) if token <= active => Transition::Stale,
            _ => Transition::Advanced(S::Estimating { token }),
        };
    }
    if state.token() != Some(token) {
        return Transition::Stale;
    }

    match (state, event) {
        (S::Estimating { .. }, E::Estimated { path, .. }) => {
            Transition::Advanced(S::Normalizing { token, path: *path })
        }
        (S::Normalizing { path, .. }, E::Normalized { .. }) => {
            Transition::Advanced(S::Reconstructing { token, path: *path })
        }
        (S::Reconstructing { .. }, E::Reconstructed(r)) => Transition::Advanced(S::Ready(r.clone())),
        (
            S::Estimating { .. } | S::Normalizing { .. } | S::Reconstructing { .. },
            E::Failed { error, .. },
        ) => {
            let kind = FailureKind::of(error);
            let allowed = match kind {
                FailureKind::InvalidInput => matches!(state, S::Estimating { .. }),
                FailureKind::Normalization => matches!(state, S::Normalizing { .. }),
                FailureKind::Internal => true,
            };
            if allowed {
                Transition::Advanced(S::Failed {
                    token,
                    kind,
                    message: error.to_string(),
                })
            } else {
                Transition::Ignored
            }
        }
        _ => Transition::Ignored,
    }
}

// ============================================================================
// Driver
// ============================================================================

struct Shared<B> {
    estimator: DepthEstimator<B>,
    mesh_config: MeshConfig,
    state: watch::Sender<PipelineState>,
}

pub struct Pipeline<B: DepthBackend = Primary> {
    shared: Arc<Shared<B>>,
    counter: AtomicU64,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline<Primary> {
    pub fn from_config(remote: &RemoteConfig, local: &LocalModelConfig, mesh_config: MeshConfig) -> Self {
        Self::new(DepthEstimator::from_config(remote, local), mesh_config)
    }
}

impl<B: DepthBackend> Pipeline<B> {
    pub fn new(estimator: DepthEstimator<B>, mesh_config: MeshConfig) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            shared: Arc::new(Shared {
                estimator,
                mesh_config,
                state,
            }),
            counter: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.borrow().clone()
    }

    pub fn mesh_config(&self) -> &MeshConfig {
        &self.shared.mesh_config
    }

    /// Start a reconstruction for `bytes`, superseding any in-flight one.
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, bytes: Vec<u8>) -> Token {
        // Token order, Submitted order and handle order must all agree
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

        let token = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        info!(token, bytes = bytes.len(), "image submitted");
        self.shared.apply(PipelineEvent::Submitted { token });

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.run(token, bytes).await });

        if let Some(previous) = in_flight.replace(handle) {
            // Blocking stages already running still finish; their results go stale
            previous.abort();
        }
        token
    }

    /// Resolve once `token` reaches Ready or Failed, or has been superseded.
    /// Returns the state observed at that moment.
    pub async fn wait_for(&self, token: Token) -> PipelineState {
        let mut rx = self.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            let settled = match state.token() {
                Some(t) if t == token => state.is_terminal(),
                Some(t) => t > token,
                None => false,
            };
            if settled || rx.changed().await.is_err() {
                return state;
            }
        }
    }
}

impl<B: DepthBackend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        let in_flight = self.in_flight.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = in_flight.take() {
            handle.abort();
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))
}

impl<B: DepthBackend> Shared<B> {
    /// Apply one event; true when the state advanced
    fn apply(&self, event: PipelineEvent) -> bool {
        let mut advanced = false;
        self.state.send_if_modified(|state| match transition(state, &event) {
            Transition::Advanced(next) => {
                debug!(token = event.token(), from = state.name(), to = next.name(), "transition");
                *state = next;
                advanced = true;
                true
            }
            Transition::Stale => {
                debug!(token = event.token(), active = ?state.token(), "stale result discarded");
                false
            }
            Transition::Ignored => {
                warn!(token = event.token(), state = state.name(), "event ignored");
                false
            }
        });
        advanced
    }

    #[instrument(name = "reconstruct", skip(self, bytes))]
    async fn run(self: Arc<Self>, token: Token, bytes: Vec<u8>) {
        match self.stages(token, bytes).await {
            Ok(Some(reconstruction)) => {
                let path = reconstruction.result.path;
                let vertices = reconstruction.mesh.vertex_count();
                if self.apply(PipelineEvent::Reconstructed(reconstruction)) {
                    info!(path = path.as_str(), vertices, "reconstruction ready");
                }
            }
            Ok(None) => debug!("superseded before completion"),
            Err(error) => {
                if self.apply(PipelineEvent::Failed { token, error: error.clone() }) {
                    warn!(%error, "reconstruction failed");
                }
            }
        }
    }

    /// Runs every stage; Ok(None) once the submission has been superseded
    async fn stages(&self, token: Token, bytes: Vec<u8>) -> Result<Option<Arc<Reconstruction>>> {
        let image = Arc::new(blocking(move || ImageAsset::decode(&bytes)).await??);

        let estimate = self.estimator.estimate(Arc::clone(&image)).await?;
        let path = estimate.path;
        if !self.apply(PipelineEvent::Estimated { token, path }) {
            return Ok(None);
        }

        let img = Arc::clone(&image);
        let depth = blocking(move || depth::normalize(&estimate.field, &img)).await??;
        let depth = Arc::new(depth);
        if !self.apply(PipelineEvent::Normalized { token }) {
            return Ok(None);
        }

        let (img, map, config) = (Arc::clone(&image), Arc::clone(&depth), self.mesh_config);
        let mesh = blocking(move || mesh::build(img, &map, &config)).await?;

        Ok(Some(Arc::new(Reconstruction {
            result: ReconstructionResult {
                token,
                image,
                depth,
                path,
            },
            mesh: Arc::new(mesh),
        })))
    }
}
