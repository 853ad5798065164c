use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use relief_engine::depth::{DepthBackend, DepthField};
use relief_engine::error::RemoteFailure;
use relief_engine::image_asset::ImageAsset;

#[derive(Clone)]
pub enum Outcome {
    Fail(RemoteFailure),
    Field(DepthField),
    /// Image luminance, returned at the image's own size
    Luminance,
}

/// Stand-in for the remote estimator with scripted latency and outcome.
/// Latency can be keyed on image width so concurrent submissions finish in a
/// chosen order.
#[derive(Clone)]
pub struct ScriptedBackend {
    outcome: Outcome,
    delay: Duration,
    delay_for_width: Vec<(u32, Duration)>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            delay_for_width: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self::new(Outcome::Fail(RemoteFailure::Status(503)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_delay_for_width(mut self, width: u32, delay: Duration) -> Self {
        self.delay_for_width.push((width, delay));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl DepthBackend for ScriptedBackend {
    async fn estimate(&self, image: &ImageAsset) -> Result<DepthField, RemoteFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .delay_for_width
            .iter()
            .find(|(w, _)| *w == image.width())
            .map(|(_, d)| *d)
            .unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match &self.outcome {
            Outcome::Fail(failure) => Err(failure.clone()),
            Outcome::Field(field) => Ok(field.clone()),
            Outcome::Luminance => Ok(DepthField::from_gray(image.luminance())),
        }
    }
}
