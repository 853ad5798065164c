// error.rs - Failure taxonomy
//
// Only EstimationError and NormalizationError can end a reconstruction.
// RemoteFailure never leaves the depth estimator: it is logged and the
// fallback strategy takes over.

use thiserror::Error;

/// The source image cannot be turned into a depth field at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimationError {
    #[error("Invalid input image: {0}")]
    InvalidInput(String),

    #[error("Fallback depth estimation aborted: {0}")]
    FallbackAborted(String),
}

/// Why the primary strategy (remote service or local model) did not produce
/// a depth field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    #[error("No remote credentials configured")]
    MissingCredentials,

    #[error("Remote request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication rejected (HTTP {0})")]
    Auth(u16),

    #[error("Remote service returned HTTP {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Response contained no image")]
    NoImage,

    #[error("Failed to encode request image: {0}")]
    Encode(String),

    #[error("Local depth model failed: {0}")]
    Model(String),
}

impl RemoteFailure {
    /// Connection-level failures and 5xx get one immediate re-attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteFailure::Transport(_) => true,
            RemoteFailure::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Depth field is empty: width={0}, height={1}")]
    EmptyField(usize, usize),

    #[error("Target dimensions are empty: width={0}, height={1}")]
    EmptyTarget(usize, usize),

    #[error("Unsupported depth channel count: {0}")]
    ChannelCount(usize),

    #[error("Depth buffer length {actual} does not match {expected} pixels")]
    BufferLength { expected: usize, actual: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Estimation(#[from] EstimationError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error("Pipeline worker failed: {0}")]
    Worker(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
