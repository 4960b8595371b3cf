use std::time::Duration;

use thiserror::Error;

/// Classifies why a backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Connection-level failure (DNS, TLS, refused, dropped).
    Transport,
    /// The caller-supplied deadline elapsed before a response arrived.
    Timeout,
    /// The API answered with a non-success status or an error payload.
    Api,
    /// The API answered 2xx but the body was not the expected shape.
    MalformedPayload,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorKind::Transport => write!(f, "transport failure"),
            BackendErrorKind::Timeout => write!(f, "timeout"),
            BackendErrorKind::Api => write!(f, "api error"),
            BackendErrorKind::MalformedPayload => write!(f, "malformed payload"),
        }
    }
}

/// Error taxonomy for the benchmarking core.
///
/// `Backend` and `UnsupportedCapability` are caught at the session boundary
/// and recorded as failed turns; `EvaluationParse` surfaces to the caller of
/// the evaluator so a malformed judge reply never turns into a fake score.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("backend {backend_id}: {kind} on prompt {prompt:?}: {message}")]
    Backend {
        backend_id: String,
        prompt: String,
        kind: BackendErrorKind,
        message: String,
    },

    #[error("backend {backend_id} is text-only but prompt {prompt:?} carries an image")]
    UnsupportedCapability { backend_id: String, prompt: String },

    #[error("judge output not parseable into five bounded dimension scores: {detail}")]
    EvaluationParse { detail: String },
}

impl BenchError {
    pub fn timeout(backend_id: &str, prompt: &str, deadline: Duration) -> Self {
        BenchError::Backend {
            backend_id: backend_id.to_string(),
            prompt: prompt.to_string(),
            kind: BackendErrorKind::Timeout,
            message: format!("no response within {:.1}s", deadline.as_secs_f64()),
        }
    }
}
