//! Error types for the audio pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::PipelineState;

/// Failures while obtaining or decoding input audio.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    /// Source bytes could not be obtained (file/network).
    #[error("Failed to load audio: {0}")]
    Load(String),

    /// Bytes were obtained but the decoder rejected them.
    #[error("Failed to decode audio: {0}")]
    Decode(String),
}

/// Failures on the controller side of the message bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// A request was issued before the executor announced readiness.
    #[error("Executor is not ready (request '{kind}' issued before ready notification)")]
    NotReady { kind: &'static str },

    #[error("Timeout after {}ms waiting for '{kind}'", .waited.as_millis())]
    Timeout { kind: &'static str, waited: Duration },

    /// The executor side of the channel hung up.
    #[error("Executor channel closed")]
    ExecutorGone,

    #[error("Unexpected response '{got}' (expected '{expected}')")]
    UnexpectedResponse { expected: &'static str, got: String },
}

/// Top-level error surfaced by [`crate::pipeline::AudioPipeline`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Operation is not allowed in the current pipeline state.
    #[error("'{operation}' not allowed while {state}")]
    State {
        operation: &'static str,
        state: PipelineState,
    },

    /// The executor handled the request but reported a failure.
    #[error("Executor failure: {0}")]
    Executor(String),
}

impl PipelineError {
    /// Whether the failure is a runtime condition the user may retry,
    /// as opposed to a caller defect.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PipelineError::Buffer(_) => true,
            PipelineError::Executor(_) => true,
            PipelineError::Bridge(BridgeError::Timeout { .. }) => true,
            PipelineError::Bridge(BridgeError::ExecutorGone) => true,
            PipelineError::Bridge(_) => false,
            PipelineError::State { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_decode_are_recoverable() {
        assert!(PipelineError::from(BufferError::Load("404".into())).is_recoverable());
        assert!(PipelineError::from(BufferError::Decode("bad frame".into())).is_recoverable());
    }

    #[test]
    fn test_precondition_is_not_recoverable() {
        let err = PipelineError::from(BridgeError::NotReady { kind: "loadAudio" });
        assert!(!err.is_recoverable());
        let err = PipelineError::State {
            operation: "get_buffer_view",
            state: PipelineState::Idle,
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = BridgeError::Timeout {
            kind: "getMetadata",
            waited: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Timeout after 250ms waiting for 'getMetadata'");

        let err = PipelineError::State {
            operation: "get_buffer_view",
            state: PipelineState::Loading,
        };
        assert_eq!(err.to_string(), "'get_buffer_view' not allowed while loading");
    }
}
