//! Wire messages exchanged between the controller and the executor.

use std::fmt;

use uuid::Uuid;

use crate::analysis::{DerivedMetric, MetricValue};
use crate::audio::{AudioBufferSetup, AudioMetadata, SharedBytes};

/// Opaque token pairing a request with its response.
pub type CorrelationId = Uuid;

/// Notification sent once by the executor when it can take requests.
pub const READY_KIND: &str = "ready";

/// Response kind for requests the executor could not route.
pub const ERROR_KIND: &str = "error";

/// Registry of operations both sides agree on.
///
/// Each action has a request kind (`loadAudio`) and a response kind
/// (`loadAudioResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    LoadAudio,
    UnloadAudio,
    GetMetadata,
    GetDerivedMetric,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::LoadAudio,
        Action::UnloadAudio,
        Action::GetMetadata,
        Action::GetDerivedMetric,
    ];

    pub fn request_kind(&self) -> &'static str {
        match self {
            Action::LoadAudio => "loadAudio",
            Action::UnloadAudio => "unloadAudio",
            Action::GetMetadata => "getMetadata",
            Action::GetDerivedMetric => "getDerivedMetric",
        }
    }

    pub fn response_kind(&self) -> &'static str {
        match self {
            Action::LoadAudio => "loadAudioResult",
            Action::UnloadAudio => "unloadAudioResult",
            Action::GetMetadata => "getMetadataResult",
            Action::GetDerivedMetric => "getDerivedMetricResult",
        }
    }

    pub fn from_request_kind(kind: &str) -> Option<Action> {
        Action::ALL.into_iter().find(|a| a.request_kind() == kind)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.request_kind())
    }
}

/// What the executor is asked to load.
#[derive(Debug, Clone)]
pub enum LoadRequest {
    /// Encoded bytes; the executor decodes them itself.
    Encoded(SharedBytes),
    /// Already decoded on the controller; the executor adopts the regions.
    Decoded(AudioBufferSetup),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    NotLoaded,
    Analysis,
    Unsupported,
}

/// Failure reported by the executor in place of a normal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Kind-specific message body. Buffers travel as shared handles.
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Load(LoadRequest),
    Loaded(AudioBufferSetup),
    Ack(bool),
    Metric(DerivedMetric),
    MetricValue(MetricValue),
    Metadata(Box<AudioMetadata>),
    Failed(Failure),
}

impl Payload {
    /// Variant name, for logs and errors (never dumps sample data).
    pub fn label(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Load(_) => "load",
            Payload::Loaded(_) => "loaded",
            Payload::Ack(_) => "ack",
            Payload::Metric(_) => "metric",
            Payload::MetricValue(_) => "metric-value",
            Payload::Metadata(_) => "metadata",
            Payload::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub kind: String,
    pub payload: Payload,
    /// Absent for notifications such as `ready`.
    pub id: Option<CorrelationId>,
}

impl Message {
    pub fn ready() -> Self {
        Self {
            kind: READY_KIND.to_string(),
            payload: Payload::Empty,
            id: None,
        }
    }

    pub fn request(action: Action, payload: Payload, id: CorrelationId) -> Self {
        Self {
            kind: action.request_kind().to_string(),
            payload,
            id: Some(id),
        }
    }

    /// Build the response to this message, carrying the same id.
    pub fn reply(&self, kind: &str, payload: Payload) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
            id: self.id,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.id.is_none() && self.kind == READY_KIND
    }
}
