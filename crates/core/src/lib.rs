//! Wavelens core: decode audio once, share it with a background executor,
//! and render min/max waveform envelopes and spectral metrics from it.

pub mod analysis;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod waveform;

pub use analysis::{DerivedMetric, MetricValue};
pub use audio::{AudioInfo, AudioMetadata, AudioSource};
pub use config::PipelineConfig;
pub use error::{BridgeError, BufferError, PipelineError};
pub use pipeline::{AudioPipeline, PipelineEvent, PipelineSnapshot, PipelineState};
pub use waveform::{BufferView, DownsampleWindow, WaveformEnvelope};
