//! Waveform envelopes for visualization.

pub mod decimate;
pub mod view;

pub use decimate::{decimate, decimate_interleaved, DownsampleWindow, WaveformEnvelope};
pub use view::BufferView;
