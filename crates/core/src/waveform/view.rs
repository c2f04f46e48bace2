//! Read-only view over decoded channels for windowed, decimated reads.

use crate::audio::{AudioBufferSetup, AudioInfo, SharedSamples};
use crate::error::{PipelineError, Result};
use crate::pipeline::PipelineState;

use super::decimate::{decimate, DownsampleWindow, WaveformEnvelope};

/// Cheap to clone: holds shared handles, never copies samples.
#[derive(Debug, Clone)]
pub struct BufferView {
    channels: Vec<SharedSamples>,
    info: AudioInfo,
}

impl BufferView {
    pub fn new(channels: Vec<SharedSamples>, info: AudioInfo) -> Self {
        Self { channels, info }
    }

    pub fn from_setup(setup: &AudioBufferSetup) -> Self {
        Self::new(setup.channels.clone(), setup.info())
    }

    pub fn num_samples(&self) -> usize {
        self.info.num_samples
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    pub fn channel_views(&self) -> &[SharedSamples] {
        &self.channels
    }

    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        self.channels.get(channel).map(|c| &c[..])
    }

    pub fn sample(&self, channel: usize, index: usize) -> Option<f32> {
        self.channels.get(channel)?.get(index).copied()
    }

    /// One sample per channel at `index`.
    pub fn frame(&self, index: usize) -> Option<Vec<f32>> {
        if index >= self.info.num_samples {
            return None;
        }
        self.channels.iter().map(|c| c.get(index).copied()).collect()
    }

    /// Min/max envelope of one channel over `window`.
    pub fn get_downsampled_min_max(
        &self,
        channel: usize,
        target_points: usize,
        window: DownsampleWindow,
    ) -> Result<WaveformEnvelope> {
        let samples = self.channel(channel).ok_or(PipelineError::State {
            operation: "get_downsampled_min_max",
            state: PipelineState::Ready,
        })?;
        Ok(decimate(samples, window, target_points))
    }

    /// Envelopes for every channel, sharing bucket boundaries.
    pub fn envelopes(
        &self,
        target_points: usize,
        window: DownsampleWindow,
    ) -> Vec<WaveformEnvelope> {
        self.channels
            .iter()
            .map(|c| decimate(c, window, target_points))
            .collect()
    }
}
