//! Derived metrics computed from decoded audio on the executor.

pub mod flux;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::AudioBufferSetup;
use crate::config::FluxConfig;

/// A metric derived from the whole decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DerivedMetric {
    SpectralFlux,
    SmoothedFlux,
    Tempo,
}

impl DerivedMetric {
    pub const ALL: [DerivedMetric; 3] = [
        DerivedMetric::SpectralFlux,
        DerivedMetric::SmoothedFlux,
        DerivedMetric::Tempo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DerivedMetric::SpectralFlux => "spectral-flux",
            DerivedMetric::SmoothedFlux => "smoothed-flux",
            DerivedMetric::Tempo => "tempo",
        }
    }
}

impl fmt::Display for DerivedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DerivedMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DerivedMetric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("Unknown metric: {}", s))
    }
}

/// Result of a derived-metric computation. Series are shared, not copied.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Series(Arc<[f32]>),
    Scalar(f64),
}

impl MetricValue {
    pub fn as_series(&self) -> Option<&[f32]> {
        match self {
            MetricValue::Series(s) => Some(s),
            MetricValue::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::Series(_) => None,
        }
    }
}

/// Compute `metric` for a loaded buffer.
pub fn compute(
    metric: DerivedMetric,
    setup: &AudioBufferSetup,
    config: &FluxConfig,
) -> Result<MetricValue, String> {
    let raw = flux::channel_flux(&setup.channels, config);
    match metric {
        DerivedMetric::SpectralFlux => Ok(MetricValue::Series(Arc::from(raw))),
        DerivedMetric::SmoothedFlux => {
            let smoothed = flux::smooth(&raw, config.smoothing);
            Ok(MetricValue::Series(Arc::from(smoothed)))
        }
        DerivedMetric::Tempo => flux::estimate_bpm(
            &raw,
            setup.sample_rate,
            config.hop_size,
            config.min_bpm,
            config.max_bpm,
        )
        .map(MetricValue::Scalar)
        .ok_or_else(|| "No valid tempo found in BPM range".to_string()),
    }
}
