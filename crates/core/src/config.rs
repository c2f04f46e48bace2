//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Env var that overrides [`PipelineConfig::prefer_native_decode`].
pub const NATIVE_DECODE_ENV: &str = "WAVELENS_NATIVE_DECODE";

/// Configuration for the spectral flux / tempo analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    /// FFT frame length in samples.
    pub window_size: usize,
    /// Samples between successive frames.
    pub hop_size: usize,
    /// Width of the moving average applied for smoothed flux.
    pub smoothing: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            window_size: 1024,
            hop_size: 512,
            smoothing: 10,
            min_bpm: 60.0,
            max_bpm: 180.0,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Decode on the controller with the native decoder before handing
    /// PCM to the executor. Falls back to executor-side decode on failure.
    pub prefer_native_decode: bool,
    /// How long to wait for the executor's ready notification.
    pub ready_timeout_ms: u64,
    /// Deadline for each request sent to the executor.
    pub request_timeout_ms: u64,
    pub flux: FluxConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefer_native_decode: false,
            ready_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            flux: FluxConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Default config with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Apply `WAVELENS_NATIVE_DECODE` if set to a recognised value.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(NATIVE_DECODE_ENV) {
            match parse_flag(&value) {
                Some(flag) => self.prefer_native_decode = flag,
                None => log::warn!(
                    "Ignoring {}={:?}: expected 1/0/true/false",
                    NATIVE_DECODE_ENV,
                    value
                ),
            }
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(!config.prefer_native_decode);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.flux.window_size, 1024);
        assert_eq!(config.flux.hop_size, 512);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"prefer_native_decode": true, "flux": {"hop_size": 256}}"#;
        let config = PipelineConfig::from_json(json).unwrap();
        assert!(config.prefer_native_decode);
        assert_eq!(config.flux.hop_size, 256);
        assert_eq!(config.flux.window_size, 1024);
        assert_eq!(config.ready_timeout_ms, 5_000);
    }

    #[test]
    fn test_invalid_json() {
        assert!(PipelineConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
