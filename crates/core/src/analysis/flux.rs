//! Spectral flux and tempo estimation.
//!
//! Flux is computed on a mono mixdown: Hann-windowed frames, FFT magnitudes,
//! and the square root of the summed positive magnitude increase between
//! consecutive frames. Tempo is the strongest autocorrelation lag of the
//! flux curve inside a BPM range.

use rustfft::{num_complex::Complex, FftPlanner};

use crate::audio::SharedSamples;
use crate::config::FluxConfig;

/// Average all channels into one.
pub fn mixdown(channels: &[SharedSamples]) -> Vec<f32> {
    let Some(first) = channels.first() else {
        return Vec::new();
    };
    if channels.len() == 1 {
        return first.to_vec();
    }
    let scale = 1.0 / channels.len() as f32;
    (0..first.len())
        .map(|i| channels.iter().map(|c| c.get(i).copied().unwrap_or(0.0)).sum::<f32>() * scale)
        .collect()
}

/// Symmetric Hann window of length `n`.
pub fn hann_window(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos()))
        .collect()
}

/// Spectral flux per frame. Frames start every `hop_size` samples while a
/// full window still fits strictly inside the signal. The first frame is 0.
pub fn spectral_flux(samples: &[f32], window_size: usize, hop_size: usize) -> Vec<f32> {
    if window_size == 0 || hop_size == 0 || samples.len() <= window_size {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(window_size);
    let window = hann_window(window_size);

    let mut buffer = vec![Complex::new(0.0f32, 0.0); window_size];
    let mut prev: Option<Vec<f32>> = None;
    let mut flux = Vec::with_capacity((samples.len() - window_size) / hop_size + 1);

    let mut start = 0;
    while start + window_size < samples.len() {
        let frame = &samples[start..start + window_size];
        for ((slot, &s), &w) in buffer.iter_mut().zip(frame).zip(&window) {
            *slot = Complex::new(s * w, 0.0);
        }
        fft.process(&mut buffer);

        let magnitudes: Vec<f32> = buffer.iter().map(|c| c.norm()).collect();
        let value = match &prev {
            Some(prev) => magnitudes
                .iter()
                .zip(prev)
                .map(|(cur, old)| (cur - old).max(0.0))
                .sum::<f32>()
                .sqrt(),
            None => 0.0,
        };
        flux.push(value);
        prev = Some(magnitudes);
        start += hop_size;
    }

    flux
}

/// Centered moving average over `width` (window of `width / 2` each side).
pub fn smooth(input: &[f32], width: usize) -> Vec<f32> {
    let half = width / 2;
    (0..input.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(input.len() - 1);
            let slice = &input[lo..=hi];
            slice.iter().sum::<f32>() / slice.len() as f32
        })
        .collect()
}

/// Estimate tempo from a flux curve. `None` when no lag in range is usable.
pub fn estimate_bpm(
    flux: &[f32],
    sample_rate: u32,
    hop_size: usize,
    min_bpm: f64,
    max_bpm: f64,
) -> Option<f64> {
    if flux.is_empty() || hop_size == 0 || sample_rate == 0 || min_bpm <= 0.0 || max_bpm < min_bpm {
        return None;
    }
    let flux_fps = sample_rate as f64 / hop_size as f64;
    let max_lag = (flux_fps * 60.0 / min_bpm) as usize;
    let min_lag = ((flux_fps * 60.0 / max_bpm) as usize).max(1);

    let mean = flux.iter().map(|&f| f as f64).sum::<f64>() / flux.len() as f64;

    let mut best_lag = 0usize;
    let mut best_corr = -1.0f64;
    for lag in min_lag..=max_lag {
        if lag >= flux.len() {
            break;
        }
        let corr: f64 = (0..flux.len() - lag)
            .map(|i| (flux[i] as f64 - mean) * (flux[i + lag] as f64 - mean))
            .sum();
        if corr > best_corr {
            best_corr = corr;
            best_lag = lag;
        }
    }

    if best_lag == 0 {
        return None;
    }
    Some(60.0 / (best_lag as f64 / flux_fps))
}

/// Flux of all channels using `config`.
pub fn channel_flux(channels: &[SharedSamples], config: &FluxConfig) -> Vec<f32> {
    spectral_flux(&mixdown(channels), config.window_size, config.hop_size)
}
