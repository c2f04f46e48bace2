//! Min/max decimation of sample windows into a bounded number of points.

use serde::{Deserialize, Serialize};

/// Sample-index bounds for a decimation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownsampleWindow {
    /// The whole buffer.
    #[default]
    Full,
    /// `[start, end)` in sample indices. Clamped to the buffer.
    Range { start: usize, end: usize },
}

impl DownsampleWindow {
    pub fn range(start: usize, end: usize) -> Self {
        DownsampleWindow::Range { start, end }
    }

    /// Clamp to a buffer of `len` samples, returning `(start, end)`.
    /// `end < start` is possible and means "empty".
    pub fn resolve(&self, len: usize) -> (usize, usize) {
        match *self {
            DownsampleWindow::Full => (0, len),
            DownsampleWindow::Range { start, end } => (start, end.min(len)),
        }
    }
}

/// Per-bucket min/max pairs plus the representative sample index of each.
///
/// The three vectors always have equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveformEnvelope {
    pub x_axis: Vec<usize>,
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

impl WaveformEnvelope {
    fn with_capacity(n: usize) -> Self {
        Self {
            x_axis: Vec::with_capacity(n),
            min: Vec::with_capacity(n),
            max: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, x: usize, min: f32, max: f32) {
        self.x_axis.push(x);
        self.min.push(min);
        self.max.push(max);
    }

    pub fn len(&self) -> usize {
        self.x_axis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x_axis.is_empty()
    }
}

/// Decimate a single channel.
///
/// Windows no longer than `target_points` pass through one point per
/// sample. Longer windows are split into `target_points` buckets of
/// `len / target_points` samples (floating point step, floored bounds).
pub fn decimate(
    samples: &[f32],
    window: DownsampleWindow,
    target_points: usize,
) -> WaveformEnvelope {
    decimate_with(samples.len(), window, target_points, |i| samples.get(i).copied())
}

/// Decimate each channel of interleaved samples (`[L0, R0, L1, R1, ...]`).
///
/// Window bounds are in per-channel sample indices; every channel uses the
/// same bucket boundaries.
pub fn decimate_interleaved(
    samples: &[f32],
    num_channels: usize,
    window: DownsampleWindow,
    target_points: usize,
) -> Vec<WaveformEnvelope> {
    if num_channels == 0 {
        return Vec::new();
    }
    let frames = samples.len() / num_channels;
    (0..num_channels)
        .map(|offset| {
            decimate_with(frames, window, target_points, |i| {
                samples.get(i * num_channels + offset).copied()
            })
        })
        .collect()
}

fn decimate_with<F>(
    len: usize,
    window: DownsampleWindow,
    target_points: usize,
    sample_at: F,
) -> WaveformEnvelope
where
    F: Fn(usize) -> Option<f32>,
{
    let (start, end) = window.resolve(len);
    if end <= start || target_points == 0 {
        return WaveformEnvelope::default();
    }
    let effective_len = end - start;

    if effective_len <= target_points {
        let mut env = WaveformEnvelope::with_capacity(effective_len);
        for i in start..end {
            let v = sample_at(i).unwrap_or(0.0);
            env.push(i, v, v);
        }
        return env;
    }

    let mut env = WaveformEnvelope::with_capacity(target_points);
    let step = effective_len as f64 / target_points as f64;

    for i in 0..target_points {
        let bucket_start = start + (i as f64 * step).floor() as usize;
        let bucket_end = (start + ((i + 1) as f64 * step).floor() as usize).min(end);

        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for j in bucket_start..bucket_end {
            if let Some(v) = sample_at(j) {
                if v < lo {
                    lo = v;
                }
                if v > hi {
                    hi = v;
                }
            }
        }

        // Empty bucket (step rounding): use the sample at the bucket start
        if lo == f32::INFINITY {
            let fallback = sample_at(bucket_start).unwrap_or(0.0);
            lo = fallback;
            hi = fallback;
        }

        let mid = (bucket_start + bucket_end).saturating_sub(1) / 2;
        env.push(mid, lo, hi);
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_mono_ramp_five_buckets() {
        let env = decimate(&ramp(10), DownsampleWindow::Full, 5);
        assert_eq!(env.min, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
        assert_eq!(env.max, vec![1.0, 3.0, 5.0, 7.0, 9.0]);
        assert_eq!(env.x_axis, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_interleaved_stereo_two_buckets() {
        // L = 0,1,2,3   R = 10,11,12,13
        let samples = [0.0, 10.0, 1.0, 11.0, 2.0, 12.0, 3.0, 13.0];
        let envs = decimate_interleaved(&samples, 2, DownsampleWindow::Full, 2);
        assert_eq!(envs.len(), 2);

        assert_eq!(envs[0].min, vec![0.0, 2.0]);
        assert_eq!(envs[0].max, vec![1.0, 3.0]);
        assert_eq!(envs[1].min, vec![10.0, 12.0]);
        assert_eq!(envs[1].max, vec![11.0, 13.0]);
        assert_eq!(envs[0].x_axis, envs[1].x_axis);
        assert_eq!(envs[0].x_axis, vec![0, 2]);
    }

    #[test]
    fn test_empty_window() {
        let env = decimate(&ramp(10), DownsampleWindow::range(4, 4), 5);
        assert!(env.is_empty());
        assert!(env.min.is_empty() && env.max.is_empty());
    }

    #[test]
    fn test_inverted_and_out_of_range_windows() {
        assert!(decimate(&ramp(10), DownsampleWindow::range(6, 3), 5).is_empty());
        assert!(decimate(&ramp(10), DownsampleWindow::range(20, 30), 5).is_empty());
        assert!(decimate(&[], DownsampleWindow::Full, 5).is_empty());
    }

    #[test]
    fn test_zero_target_points() {
        assert!(decimate(&ramp(10), DownsampleWindow::Full, 0).is_empty());
    }

    #[test]
    fn test_pass_through_short_window() {
        let samples = [0.5, -0.25, 0.75, 1.0];
        let env = decimate(&samples, DownsampleWindow::range(1, 3), 10);
        assert_eq!(env.x_axis, vec![1, 2]);
        assert_eq!(env.min, vec![-0.25, 0.75]);
        assert_eq!(env.max, vec![-0.25, 0.75]);
    }

    #[test]
    fn test_window_end_clamped() {
        let env = decimate(&ramp(10), DownsampleWindow::range(5, 1000), 100);
        assert_eq!(env.len(), 5);
        assert_eq!(env.x_axis, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_output_length_property() {
        let samples: Vec<f32> = (0..997).map(|i| ((i * 37) % 101) as f32 - 50.0).collect();
        for &(start, end) in &[(0usize, 997usize), (13, 500), (100, 101), (0, 64), (400, 997)] {
            for &target in &[1usize, 3, 7, 64, 100, 333, 1000] {
                let env = decimate(&samples, DownsampleWindow::range(start, end), target);
                let len = end - start;
                let expected = if len <= target { len } else { target };
                assert_eq!(env.len(), expected, "window {}..{} target {}", start, end, target);
                assert_eq!(env.min.len(), env.len());
                assert_eq!(env.max.len(), env.len());
            }
        }
    }

    #[test]
    fn test_buckets_preserve_peaks_and_order() {
        let samples: Vec<f32> = (0..1000)
            .map(|i| (i as f32 * 0.37).sin() * (1.0 + (i % 17) as f32))
            .collect();
        let (start, end, target) = (37usize, 911usize, 97usize);
        let env = decimate(&samples, DownsampleWindow::range(start, end), target);

        let step = (end - start) as f64 / target as f64;
        for i in 0..env.len() {
            let b0 = start + (i as f64 * step).floor() as usize;
            let b1 = (start + ((i + 1) as f64 * step).floor() as usize).min(end);
            let bucket = &samples[b0..b1];
            assert!(env.min[i] <= env.max[i]);
            assert!(bucket.contains(&env.min[i]));
            assert!(bucket.contains(&env.max[i]));
            assert!(bucket.iter().all(|&v| v >= env.min[i] && v <= env.max[i]));
        }
        assert!(env.x_axis.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_single_spike_survives() {
        let mut samples = vec![0.0f32; 48_000];
        samples[31_337] = 0.9;
        samples[12_000] = -0.7;
        let env = decimate(&samples, DownsampleWindow::Full, 200);
        assert_eq!(env.len(), 200);
        let peak = env.max.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let trough = env.min.iter().cloned().fold(f32::INFINITY, f32::min);
        assert_eq!(peak, 0.9);
        assert_eq!(trough, -0.7);
    }

    #[test]
    fn test_uneven_step() {
        // 7 samples into 3 buckets: step 2.333 -> [0,2) [2,4) [4,7)
        let env = decimate(&ramp(7), DownsampleWindow::Full, 3);
        assert_eq!(env.min, vec![0.0, 2.0, 4.0]);
        assert_eq!(env.max, vec![1.0, 3.0, 6.0]);
        assert_eq!(env.x_axis, vec![0, 2, 5]);
    }

    #[test]
    fn test_all_nan_bucket_falls_back() {
        let samples = [f32::NAN, f32::NAN, 1.0, 2.0];
        let env = decimate(&samples, DownsampleWindow::Full, 2);
        assert!(env.min[0].is_nan() && env.max[0].is_nan());
        assert_eq!((env.min[1], env.max[1]), (1.0, 2.0));
    }

    #[test]
    fn test_interleaved_zero_channels() {
        assert!(decimate_interleaved(&[1.0, 2.0], 0, DownsampleWindow::Full, 4).is_empty());
    }

    #[test]
    fn test_window_serde() {
        let json = serde_json::to_string(&DownsampleWindow::range(3, 9)).unwrap();
        let back: DownsampleWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DownsampleWindow::range(3, 9));
    }
}
