//! Short-time Fourier spectrogram over the rolling buffer

use super::CaptureError;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;
use std::sync::Arc;

/// Floor added to linear power before the log so silence maps to -100 dB
pub const LOG_EPSILON: f32 = 1e-10;

/// Fraction of the Tukey window spent in the cosine tapers
const TUKEY_ALPHA: f32 = 0.25;

/// Log-power time/frequency grid.
///
/// Values are stored one time slice after another; slice `t` holds
/// `frequencies.len()` bins in ascending frequency order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpectrogramGrid {
    /// Bin centre frequencies in Hz, 0 ..= sample_rate / 2
    pub frequencies: Vec<f32>,

    /// Segment centre times in seconds, relative to the start of the buffer
    pub times: Vec<f32>,

    power_db: Vec<f32>,
}

impl SpectrogramGrid {
    pub fn num_slices(&self) -> usize {
        self.times.len()
    }

    pub fn num_bins(&self) -> usize {
        self.frequencies.len()
    }

    /// All bins of time slice `t`
    pub fn slice(&self, t: usize) -> Option<&[f32]> {
        let bins = self.num_bins();
        if t >= self.num_slices() {
            return None;
        }
        Some(&self.power_db[t * bins..(t + 1) * bins])
    }

    /// Power in dB at (time slice, frequency bin)
    pub fn get(&self, t: usize, bin: usize) -> Option<f32> {
        if bin >= self.num_bins() {
            return None;
        }
        self.slice(t).map(|s| s[bin])
    }

    /// Slices in chronological order
    pub fn slices(&self) -> impl Iterator<Item = &[f32]> {
        self.power_db.chunks(self.num_bins().max(1))
    }

    /// Index of the loudest bin in slice `t`
    pub fn peak_bin(&self, t: usize) -> Option<usize> {
        self.slice(t)?
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
    }

    /// Frequency of the loudest bin in the most recent slice
    pub fn dominant_frequency(&self) -> Option<f32> {
        let last = self.num_slices().checked_sub(1)?;
        self.peak_bin(last).map(|bin| self.frequencies[bin])
    }

    /// Raw dB values, slice-major
    pub fn values(&self) -> &[f32] {
        &self.power_db
    }
}

/// Convert linear power to decibels with the epsilon floor
pub fn power_to_db(power: f32) -> f32 {
    10.0 * (power + LOG_EPSILON).log10()
}

/// STFT engine with the window, FFT plan and scratch space cached.
///
/// Every call recomputes the whole grid from the samples it is given; the
/// cache only avoids reallocating, so results match a cold computation.
/// Each segment is mean-removed, Tukey-windowed and scaled to a one-sided
/// power spectral density before the log.
pub struct SpectrogramEngine {
    sample_rate: u32,
    segment_length: usize,
    hop: usize,
    window: Vec<f32>,
    /// 1 / (fs * sum(w^2))
    density_scale: f32,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    frequencies: Vec<f32>,
}

impl SpectrogramEngine {
    pub fn new(
        sample_rate: u32,
        segment_length: usize,
        overlap: usize,
    ) -> Result<Self, CaptureError> {
        if sample_rate == 0 {
            return Err(CaptureError::ConfigurationError(
                "spectrogram sample rate must be positive".to_string(),
            ));
        }
        if segment_length < 2 || overlap >= segment_length {
            return Err(CaptureError::ConfigurationError(format!(
                "invalid STFT geometry: segment {} overlap {}",
                segment_length, overlap
            )));
        }

        let window = tukey_window(segment_length, TUKEY_ALPHA);
        let window_power: f32 = window.iter().map(|w| w * w).sum();
        let density_scale = 1.0 / (sample_rate as f32 * window_power);

        let fft = FftPlanner::new().plan_fft_forward(segment_length);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let bins = segment_length / 2 + 1;
        let frequencies = (0..bins)
            .map(|k| k as f32 * sample_rate as f32 / segment_length as f32)
            .collect();

        Ok(Self {
            sample_rate,
            segment_length,
            hop: segment_length - overlap,
            window,
            density_scale,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); segment_length],
            scratch,
            frequencies,
        })
    }

    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Number of time slices produced for an input of `len` samples
    pub fn num_slices(&self, len: usize) -> usize {
        if len < self.segment_length {
            0
        } else {
            (len - self.segment_length) / self.hop + 1
        }
    }

    /// Compute the log-power grid of `samples`.
    ///
    /// Input shorter than one segment yields a grid with no time slices.
    pub fn compute(&mut self, samples: &[f32]) -> SpectrogramGrid {
        let slices = self.num_slices(samples.len());
        let bins = self.frequencies.len();
        let n = self.segment_length;
        let fs = self.sample_rate as f32;
        // DC never doubles; Nyquist exists only for even lengths
        let last_doubled = if n % 2 == 0 { bins - 1 } else { bins };

        let mut power_db = Vec::with_capacity(slices * bins);
        let mut times = Vec::with_capacity(slices);

        for t in 0..slices {
            let start = t * self.hop;
            let segment = &samples[start..start + n];
            let mean = segment.iter().sum::<f32>() / n as f32;

            for ((slot, &s), &w) in self.buffer.iter_mut().zip(segment).zip(&self.window) {
                *slot = Complex::new((s - mean) * w, 0.0);
            }
            self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

            for (k, c) in self.buffer.iter().take(bins).enumerate() {
                let mut power = c.norm_sqr() * self.density_scale;
                if k > 0 && k < last_doubled {
                    power *= 2.0;
                }
                power_db.push(power_to_db(power));
            }

            times.push((start as f32 + n as f32 / 2.0) / fs);
        }

        SpectrogramGrid {
            frequencies: self.frequencies.clone(),
            times,
            power_db,
        }
    }
}

/// One-shot spectrogram of `samples`
pub fn compute_spectrogram(
    samples: &[f32],
    sample_rate: u32,
    segment_length: usize,
    overlap: usize,
) -> Result<SpectrogramGrid, CaptureError> {
    let mut engine = SpectrogramEngine::new(sample_rate, segment_length, overlap)?;
    Ok(engine.compute(samples))
}

/// Periodic Tukey window: flat top with cosine tapers covering `alpha`
/// of the length
fn tukey_window(len: usize, alpha: f32) -> Vec<f32> {
    // periodic form: symmetric window of len + 1 with the last point dropped
    let m = len as f32;
    (0..len)
        .map(|i| {
            let x = i as f32 / m;
            if x < alpha / 2.0 {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * x / alpha).cos())
            } else if x > 1.0 - alpha / 2.0 {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * (1.0 - x) / alpha).cos())
            } else {
                1.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn silence_maps_to_epsilon_floor() {
        let grid = compute_spectrogram(&vec![0.0; 4096], 44100, 512, 256).unwrap();
        let floor = 10.0 * LOG_EPSILON.log10();

        assert!(grid.num_slices() > 0);
        for &v in grid.values() {
            assert_approx(v, floor, 1e-3);
        }
        assert_approx(floor, -100.0, 1e-3);
    }

    #[test]
    fn frequency_axis_spans_dc_to_nyquist() {
        let grid = compute_spectrogram(&vec![0.0; 1024], 44100, 512, 256).unwrap();

        assert_eq!(grid.num_bins(), 257);
        assert_eq!(grid.frequencies[0], 0.0);
        assert_approx(*grid.frequencies.last().unwrap(), 22050.0, 1e-2);
    }

    #[test]
    fn slice_count_and_centre_times_follow_hop() {
        let engine = SpectrogramEngine::new(44100, 512, 256).unwrap();
        assert_eq!(engine.num_slices(88200), 343);
        assert_eq!(engine.num_slices(511), 0);
        assert_eq!(engine.num_slices(512), 1);

        let grid = compute_spectrogram(&vec![0.0; 1024], 1000, 512, 256).unwrap();
        assert_eq!(grid.num_slices(), 3);
        assert_approx(grid.times[0], 0.256, 1e-6);
        assert_approx(grid.times[1], 0.512, 1e-6);
        assert_approx(grid.times[2], 0.768, 1e-6);
    }

    #[test]
    fn short_input_yields_empty_grid() {
        let grid = compute_spectrogram(&vec![1.0; 100], 44100, 512, 256).unwrap();
        assert_eq!(grid.num_slices(), 0);
        assert_eq!(grid.num_bins(), 257);
        assert!(grid.values().is_empty());
        assert!(grid.dominant_frequency().is_none());
    }

    #[test]
    fn sine_peak_lands_on_its_bin() {
        let rate = 44100;
        let samples = sine(440.0, 10000.0, rate, rate as usize * 2);
        let grid = compute_spectrogram(&samples, rate, 512, 256).unwrap();
        let bin_width = rate as f32 / 512.0;

        assert_eq!(grid.num_slices(), 343);
        for t in 0..grid.num_slices() {
            let bin = grid.peak_bin(t).unwrap();
            let freq = grid.frequencies[bin];
            assert!(
                (freq - 440.0).abs() <= bin_width,
                "slice {t}: peak at {freq} Hz"
            );
        }
        assert!(grid.dominant_frequency().is_some());
    }

    #[test]
    fn dc_offset_is_removed_per_segment() {
        let grid = compute_spectrogram(&vec![5000.0; 2048], 44100, 512, 256).unwrap();
        let floor = 10.0 * LOG_EPSILON.log10();
        for &v in grid.values() {
            assert_approx(v, floor, 1e-3);
        }
    }

    #[test]
    fn cached_engine_matches_cold_computation() {
        let rate = 8000;
        let a = sine(1000.0, 3000.0, rate, 4000);
        let b = sine(250.0, 800.0, rate, 4000);

        let mut engine = SpectrogramEngine::new(rate, 256, 128).unwrap();
        let _ = engine.compute(&a);
        let warm = engine.compute(&b);
        let cold = compute_spectrogram(&b, rate, 256, 128).unwrap();

        assert_eq!(warm.values(), cold.values());
        assert_eq!(warm.times, cold.times);
    }

    #[test]
    fn tukey_window_is_flat_in_the_middle_and_tapers_to_zero() {
        let window = tukey_window(512, TUKEY_ALPHA);
        assert_eq!(window.len(), 512);
        assert_eq!(window[0], 0.0);
        assert_eq!(window[256], 1.0);
        assert!(window[10] > 0.0 && window[10] < 1.0);
        assert!(window[511] > 0.0 && window[511] < 0.01);
    }

    #[test]
    fn invalid_geometry_is_a_configuration_error() {
        assert!(matches!(
            SpectrogramEngine::new(44100, 512, 512),
            Err(CaptureError::ConfigurationError(_))
        ));
        assert!(SpectrogramEngine::new(0, 512, 256).is_err());
    }

    #[test]
    fn grid_accessors_agree() {
        let grid = compute_spectrogram(&sine(1000.0, 1.0, 8000, 1024), 8000, 256, 128).unwrap();
        assert_eq!(grid.slices().count(), grid.num_slices());
        assert_eq!(grid.get(0, 0), grid.slice(0).map(|s| s[0]));
        assert!(grid.get(grid.num_slices(), 0).is_none());
        assert!(grid.get(0, grid.num_bins()).is_none());
    }
}
