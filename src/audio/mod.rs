//! Audio capture and analysis module

mod buffer;
mod capture;
mod sensitivity;
mod smoothing;
mod sources;
mod spectrogram;

pub use buffer::RollingBuffer;
pub use capture::{CaptureError, ChunkSource, CpalCapture};
pub use sensitivity::{ControlError, GainControl, Sensitivity};
pub use smoothing::smooth;
pub use sources::{list_input_devices, InputDevice};
pub use spectrogram::{compute_spectrogram, SpectrogramEngine, SpectrogramGrid, LOG_EPSILON};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lowest gain the sensitivity control accepts
pub const MIN_GAIN: f32 = 0.1;

/// Highest gain the sensitivity control accepts
pub const MAX_GAIN: f32 = 5.0;

/// Gain applied before the control is touched
pub const DEFAULT_GAIN: f32 = 1.0;

/// Full-scale amplitude range of a 16-bit sample, for sinks that fix their y-axis
pub const SAMPLE_RANGE: (f32, f32) = (i16::MIN as f32, i16::MAX as f32);

/// Upper bound accepted for the capture sample rate
const MAX_SAMPLE_RATE: u32 = 384_000;

/// Upper bound on rolling buffer length: one minute at the highest rate
const MAX_BUFFER_SAMPLES: usize = MAX_SAMPLE_RATE as usize * 60;

/// Audio processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Samples per capture read
    pub chunk_size: usize,

    /// Seconds of history held by the rolling buffer
    pub buffer_seconds: f32,

    /// Target period between frames
    pub frame_interval: Duration,

    /// Moving-average window for the waveform (odd)
    pub smoothing_window: usize,

    /// STFT segment length
    pub segment_length: usize,

    /// Samples shared by consecutive STFT segments
    pub overlap: usize,

    /// Named input device; `None` means the host default
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            chunk_size: 1024,
            buffer_seconds: 2.0,
            frame_interval: Duration::from_millis(30),
            smoothing_window: 31,
            segment_length: 512,
            overlap: 256,
            device: None,
        }
    }
}

impl AudioConfig {
    /// Number of samples in the rolling buffer
    pub fn buffer_size(&self) -> usize {
        (self.sample_rate as f64 * self.buffer_seconds as f64) as usize
    }

    /// Step between STFT segment starts
    pub fn hop(&self) -> usize {
        self.segment_length.saturating_sub(self.overlap)
    }

    /// Wall time needed to accumulate one chunk at the configured rate
    pub fn chunk_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.chunk_size as f64 / self.sample_rate as f64)
    }

    /// Bounded wait for a single capture read.
    ///
    /// Never longer than one chunk duration so a stop request is observed
    /// within that time even when the device stalls.
    pub fn read_timeout(&self) -> Duration {
        self.chunk_duration().max(Duration::from_millis(1))
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(CaptureError::ConfigurationError(format!(
                "sample rate {} Hz is outside 1..={} Hz",
                self.sample_rate, MAX_SAMPLE_RATE
            )));
        }
        if !(self.buffer_seconds.is_finite() && self.buffer_seconds > 0.0) {
            return Err(CaptureError::ConfigurationError(format!(
                "buffer length must be a positive number of seconds, got {}",
                self.buffer_seconds
            )));
        }
        if self.chunk_size == 0 {
            return Err(CaptureError::ConfigurationError(
                "chunk size must be at least one sample".to_string(),
            ));
        }
        let buffer_size = self.buffer_size();
        if buffer_size > MAX_BUFFER_SAMPLES {
            return Err(CaptureError::ConfigurationError(format!(
                "{} s at {} Hz exceeds the {} sample buffer limit",
                self.buffer_seconds, self.sample_rate, MAX_BUFFER_SAMPLES
            )));
        }
        if self.chunk_size > buffer_size {
            return Err(CaptureError::ConfigurationError(format!(
                "chunk size {} exceeds buffer size {}",
                self.chunk_size, buffer_size
            )));
        }
        if self.smoothing_window == 0 || self.smoothing_window % 2 == 0 {
            return Err(CaptureError::ConfigurationError(format!(
                "smoothing window must be odd and at least 1, got {}",
                self.smoothing_window
            )));
        }
        if self.segment_length < 2 {
            return Err(CaptureError::ConfigurationError(format!(
                "segment length must be at least 2, got {}",
                self.segment_length
            )));
        }
        if self.overlap >= self.segment_length {
            return Err(CaptureError::ConfigurationError(format!(
                "overlap {} must be smaller than segment length {}",
                self.overlap, self.segment_length
            )));
        }
        if buffer_size < self.segment_length {
            return Err(CaptureError::ConfigurationError(format!(
                "buffer size {} is shorter than one segment ({})",
                buffer_size, self.segment_length
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_process_defaults() {
        let config = AudioConfig::default();

        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.buffer_size(), 88200);
        assert_eq!(config.hop(), 256);
        assert_eq!(config.frame_interval, Duration::from_millis(30));
        assert_eq!(config.smoothing_window, 31);
        assert!(config.device.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn chunk_duration_is_about_23ms_at_defaults() {
        let config = AudioConfig::default();
        let ms = config.chunk_duration().as_secs_f64() * 1000.0;
        assert!((ms - 23.22).abs() < 0.01, "got {ms}");
        assert!(config.read_timeout() <= config.chunk_duration());
    }

    #[test]
    fn chunk_larger_than_buffer_is_rejected() {
        let config = AudioConfig {
            sample_rate: 8000,
            buffer_seconds: 0.1,
            chunk_size: 1024,
            segment_length: 256,
            overlap: 128,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CaptureError::ConfigurationError(_))
        ));
    }

    #[test]
    fn invalid_rates_and_windows_are_rejected() {
        let zero_rate = AudioConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(zero_rate.validate().is_err());

        let even_window = AudioConfig {
            smoothing_window: 30,
            ..Default::default()
        };
        assert!(even_window.validate().is_err());

        let full_overlap = AudioConfig {
            overlap: 512,
            ..Default::default()
        };
        assert!(full_overlap.validate().is_err());

        let negative_seconds = AudioConfig {
            buffer_seconds: -1.0,
            ..Default::default()
        };
        assert!(negative_seconds.validate().is_err());
    }

    #[test]
    fn oversized_buffer_is_rejected_before_allocation() {
        let huge = AudioConfig {
            buffer_seconds: 1e12,
            ..Default::default()
        };
        assert!(matches!(
            huge.validate(),
            Err(CaptureError::ConfigurationError(_))
        ));

        let one_minute = AudioConfig {
            buffer_seconds: 60.0,
            ..Default::default()
        };
        assert!(one_minute.validate().is_ok());
    }
}
