//! Sensitivity (gain) shared between the control surface and the frame loop

use super::{DEFAULT_GAIN, MAX_GAIN, MIN_GAIN};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Step used by `+` / `-` control commands
const NUDGE_STEP: f32 = 0.1;

/// Control command errors
#[derive(Error, Debug, PartialEq)]
pub enum ControlError {
    #[error("Gain must be a number, got '{0}'")]
    NotANumber(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// Current gain as an atomic f32.
///
/// Stores whatever it is given; range enforcement belongs to
/// [`GainControl`]. Readers may see a value one frame stale but never a
/// torn one.
#[derive(Debug)]
pub struct Sensitivity {
    bits: AtomicU32,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN)
    }
}

impl Sensitivity {
    pub fn new(gain: f32) -> Self {
        Self {
            bits: AtomicU32::new(gain.to_bits()),
        }
    }

    pub fn set_gain(&self, gain: f32) {
        self.bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// The exposed gain control, as driven by a sensitivity slider.
///
/// Values outside [`MIN_GAIN`, `MAX_GAIN`] are clamped; NaN is refused and
/// leaves the current gain in place.
#[derive(Debug, Clone)]
pub struct GainControl {
    sensitivity: Arc<Sensitivity>,
}

impl GainControl {
    pub fn new(sensitivity: Arc<Sensitivity>) -> Self {
        Self { sensitivity }
    }

    /// Apply `value`, returning the gain actually in effect
    pub fn set(&self, value: f32) -> f32 {
        if value.is_nan() {
            log::warn!("Ignoring NaN gain");
            return self.sensitivity.gain();
        }
        let clamped = value.clamp(MIN_GAIN, MAX_GAIN);
        if clamped != value {
            log::warn!(
                "Gain {} outside [{}, {}], using {}",
                value,
                MIN_GAIN,
                MAX_GAIN,
                clamped
            );
        }
        self.sensitivity.set_gain(clamped);
        log::debug!("Gain set to {}", clamped);
        clamped
    }

    /// Move the gain by `delta`, staying in range
    pub fn nudge(&self, delta: f32) -> f32 {
        self.set(self.sensitivity.gain() + delta)
    }

    pub fn reset(&self) -> f32 {
        self.set(DEFAULT_GAIN)
    }

    pub fn get(&self) -> f32 {
        self.sensitivity.gain()
    }

    /// Apply one text command: `gain <v>`, `+`, `-`, `reset`.
    ///
    /// Returns the gain in effect afterwards.
    pub fn apply_command(&self, line: &str) -> Result<f32, ControlError> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("gain"), Some(value)) => value
                .parse::<f32>()
                .map(|v| self.set(v))
                .map_err(|_| ControlError::NotANumber(value.to_string())),
            (Some("+"), None) => Ok(self.nudge(NUDGE_STEP)),
            (Some("-"), None) => Ok(self.nudge(-NUDGE_STEP)),
            (Some("reset"), None) => Ok(self.reset()),
            _ => Err(ControlError::UnknownCommand(line.trim().to_string())),
        }
    }
}
