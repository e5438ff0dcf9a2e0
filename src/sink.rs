//! Frame delivery: what the frame loop hands to the display layer

use crate::audio::SpectrogramGrid;
use serde::Serialize;
use std::io::Write;

/// One frame of visualization data
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame sequence number, starting at 0
    pub seq: u64,

    /// Gain applied to this frame's buffer snapshot
    pub gain: f32,

    /// Smoothed, gain-scaled buffer contents in time order
    pub waveform: Vec<f32>,

    /// Log-power spectrogram of the same snapshot
    pub spectrogram: SpectrogramGrid,

    /// Seconds since the frame loop started
    pub timestamp: f64,
}

impl Frame {
    /// Largest absolute waveform value
    pub fn peak(&self) -> f32 {
        self.waveform.iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }

    /// Root mean square of the waveform
    pub fn rms(&self) -> f32 {
        if self.waveform.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.waveform.iter().map(|&v| (v as f64) * (v as f64)).sum();
        (sum / self.waveform.len() as f64).sqrt() as f32
    }
}

/// Receives frames from the frame loop.
///
/// Called on the frame loop thread; a slow sink delays the next capture.
pub trait FrameSink {
    fn on_frame(&mut self, frame: &Frame);
}

impl<F: FnMut(&Frame)> FrameSink for F {
    fn on_frame(&mut self, frame: &Frame) {
        self(frame)
    }
}

/// Compact per-frame summary for line-oriented consumers
#[derive(Debug, Clone, Serialize)]
pub struct FrameMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub seq: u64,
    pub gain: f32,
    pub peak: f32,
    pub rms: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_hz: Option<f32>,
    pub slices: usize,
    pub ts: f64,
}

impl FrameMessage {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            msg_type: "frame".to_string(),
            seq: frame.seq,
            gain: frame.gain,
            peak: frame.peak(),
            rms: frame.rms(),
            dominant_hz: frame.spectrogram.dominant_frequency(),
            slices: frame.spectrogram.num_slices(),
            ts: frame.timestamp,
        }
    }
}

/// Writes one JSON [`FrameMessage`] per line
pub struct JsonLinesSink<W: Write> {
    out: W,
    failed: bool,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, failed: false }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FrameSink for JsonLinesSink<W> {
    fn on_frame(&mut self, frame: &Frame) {
        if self.failed {
            return;
        }
        let msg = FrameMessage::from_frame(frame);
        let result = serde_json::to_writer(&mut self.out, &msg)
            .map_err(std::io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"))
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            log::error!("Failed to write frame {}: {}", frame.seq, e);
            self.failed = true;
        }
    }
}

/// Logs a level/pitch summary every `every` frames
pub struct LogSink {
    every: u64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl FrameSink for LogSink {
    fn on_frame(&mut self, frame: &Frame) {
        if frame.seq % self.every != 0 {
            return;
        }
        match frame.spectrogram.dominant_frequency() {
            Some(hz) => log::info!(
                "frame {}: gain {:.2}, peak {:.0}, rms {:.0}, dominant {:.0} Hz",
                frame.seq,
                frame.gain,
                frame.peak(),
                frame.rms(),
                hz
            ),
            None => log::info!(
                "frame {}: gain {:.2}, peak {:.0}, rms {:.0}",
                frame.seq,
                frame.gain,
                frame.peak(),
                frame.rms()
            ),
        }
    }
}
