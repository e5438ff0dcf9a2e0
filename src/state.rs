//! Frame loop state tracking

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Frame loop lifecycle.
///
/// `Idle → Streaming → (Capturing → Updating → Rendering → Streaming)* → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VisualizerState {
    /// Constructed, device not opened yet
    Idle = 0,

    /// Device open, waiting for the next tick
    Streaming = 1,

    /// Blocked on a chunk read
    Capturing = 2,

    /// Advancing the buffer and computing the frame
    Updating = 3,

    /// Handing the frame to the sink
    Rendering = 4,

    /// Device released; terminal
    Closed = 5,
}

impl VisualizerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Streaming,
            2 => Self::Capturing,
            3 => Self::Updating,
            4 => Self::Rendering,
            _ => Self::Closed,
        }
    }
}

/// State readable from other threads while the loop runs
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(VisualizerState::Idle as u8))
    }
}

impl StateCell {
    pub fn get(&self) -> VisualizerState {
        VisualizerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next`. `Closed` is terminal and never left.
    pub fn set(&self, next: VisualizerState) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == VisualizerState::Closed as u8 {
                    None
                } else {
                    Some(next as u8)
                }
            });
    }
}

/// Per-session frame loop counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Frames handed to the sink
    pub frames: u64,

    /// Ticks that finished after their deadline
    pub missed_deadlines: u64,

    /// Reads that timed out before a full chunk arrived
    pub read_timeouts: u64,

    /// Samples discarded by the capture adapter on overflow
    pub dropped_samples: u64,
}
