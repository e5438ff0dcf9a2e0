//! Frame orchestration: capture → buffer → gain → smooth/transform → sink

use crate::audio::{
    smooth, AudioConfig, CaptureError, ChunkSource, GainControl, RollingBuffer, Sensitivity,
    SpectrogramEngine,
};
use crate::sink::{Frame, FrameSink};
use crate::state::{FrameStats, StateCell, VisualizerState};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Commands sent to the frame loop thread
pub enum Command {
    Stop,
}

/// Owns a chunk source and releases it exactly once.
///
/// Closing happens on explicit `close` or on drop, whichever comes first,
/// so every normal exit path of the frame loop (including `?` returns)
/// gives the device back. Unwinding panics drop it too; with
/// `panic = "abort"` the process ends without running it.
struct SourceGuard<S: ChunkSource> {
    source: S,
    closed: bool,
    state: Arc<StateCell>,
}

impl<S: ChunkSource> SourceGuard<S> {
    fn new(source: S, state: Arc<StateCell>) -> Self {
        Self {
            source,
            closed: false,
            state,
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source.close();
        self.state.set(VisualizerState::Closed);
        log::info!("Frame loop closed");
    }
}

impl<S: ChunkSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// The per-frame pipeline over one open chunk source
pub struct FrameLoop<S: ChunkSource> {
    config: AudioConfig,
    source: SourceGuard<S>,
    buffer: RollingBuffer,
    engine: SpectrogramEngine,
    sensitivity: Arc<Sensitivity>,
    state: Arc<StateCell>,
    stats: FrameStats,
    started: Instant,
}

impl<S: ChunkSource> FrameLoop<S> {
    /// Take ownership of an open source and allocate the pipeline.
    ///
    /// On a configuration error the source is closed before returning.
    pub fn new(
        config: AudioConfig,
        source: S,
        sensitivity: Arc<Sensitivity>,
        state: Arc<StateCell>,
    ) -> Result<Self, CaptureError> {
        let source = SourceGuard::new(source, state.clone());

        config.validate()?;
        if source.source.sample_rate() != config.sample_rate {
            return Err(CaptureError::ConfigurationError(format!(
                "source delivers {} Hz but {} Hz was configured",
                source.source.sample_rate(),
                config.sample_rate
            )));
        }

        let buffer = RollingBuffer::new(config.buffer_size())?;
        let engine =
            SpectrogramEngine::new(config.sample_rate, config.segment_length, config.overlap)?;

        log::debug!(
            "Frame loop ready: buffer {} samples, chunk {}, {} spectrogram slices",
            buffer.len(),
            config.chunk_size,
            engine.num_slices(buffer.len())
        );

        Ok(Self {
            config,
            source,
            buffer,
            engine,
            sensitivity,
            state,
            stats: FrameStats::default(),
            started: Instant::now(),
        })
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn buffer(&self) -> &RollingBuffer {
        &self.buffer
    }

    /// One capture attempt and, if a chunk arrived, one frame.
    ///
    /// Returns `Ok(false)` when the bounded read timed out before a full
    /// chunk was available.
    pub fn tick<K: FrameSink + ?Sized>(&mut self, sink: &mut K) -> Result<bool, CaptureError> {
        self.state.set(VisualizerState::Capturing);
        let chunk = self
            .source
            .source
            .read_chunk(self.config.chunk_size, self.config.read_timeout())?;

        let chunk = match chunk {
            Some(chunk) => chunk,
            None => {
                self.stats.read_timeouts += 1;
                self.state.set(VisualizerState::Streaming);
                return Ok(false);
            }
        };
        if chunk.len() != self.config.chunk_size {
            return Err(CaptureError::CaptureFailure(format!(
                "short read: expected {} samples, got {}",
                self.config.chunk_size,
                chunk.len()
            )));
        }

        self.state.set(VisualizerState::Updating);
        self.buffer.advance(&chunk)?;

        // one gain read per frame; both views share the snapshot
        let gain = self.sensitivity.gain();
        let snapshot = self.buffer.scaled(gain);
        let waveform = smooth(&snapshot, self.config.smoothing_window);
        let spectrogram = self.engine.compute(&snapshot);

        let frame = Frame {
            seq: self.stats.frames,
            gain,
            waveform,
            spectrogram,
            timestamp: self.started.elapsed().as_secs_f64(),
        };

        self.state.set(VisualizerState::Rendering);
        sink.on_frame(&frame);
        self.stats.frames += 1;

        self.state.set(VisualizerState::Streaming);
        Ok(true)
    }

    /// Run frames at the configured interval until a stop command, a
    /// disconnected command channel, or a fatal error.
    ///
    /// The source is released before this returns, whatever the outcome.
    pub fn run<K: FrameSink + ?Sized>(
        mut self,
        sink: &mut K,
        commands: &mpsc::Receiver<Command>,
    ) -> Result<FrameStats, CaptureError> {
        self.state.set(VisualizerState::Streaming);
        log::info!(
            "Frame loop started: {} Hz, chunk {}, every {:?}",
            self.config.sample_rate,
            self.config.chunk_size,
            self.config.frame_interval
        );

        let result = loop {
            match commands.try_recv() {
                Ok(Command::Stop) => {
                    log::info!("Frame loop stopping");
                    break Ok(());
                }
                Err(mpsc::TryRecvError::Disconnected) => {
                    log::info!("Frame loop command channel disconnected");
                    break Ok(());
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }

            let deadline = Instant::now() + self.config.frame_interval;
            match self.tick(sink) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => break Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                self.stats.missed_deadlines += 1;
                continue;
            }
            // wait out the rest of the frame, but wake at once on stop
            match commands.recv_timeout(deadline - now) {
                Ok(Command::Stop) => {
                    log::info!("Frame loop stopping");
                    break Ok(());
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    log::info!("Frame loop command channel disconnected");
                    break Ok(());
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
        };

        self.stats.dropped_samples = self.source.source.dropped_samples();
        self.source.close();

        log::info!(
            "Frame loop finished: {} frames, {} missed deadlines, {} samples dropped",
            self.stats.frames,
            self.stats.missed_deadlines,
            self.stats.dropped_samples
        );

        result.map(|_| self.stats.clone())
    }
}

/// Handle to a frame loop running on its own thread.
///
/// The chunk source is opened on that thread and never leaves it.
pub struct VisualizerHandle {
    command_tx: mpsc::Sender<Command>,
    thread_handle: Option<JoinHandle<Result<FrameStats, CaptureError>>>,
    sensitivity: Arc<Sensitivity>,
    state: Arc<StateCell>,
}

impl VisualizerHandle {
    /// Open a source with `open` on a new thread and start the frame loop.
    ///
    /// Returns once the source is open; a failure to open (e.g.
    /// `DeviceUnavailable`) is returned here rather than from `stop`.
    pub fn spawn<S, O, K>(config: AudioConfig, open: O, sink: K) -> Result<Self, CaptureError>
    where
        S: ChunkSource + 'static,
        O: FnOnce(&AudioConfig) -> Result<S, CaptureError> + Send + 'static,
        K: FrameSink + Send + 'static,
    {
        Self::spawn_with_sensitivity(config, Arc::new(Sensitivity::default()), open, sink)
    }

    /// Like [`VisualizerHandle::spawn`], with a sensitivity seeded by the
    /// caller so the very first frame already uses its gain
    pub fn spawn_with_sensitivity<S, O, K>(
        config: AudioConfig,
        sensitivity: Arc<Sensitivity>,
        open: O,
        mut sink: K,
    ) -> Result<Self, CaptureError>
    where
        S: ChunkSource + 'static,
        O: FnOnce(&AudioConfig) -> Result<S, CaptureError> + Send + 'static,
        K: FrameSink + Send + 'static,
    {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let state = Arc::new(StateCell::default());

        let loop_sensitivity = sensitivity.clone();
        let loop_state = state.clone();

        let thread_handle = thread::Builder::new()
            .name("frame-loop".to_string())
            .spawn(move || {
                let frame_loop = open(&config).and_then(|source| {
                    FrameLoop::new(config, source, loop_sensitivity, loop_state.clone())
                });
                let frame_loop = match frame_loop {
                    Ok(frame_loop) => frame_loop,
                    Err(e) => {
                        loop_state.set(VisualizerState::Closed);
                        let _ = ready_tx.send(Err(e));
                        return Ok(FrameStats::default());
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let result = frame_loop.run(&mut sink, &command_rx);
                if let Err(e) = &result {
                    log::error!("Frame loop error: {}", e);
                }
                result
            })
            .map_err(|e| CaptureError::CaptureFailure(format!("failed to spawn frame loop: {}", e)))?;

        let mut handle = Self {
            command_tx,
            thread_handle: Some(thread_handle),
            sensitivity,
            state,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::CaptureFailure(
                    "frame loop exited during startup".to_string(),
                ))
            }
        }
    }

    /// The exposed, range-enforcing gain control
    pub fn control(&self) -> GainControl {
        GainControl::new(self.sensitivity.clone())
    }

    pub fn sensitivity(&self) -> &Arc<Sensitivity> {
        &self.sensitivity
    }

    pub fn state(&self) -> VisualizerState {
        self.state.get()
    }

    /// True once the loop thread has exited, for any reason
    pub fn is_finished(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }

    /// Stop the loop and wait for the device to be released.
    ///
    /// Returns the session statistics, or the fatal error that ended the
    /// loop first. Calling it again returns empty statistics.
    pub fn stop(&mut self) -> Result<FrameStats, CaptureError> {
        let _ = self.command_tx.send(Command::Stop);
        self.join()
    }

    fn join(&mut self) -> Result<FrameStats, CaptureError> {
        match self.thread_handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(CaptureError::CaptureFailure(
                    "frame loop thread panicked".to_string(),
                ))
            }),
            None => Ok(FrameStats::default()),
        }
    }
}

impl Drop for VisualizerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
