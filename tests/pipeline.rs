//! Headless end-to-end runs of the frame pipeline with synthetic input

use live_scope_lib::audio::{AudioConfig, CaptureError, ChunkSource, Sensitivity};
use live_scope_lib::sink::Frame;
use live_scope_lib::state::{StateCell, VisualizerState};
use live_scope_lib::visualizer::{FrameLoop, VisualizerHandle};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Serves a prerecorded signal chunk by chunk, then blocks like an idle
/// microphone
struct SignalSource {
    rate: u32,
    signal: Vec<i16>,
    pos: usize,
    closes: Arc<AtomicUsize>,
}

impl SignalSource {
    fn new(rate: u32, signal: Vec<i16>, closes: Arc<AtomicUsize>) -> Self {
        Self {
            rate,
            signal,
            pos: 0,
            closes,
        }
    }
}

impl ChunkSource for SignalSource {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn read_chunk(
        &mut self,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<i16>>, CaptureError> {
        if self.pos + chunk_size > self.signal.len() {
            thread::sleep(timeout);
            return Ok(None);
        }
        let chunk = self.signal[self.pos..self.pos + chunk_size].to_vec();
        self.pos += chunk_size;
        Ok(Some(chunk))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn default_loop(signal: Vec<i16>, closes: Arc<AtomicUsize>) -> FrameLoop<SignalSource> {
    let config = AudioConfig::default();
    let source = SignalSource::new(config.sample_rate, signal, closes);
    FrameLoop::new(
        config,
        source,
        Arc::new(Sensitivity::default()),
        Arc::new(StateCell::default()),
    )
    .unwrap()
}

#[test]
fn buffer_holds_most_recent_two_seconds_after_87_chunks() {
    let history: Vec<i16> = (0..87 * 1024)
        .map(|i: usize| ((i * 7) % 65536) as u16 as i16)
        .collect();
    assert_eq!(history.len(), 89088);

    let closes = Arc::new(AtomicUsize::new(0));
    let mut frame_loop = default_loop(history.clone(), closes.clone());

    let mut frames = 0;
    let mut sink = |frame: &Frame| {
        assert_eq!(frame.waveform.len(), 88200);
        frames += 1;
    };
    for _ in 0..87 {
        assert!(frame_loop.tick(&mut sink).unwrap());
    }
    assert_eq!(frames, 87);

    let buffer = frame_loop.buffer();
    assert_eq!(buffer.len(), 88200);
    assert_eq!(buffer.total_written(), 89088);
    // the oldest 888 samples of the input history have fallen off
    assert_eq!(buffer.to_vec(), history[888..].to_vec());

    drop(frame_loop);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn sine_input_peaks_at_440_hz_in_every_slice() {
    let rate = 44100u32;
    let signal: Vec<i16> = (0..87 * 1024)
        .map(|i| {
            let t = i as f32 / rate as f32;
            (10000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect();

    let closes = Arc::new(AtomicUsize::new(0));
    let mut frame_loop = default_loop(signal, closes);

    let mut last: Option<Frame> = None;
    let mut sink = |frame: &Frame| last = Some(frame.clone());
    for _ in 0..87 {
        frame_loop.tick(&mut sink).unwrap();
    }

    let frame = last.expect("a frame was emitted");
    let grid = &frame.spectrogram;
    let bin_width = rate as f32 / 512.0;

    assert_eq!(grid.num_bins(), 257);
    assert_eq!(grid.frequencies[0], 0.0);
    assert_eq!(*grid.frequencies.last().unwrap(), 22050.0);
    assert_eq!(grid.num_slices(), 343);
    for t in 0..grid.num_slices() {
        let freq = grid.frequencies[grid.peak_bin(t).unwrap()];
        assert!(
            (freq - 440.0).abs() <= bin_width,
            "slice {t} peaked at {freq} Hz"
        );
    }
    let dominant = grid.dominant_frequency().unwrap();
    assert!((dominant - 440.0).abs() <= bin_width);
}

#[test]
fn silent_input_yields_floor_spectrogram() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut frame_loop = default_loop(vec![0; 1024], closes);

    let mut last: Option<Frame> = None;
    let mut sink = |frame: &Frame| last = Some(frame.clone());
    frame_loop.tick(&mut sink).unwrap();

    let frame = last.unwrap();
    assert!(frame.waveform.iter().all(|&v| v == 0.0));
    for &v in frame.spectrogram.values() {
        assert!((v - -100.0).abs() < 1e-3, "got {v}");
    }
}

#[test]
fn gain_scales_the_waveform() {
    let closes = Arc::new(AtomicUsize::new(0));
    let config = AudioConfig::default();
    let source = SignalSource::new(config.sample_rate, vec![1000; 2048], closes);
    let sensitivity = Arc::new(Sensitivity::new(2.5));
    let mut frame_loop = FrameLoop::new(
        config,
        source,
        sensitivity,
        Arc::new(StateCell::default()),
    )
    .unwrap();

    let mut peaks = Vec::new();
    let mut sink = |frame: &Frame| peaks.push(frame.peak());
    frame_loop.tick(&mut sink).unwrap();

    assert_eq!(peaks, vec![2500.0]);
}

#[test]
fn stop_while_capture_is_blocked_releases_device_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let source_closes = closes.clone();
    let config = AudioConfig::default();
    let rate = config.sample_rate;
    let chunk_duration = config.chunk_duration();

    let received = Arc::new(AtomicUsize::new(0));
    let sink_received = received.clone();

    // three chunks of data, then the source blocks on every read
    let mut handle = VisualizerHandle::spawn(
        config,
        move |_: &AudioConfig| Ok(SignalSource::new(rate, vec![0; 3 * 1024], source_closes)),
        move |_: &Frame| {
            sink_received.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();

    let wait_start = Instant::now();
    while received.load(Ordering::SeqCst) < 3 && wait_start.elapsed() < Duration::from_secs(10) {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(received.load(Ordering::SeqCst), 3);
    thread::sleep(chunk_duration / 2);
    assert_ne!(handle.state(), VisualizerState::Closed);

    let stop_start = Instant::now();
    let stats = handle.stop().unwrap();
    assert!(stop_start.elapsed() < chunk_duration + Duration::from_millis(500));

    assert_eq!(stats.frames, 3);
    assert_eq!(handle.state(), VisualizerState::Closed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    drop(handle);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}
