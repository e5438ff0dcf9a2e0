//! Live Scope Library
//!
//! Real-time microphone pipeline: a rolling sample buffer feeding a
//! smoothed waveform and a short-time Fourier spectrogram every frame,
//! with a live sensitivity control.

pub mod audio;
pub mod sink;
pub mod state;
pub mod visualizer;

use audio::{
    list_input_devices, AudioConfig, CaptureError, CpalCapture, GainControl, Sensitivity,
};
use sink::{Frame, FrameSink, JsonLinesSink, LogSink};
use visualizer::VisualizerHandle;

use clap::Parser;
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Frames between summaries when logging instead of emitting JSON (~1 s)
const LOG_EVERY_FRAMES: u64 = 33;

/// How often the control loop checks whether the frame loop has died
const CONTROL_POLL: Duration = Duration::from_millis(100);

/// Command line: process defaults only
#[derive(Debug, Parser)]
#[command(name = "live-scope")]
#[command(about = "Real-time microphone waveform and spectrogram with sensitivity control")]
pub struct Cli {
    /// Sample rate in Hz
    #[arg(short, long, default_value_t = 44100)]
    pub rate: u32,

    /// Samples per capture read
    #[arg(short, long, default_value_t = 1024)]
    pub chunk: usize,

    /// Seconds of audio kept in the rolling buffer
    #[arg(short, long, default_value_t = 2.0)]
    pub buffer_seconds: f32,

    /// Input device name (use --list-devices to see options)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Initial sensitivity, 0.1 to 5.0
    #[arg(short, long, default_value_t = 1.0)]
    pub gain: f32,

    /// Write one JSON frame summary per line to stdout
    #[arg(long)]
    pub json: bool,

    /// List input devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

impl Cli {
    /// Pipeline configuration for these flags
    pub fn config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.rate,
            chunk_size: self.chunk,
            buffer_seconds: self.buffer_seconds,
            device: self.device.clone(),
            ..Default::default()
        }
    }
}

/// Entry point for the binary
pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<(), CaptureError> {
    if cli.list_devices {
        for device in list_input_devices()? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{}", device.name, marker);
        }
        return Ok(());
    }

    let config = cli.config();
    config.validate()?;

    log::info!("Starting real-time waveform and spectrogram visualization with sensitivity control");
    log::debug!("Configuration: {:?}", config);

    let sink: Box<dyn FnMut(&Frame) + Send> = if cli.json {
        let mut json = JsonLinesSink::new(io::stdout());
        Box::new(move |frame: &Frame| json.on_frame(frame))
    } else {
        let mut logger = LogSink::new(LOG_EVERY_FRAMES);
        Box::new(move |frame: &Frame| logger.on_frame(frame))
    };

    let sensitivity = Arc::new(Sensitivity::default());
    let control = GainControl::new(sensitivity.clone());
    control.set(cli.gain);

    let (events_tx, events_rx) = mpsc::channel();
    spawn_control_reader(events_tx.clone());
    install_shutdown_handler(events_tx);

    let mut handle =
        VisualizerHandle::spawn_with_sensitivity(config, sensitivity, CpalCapture::open, sink)?;
    log::info!("Controls: 'gain <0.1-5.0>', '+', '-', 'reset', 'quit' (or Ctrl-C)");

    control_loop(&events_rx, &control, || handle.is_finished());

    let stats = handle.stop()?;
    log::info!(
        "Visualization stopped after {} frames ({} late)",
        stats.frames,
        stats.missed_deadlines
    );
    Ok(())
}

/// Input to the control loop
#[derive(Debug)]
enum ControlEvent {
    /// One line typed on stdin
    Line(String),
    /// Ctrl-C or a termination request
    Shutdown,
}

/// Apply control input until `quit`, a shutdown request, or the frame loop
/// exiting on its own
fn control_loop(
    events: &mpsc::Receiver<ControlEvent>,
    control: &GainControl,
    finished: impl Fn() -> bool,
) {
    while !finished() {
        match events.recv_timeout(CONTROL_POLL) {
            Ok(ControlEvent::Line(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "q" {
                    return;
                }
                match control.apply_command(line) {
                    Ok(gain) => log::info!("Sensitivity {:.2}", gain),
                    Err(e) => log::warn!("{}", e),
                }
            }
            Ok(ControlEvent::Shutdown) => {
                log::info!("Shutdown requested");
                return;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // neither stdin nor a signal handler left; only a loop failure ends us
                thread::sleep(CONTROL_POLL);
            }
        }
    }
}

/// Turn Ctrl-C into a shutdown event so the device is released on exit
fn install_shutdown_handler(tx: mpsc::Sender<ControlEvent>) {
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(ControlEvent::Shutdown);
    }) {
        log::warn!("Ctrl-C handler unavailable: {}", e);
    }
}

/// Read control lines from stdin on a separate thread
fn spawn_control_reader(tx: mpsc::Sender<ControlEvent>) {
    let spawned = thread::Builder::new()
        .name("control-input".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(ControlEvent::Line(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("Control input error: {}", e);
                        break;
                    }
                }
            }
            log::debug!("Control input closed");
        });
    if let Err(e) = spawned {
        log::warn!("Control input unavailable: {}", e);
    }
}
