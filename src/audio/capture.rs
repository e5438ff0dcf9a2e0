//! Audio capture adapter: fixed-size blocks of mono 16-bit samples

use super::AudioConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig, StreamError, SupportedStreamConfig};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Chunks of headroom kept between the device callback and the reader
/// before the oldest samples are discarded
const OVERFLOW_CHUNKS: usize = 8;

/// Pipeline errors. All three are fatal to the frame loop.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// No input device, device busy, or the device cannot deliver the format
    #[error("Audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The stream broke after it was started
    #[error("Audio capture failed: {0}")]
    CaptureFailure(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
}

/// Anything that can hand the frame loop fixed-size chunks of samples.
///
/// Implementations own an exclusive input resource. The frame loop calls
/// [`ChunkSource::close`] exactly once, on every exit path.
pub trait ChunkSource {
    /// Rate the samples are delivered at
    fn sample_rate(&self) -> u32;

    /// Wait at most `timeout` for `chunk_size` samples.
    ///
    /// `Ok(None)` means the chunk is not complete yet; samples received so
    /// far stay queued for the next call.
    fn read_chunk(
        &mut self,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<i16>>, CaptureError>;

    /// Release the underlying device
    fn close(&mut self);

    /// Samples discarded so far because the reader fell behind
    fn dropped_samples(&self) -> u64 {
        0
    }
}

/// Samples queued between the device callback and the frame loop
struct Pending {
    samples: VecDeque<i16>,
    capacity: usize,
    dropped: u64,
    /// Backend errors the stream recovered from (xruns and the like)
    recovered_errors: u64,
    error: Option<String>,
}

impl Pending {
    fn push(&mut self, data: impl IntoIterator<Item = i16>) {
        self.samples.extend(data);
        let excess = self.samples.len().saturating_sub(self.capacity);
        if excess > 0 {
            // overflow: only the overflowed portion is lost
            self.samples.drain(..excess);
            self.dropped += excess as u64;
        }
    }

    fn take_chunk(&mut self, chunk_size: usize) -> Option<Vec<i16>> {
        if self.samples.len() < chunk_size {
            return None;
        }
        Some(self.samples.drain(..chunk_size).collect())
    }
}

struct Shared {
    pending: Mutex<Pending>,
    ready: Condvar,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Pending {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                dropped: 0,
                recovered_errors: 0,
                error: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Error callback of the cpal stream.
    ///
    /// Only a vanished device ends the session. Backend errors such as an
    /// ALSA overrun are reported while the stream keeps running, so they
    /// are logged and counted.
    fn on_stream_error(&self, err: StreamError) {
        let mut pending = self.pending.lock();
        match err {
            StreamError::DeviceNotAvailable => {
                log::error!("Audio stream error: {}", err);
                pending.error = Some(err.to_string());
                drop(pending);
                self.ready.notify_all();
            }
            StreamError::BackendSpecific { err } => {
                pending.recovered_errors += 1;
                log::warn!(
                    "Audio stream hiccup ({} so far): {}",
                    pending.recovered_errors,
                    err
                );
            }
        }
    }

    fn read_chunk(
        &self,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<i16>>, CaptureError> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        loop {
            if let Some(err) = pending.error.take() {
                return Err(CaptureError::CaptureFailure(err));
            }
            if let Some(chunk) = pending.take_chunk(chunk_size) {
                return Ok(Some(chunk));
            }
            if self.ready.wait_until(&mut pending, deadline).timed_out() {
                if let Some(err) = pending.error.take() {
                    return Err(CaptureError::CaptureFailure(err));
                }
                return Ok(pending.take_chunk(chunk_size));
            }
        }
    }
}

/// Microphone capture through cpal.
///
/// The cpal stream pushes mono samples into a bounded queue; `read_chunk`
/// blocks on a condition variable until a full chunk is there or the
/// timeout expires.
pub struct CpalCapture {
    stream: Option<cpal::Stream>,
    shared: Arc<Shared>,
    sample_rate: u32,
    device_name: String,
    reported_drops: u64,
}

impl CpalCapture {
    /// Open the configured input device at the configured rate.
    ///
    /// There is no fallback: a missing device, or one that cannot run at
    /// the requested rate, is `DeviceUnavailable`.
    pub fn open(config: &AudioConfig) -> Result<Self, CaptureError> {
        config.validate()?;

        let host = cpal::default_host();
        let device = match &config.device {
            Some(name) => host
                .input_devices()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!("input device not found: {}", name))
                })?,
            None => host.default_input_device().ok_or_else(|| {
                CaptureError::DeviceUnavailable("no default input device".to_string())
            })?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = pick_input_config(&device, config.sample_rate)?;
        let channels = supported.channels() as usize;
        let sample_format = supported.sample_format();
        let stream_config: StreamConfig = supported.into();

        log::info!(
            "Opening input '{}': {} Hz, {} channel(s), {:?} (downmixed to mono i16)",
            device_name,
            config.sample_rate,
            channels,
            sample_format
        );

        let shared = Arc::new(Shared::new(config.chunk_size * OVERFLOW_CHUNKS));

        let stream = match sample_format {
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, shared.clone(), channels)
            }
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, shared.clone(), channels)
            }
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, shared.clone(), channels)
            }
            other => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        log::info!("Audio capture started");

        Ok(Self {
            stream: Some(stream),
            shared,
            sample_rate: config.sample_rate,
            device_name,
            reported_drops: 0,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl ChunkSource for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_chunk(
        &mut self,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<i16>>, CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::CaptureFailure("stream is closed".to_string()));
        }
        let chunk = self.shared.read_chunk(chunk_size, timeout)?;

        let dropped = self.dropped_samples();
        if dropped > self.reported_drops {
            if self.reported_drops == 0 {
                log::warn!("Input overflow: frame loop fell behind, discarding oldest samples");
            }
            log::debug!("Input overflow: {} samples dropped so far", dropped);
            self.reported_drops = dropped;
        }

        Ok(chunk)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause input stream: {}", e);
            }
            drop(stream);
            log::info!("Released input device '{}'", self.device_name);
        }
    }

    fn dropped_samples(&self) -> u64 {
        self.shared.pending.lock().dropped
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Find a device config that runs at `sample_rate`, preferring mono and
/// native 16-bit samples
fn pick_input_config(
    device: &Device,
    sample_rate: u32,
) -> Result<SupportedStreamConfig, CaptureError> {
    let rate = SampleRate(sample_rate);
    let ranges = device
        .supported_input_configs()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    ranges
        .filter(|r| r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0)
        .filter(|r| {
            matches!(
                r.sample_format(),
                SampleFormat::I16 | SampleFormat::F32 | SampleFormat::U16
            )
        })
        .min_by_key(|r| {
            let channel_rank = if r.channels() == 1 { 0 } else { r.channels() as usize };
            let format_rank = if r.sample_format() == SampleFormat::I16 { 0 } else { 1 };
            (channel_rank, format_rank)
        })
        .map(|r| r.with_sample_rate(rate))
        .ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!(
                "device does not support {} Hz input",
                sample_rate
            ))
        })
}

/// Build input stream for given sample type
fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    shared: Arc<Shared>,
    channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    let channels = channels.max(1);
    let error_shared = shared.clone();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono = data.chunks(channels).map(|frame| {
                let sum: f32 = frame
                    .iter()
                    .map(|s| <f32 as cpal::Sample>::from_sample(*s))
                    .sum();
                <i16 as cpal::Sample>::from_sample(sum / channels as f32)
            });

            shared.pending.lock().push(mono);
            shared.ready.notify_one();
        },
        move |err| error_shared.on_stream_error(err),
        None,
    )
}
