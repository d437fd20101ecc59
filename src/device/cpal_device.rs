//! CPAL-backed playback and capture devices.
//!
//! `cpal::Stream` is not `Send`, so each device owns a host thread that
//! builds the stream, keeps it alive and drops it on stop. Samples cross
//! between the cpal callback and the blocking `read`/`write` through a byte
//! ring buffer.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SizedSample, Stream, StreamConfig as CpalStreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::{
    CapturePosition, DeviceOpener, DeviceProfile, DeviceProxy, OpenMode, PresentationPosition,
};
use crate::context::frames_to_duration;
use crate::{DeviceError, Direction, PcmConfig, SampleFormat};

/// Poll interval while waiting on the callback side of the ring.
const RING_POLL: Duration = Duration::from_millis(1);

/// Samples the cpal callbacks know how to move as little-endian bytes.
trait LeSample: SizedSample + Send + 'static {
    const BYTES: usize;
    fn from_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
}

impl LeSample for i16 {
    const BYTES: usize = 2;
    fn from_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }
    fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }
}

impl LeSample for i32 {
    const BYTES: usize = 4;
    fn from_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }
}

impl LeSample for f32 {
    const BYTES: usize = 4;
    fn from_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }
}

enum ClientEnd {
    Playback(Mutex<HeapProd<u8>>),
    Capture(Mutex<HeapCons<u8>>),
}

enum CallbackEnd {
    Playback(HeapCons<u8>),
    Capture(HeapProd<u8>),
}

struct HostThread {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// A real playback or capture device driven by cpal.
///
/// The device is selected by matching the profile id against cpal device
/// names; when nothing matches, the host's default device for the
/// direction is used. Only [`SampleFormat::I16`], [`SampleFormat::I32`] and
/// [`SampleFormat::F32`] are supported.
pub struct CpalDevice {
    name: String,
    config: PcmConfig,
    ring: ClientEnd,
    stopped: AtomicBool,
    transferred_frames: AtomicI64,
    started: Instant,
    host: Mutex<Option<HostThread>>,
}

impl CpalDevice {
    /// Opens the device described by `profile` and starts its stream.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::OpenFailed`] if no device is available, the
    /// format is unsupported, an external device cannot match the config
    /// exactly, or the stream fails to start.
    pub fn open(
        profile: &DeviceProfile,
        config: &PcmConfig,
        mode: OpenMode,
    ) -> Result<Self, DeviceError> {
        let name = profile.id.to_string();
        if !matches!(
            config.format,
            SampleFormat::I16 | SampleFormat::I32 | SampleFormat::F32
        ) {
            return Err(DeviceError::open_failed(
                name,
                format!("unsupported sample format {:?}", config.format),
            ));
        }

        let capacity = config.buffer_size_frames * 2 * config.frame_size();
        let (producer, consumer) = HeapRb::<u8>::new(capacity.max(1)).split();
        let (ring, callback_end) = match profile.direction {
            Direction::Output => (
                ClientEnd::Playback(Mutex::new(producer)),
                CallbackEnd::Playback(consumer),
            ),
            Direction::Input => (
                ClientEnd::Capture(Mutex::new(consumer)),
                CallbackEnd::Capture(producer),
            ),
        };

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), DeviceError>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_config = *config;
        let thread_name = name.clone();
        let direction = profile.direction;
        let handle = std::thread::Builder::new()
            .name(format!("cpal-{name}"))
            .spawn(move || {
                let started =
                    start_stream(&thread_name, direction, &thread_config, mode, callback_end);
                let stream = match started {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns on stop or when the device handle is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!(device = %thread_name, "cpal stream closed");
            })
            .map_err(|e| DeviceError::open_failed(&name, e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(DeviceError::open_failed(&name, "host thread exited")));
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        tracing::info!(device = %name, ?mode, "opened cpal device");
        Ok(Self {
            name,
            config: *config,
            ring,
            stopped: AtomicBool::new(false),
            transferred_frames: AtomicI64::new(0),
            started: Instant::now(),
            host: Mutex::new(Some(HostThread {
                shutdown: shutdown_tx,
                handle,
            })),
        })
    }

    fn transfer_timeout(&self) -> Duration {
        frames_to_duration(self.config.buffer_size_frames as u64, self.config.sample_rate) * 2
    }

    fn check_running(&self) -> Result<(), DeviceError> {
        if self.stopped.load(Ordering::Acquire) {
            Err(DeviceError::Stopped)
        } else {
            Ok(())
        }
    }

    fn buffered_frames(&self) -> i64 {
        let bytes = match &self.ring {
            ClientEnd::Playback(producer) => producer.lock().occupied_len(),
            ClientEnd::Capture(consumer) => consumer.lock().occupied_len(),
        };
        (bytes / self.config.frame_size()) as i64
    }

    fn add_transferred(&self, bytes: usize) {
        self.transferred_frames
            .fetch_add((bytes / self.config.frame_size()) as i64, Ordering::AcqRel);
    }

    fn now_ns(&self) -> i64 {
        i64::try_from(self.started.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn close(&self) {
        if let Some(host) = self.host.lock().take() {
            let _ = host.shutdown.send(());
            if host.handle.join().is_err() {
                tracing::warn!(device = %self.name, "cpal host thread panicked");
            }
        }
    }
}

impl DeviceProxy for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, buf: &mut [u8]) -> Result<(), DeviceError> {
        let ClientEnd::Capture(consumer) = &self.ring else {
            return Err(DeviceError::custom("read from a playback device"));
        };
        let deadline = Instant::now() + self.transfer_timeout();
        let mut filled = 0;
        while filled < buf.len() {
            self.check_running()?;
            // lock per attempt so latency queries never wait on a stalled read
            filled += consumer.lock().pop_slice(&mut buf[filled..]);
            if filled < buf.len() {
                if Instant::now() >= deadline {
                    if filled == 0 {
                        return Err(DeviceError::transient("capture timed out"));
                    }
                    buf[filled..].fill(0);
                    break;
                }
                std::thread::sleep(RING_POLL);
            }
        }
        self.add_transferred(buf.len());
        Ok(())
    }

    fn write(&self, buf: &[u8]) -> Result<(), DeviceError> {
        let ClientEnd::Playback(producer) = &self.ring else {
            return Err(DeviceError::custom("write to a capture device"));
        };
        let deadline = Instant::now() + self.transfer_timeout();
        let mut pushed = 0;
        while pushed < buf.len() {
            self.check_running()?;
            pushed += producer.lock().push_slice(&buf[pushed..]);
            if pushed < buf.len() {
                if Instant::now() >= deadline {
                    if pushed == 0 {
                        return Err(DeviceError::transient("playback timed out"));
                    }
                    tracing::trace!(
                        device = %self.name,
                        dropped_bytes = buf.len() - pushed,
                        "playback ring full"
                    );
                    break;
                }
                std::thread::sleep(RING_POLL);
            }
        }
        self.add_transferred(pushed);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.close();
    }

    fn latency_ms(&self) -> u32 {
        let frames = self.buffered_frames().max(0) as u64;
        let latency = frames_to_duration(frames, self.config.sample_rate);
        u32::try_from(latency.as_millis()).unwrap_or(u32::MAX)
    }

    fn capture_position(&self) -> Result<CapturePosition, DeviceError> {
        if !matches!(self.ring, ClientEnd::Capture(_)) {
            return Err(DeviceError::position_unavailable("not a capture device"));
        }
        Ok(CapturePosition {
            frames: self.transferred_frames.load(Ordering::Acquire) + self.buffered_frames(),
            time_ns: self.now_ns(),
        })
    }

    fn presentation_position(&self) -> Result<PresentationPosition, DeviceError> {
        if !matches!(self.ring, ClientEnd::Playback(_)) {
            return Err(DeviceError::position_unavailable("not a playback device"));
        }
        let presented = self.transferred_frames.load(Ordering::Acquire) - self.buffered_frames();
        Ok(PresentationPosition {
            frames: presented.max(0) as u64,
            time_ns: self.now_ns(),
        })
    }

    fn reset_transferred_frames(&self, frames: i64) {
        self.transferred_frames.store(frames, Ordering::Release);
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opener that binds every profile to a [`CpalDevice`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalOpener;

impl DeviceOpener for CpalOpener {
    fn open(
        &self,
        profile: &DeviceProfile,
        config: &PcmConfig,
        mode: OpenMode,
    ) -> Result<Arc<dyn DeviceProxy>, DeviceError> {
        Ok(Arc::new(CpalDevice::open(profile, config, mode)?))
    }
}

/// Lists the names of the host's output devices.
///
/// # Errors
///
/// Returns an error if the audio host cannot be accessed.
pub fn list_output_devices() -> Result<Vec<String>, DeviceError> {
    let devices = cpal::default_host()
        .output_devices()
        .map_err(|e| DeviceError::custom(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn cpal_format(format: SampleFormat) -> Option<cpal::SampleFormat> {
    match format {
        SampleFormat::I16 => Some(cpal::SampleFormat::I16),
        SampleFormat::I32 => Some(cpal::SampleFormat::I32),
        SampleFormat::F32 => Some(cpal::SampleFormat::F32),
        SampleFormat::I24Packed | SampleFormat::I24Padded => None,
    }
}

fn find_device(name: &str, direction: Direction) -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    let devices = match direction {
        Direction::Output => host.output_devices(),
        Direction::Input => host.input_devices(),
    }
    .map_err(|e| DeviceError::open_failed(name, e.to_string()))?;

    for device in devices {
        if device.name().is_ok_and(|n| n == name) {
            return Ok(device);
        }
    }

    let fallback = match direction {
        Direction::Output => host.default_output_device(),
        Direction::Input => host.default_input_device(),
    };
    fallback.ok_or_else(|| DeviceError::open_failed(name, "no default device"))
}

fn ensure_exact_match(
    device: &Device,
    name: &str,
    direction: Direction,
    config: &PcmConfig,
) -> Result<(), DeviceError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Output => device
            .supported_output_configs()
            .map_err(|e| DeviceError::open_failed(name, e.to_string()))?
            .collect(),
        Direction::Input => device
            .supported_input_configs()
            .map_err(|e| DeviceError::open_failed(name, e.to_string()))?
            .collect(),
    };
    let wanted = cpal_format(config.format);
    let supported = ranges.iter().any(|range| {
        range.channels() == config.channels
            && Some(range.sample_format()) == wanted
            && range.min_sample_rate().0 <= config.sample_rate
            && config.sample_rate <= range.max_sample_rate().0
    });
    if supported {
        Ok(())
    } else {
        Err(DeviceError::open_failed(
            name,
            format!(
                "no exact match for {} ch / {} Hz / {:?}",
                config.channels, config.sample_rate, config.format
            ),
        ))
    }
}

fn start_stream(
    name: &str,
    direction: Direction,
    config: &PcmConfig,
    mode: OpenMode,
    end: CallbackEnd,
) -> Result<Stream, DeviceError> {
    let stream = build_stream(name, direction, config, mode, end)?;
    stream
        .play()
        .map_err(|e| DeviceError::open_failed(name, e.to_string()))?;
    Ok(stream)
}

fn build_stream(
    name: &str,
    direction: Direction,
    config: &PcmConfig,
    mode: OpenMode,
    end: CallbackEnd,
) -> Result<Stream, DeviceError> {
    let device = find_device(name, direction)?;
    let buffer_size = match mode {
        OpenMode::Attached { buffer_size_frames } => {
            cpal::BufferSize::Fixed(u32::try_from(buffer_size_frames).unwrap_or(u32::MAX))
        }
        OpenMode::External { require_exact_match } => {
            if require_exact_match {
                ensure_exact_match(&device, name, direction, config)?;
            }
            cpal::BufferSize::Default
        }
    };
    let stream_config = CpalStreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size,
    };

    let cfg = &stream_config;
    let built = match (config.format, end) {
        (SampleFormat::I16, CallbackEnd::Playback(c)) => build_output::<i16>(&device, cfg, c),
        (SampleFormat::I32, CallbackEnd::Playback(c)) => build_output::<i32>(&device, cfg, c),
        (SampleFormat::F32, CallbackEnd::Playback(c)) => build_output::<f32>(&device, cfg, c),
        (SampleFormat::I16, CallbackEnd::Capture(p)) => build_input::<i16>(&device, cfg, p),
        (SampleFormat::I32, CallbackEnd::Capture(p)) => build_input::<i32>(&device, cfg, p),
        (SampleFormat::F32, CallbackEnd::Capture(p)) => build_input::<f32>(&device, cfg, p),
        (format, _) => {
            return Err(DeviceError::open_failed(
                name,
                format!("unsupported sample format {format:?}"),
            ))
        }
    };
    built.map_err(|e| DeviceError::open_failed(name, e.to_string()))
}

fn build_output<T: LeSample>(
    device: &Device,
    config: &CpalStreamConfig,
    mut consumer: HeapCons<u8>,
) -> Result<Stream, cpal::BuildStreamError> {
    let mut scratch = [0u8; 4];
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for sample in data.iter_mut() {
                if consumer.occupied_len() >= T::BYTES {
                    consumer.pop_slice(&mut scratch[..T::BYTES]);
                    *sample = T::from_le(&scratch[..T::BYTES]);
                } else {
                    *sample = T::EQUILIBRIUM;
                }
            }
        },
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )
}

fn build_input<T: LeSample>(
    device: &Device,
    config: &CpalStreamConfig,
    mut producer: HeapProd<u8>,
) -> Result<Stream, cpal::BuildStreamError> {
    let mut scratch = [0u8; 4];
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Non-blocking push - drops samples if buffer is full
            for &sample in data {
                if producer.vacant_len() < T::BYTES {
                    break;
                }
                sample.write_le(&mut scratch[..T::BYTES]);
                producer.push_slice(&scratch[..T::BYTES]);
            }
        },
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )
}
