//! Playback fan-out example.
//!
//! Plays a 440 Hz tone to two devices at once. Without the `hardware`
//! feature both devices are real-time stub devices; with it, the first
//! profile is opened on the default CPAL output.
//!
//! Run with: cargo run --example playback_fanout
//! Or:       cargo run --example playback_fanout --features hardware

use std::time::{Duration, Instant};

use pcm_bridge::{
    ChannelLayout, DeviceProfile, Direction, SampleFormat, StreamContext, StreamEngine,
    StreamEvent,
};
use tracing_subscriber::EnvFilter;

const RATE: u32 = 48000;
const CHUNK_FRAMES: usize = 480;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let context = StreamContext::new(
        Direction::Output,
        RATE,
        ChannelLayout::Stereo,
        SampleFormat::I16,
        CHUNK_FRAMES,
    );

    let builder = StreamEngine::builder(context)
        .device(DeviceProfile::attached(0, 0, Direction::Output))
        .device(DeviceProfile::from_address(
            "usb:CARD_1_DEV_0",
            Direction::Output,
            true,
        ))
        .gain(0.5)
        .on_event(|event| match event {
            StreamEvent::FramesDropped { device, frames } => {
                eprintln!("Warning: '{device}' dropped {frames} frames");
            }
            StreamEvent::DeviceError { device, error } => {
                eprintln!("Device '{device}' error: {error}");
            }
            _ => {}
        });
    #[cfg(feature = "hardware")]
    let builder = builder.opener(pcm_bridge::CpalOpener);

    let mut engine = builder.build()?;
    engine.start()?;
    println!("Playing to {} devices for 3 seconds...", engine.device_count());

    let chunk_duration = Duration::from_micros(CHUNK_FRAMES as u64 * 1_000_000 / u64::from(RATE));
    let mut phase = 0.0f32;
    let step = 440.0 * std::f32::consts::TAU / RATE as f32;
    let mut chunk = vec![0u8; CHUNK_FRAMES * 4];

    let started = Instant::now();
    let mut next = started;
    while started.elapsed() < Duration::from_secs(3) {
        for frame in chunk.chunks_exact_mut(4) {
            let sample = (phase.sin() * f32::from(i16::MAX) * 0.8) as i16;
            frame[..2].copy_from_slice(&sample.to_le_bytes());
            frame[2..].copy_from_slice(&sample.to_le_bytes());
            phase = (phase + step) % std::f32::consts::TAU;
        }

        let result = engine.transfer(&mut chunk, CHUNK_FRAMES)?;
        tracing::trace!(latency_ms = result.latency_ms, "chunk queued");

        next += chunk_duration;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    engine.drain(pcm_bridge::DrainMode::All)?;
    engine.standby();

    let stats = engine.stats();
    println!("\nPlayback complete!");
    println!(
        "{} transfers, {} frames dropped, {} device errors",
        stats.transfers, stats.frames_dropped, stats.device_errors
    );

    Ok(())
}
