//! Stub capture example.
//!
//! Captures one second of noise from a stub input device, reading in
//! bursts larger than the device buffer to show silence padding.
//!
//! Run with: RUST_LOG=pcm_bridge=debug cargo run --example stub_capture

use std::time::Duration;

use pcm_bridge::{
    ChannelLayout, DeviceProfile, Direction, SampleFormat, StreamContext, StreamEngine,
    StreamEvent, StreamPosition,
};
use tracing_subscriber::EnvFilter;

const RATE: u32 = 16000;
const DEVICE_FRAMES: usize = 160;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let context = StreamContext::new(
        Direction::Input,
        RATE,
        ChannelLayout::Mono,
        SampleFormat::I16,
        DEVICE_FRAMES,
    );

    let mut engine = StreamEngine::builder(context)
        .device(DeviceProfile::attached(0, 0, Direction::Input).with_id("stub-mic"))
        .on_event(|event| {
            if let StreamEvent::SilenceInserted { frames } = event {
                println!("  padded {frames} frames of silence");
            }
        })
        .build()?;
    engine.start()?;

    // two device buffers per read: every burst comes up short
    let burst_frames = DEVICE_FRAMES * 2;
    let mut buffer = vec![0u8; burst_frames * 2];
    let mut position = StreamPosition::default();

    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(100));
        engine.transfer(&mut buffer, burst_frames)?;
        position.frames += burst_frames as i64;

        let peak = buffer
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]).unsigned_abs())
            .max()
            .unwrap_or(0);
        println!("read {burst_frames} frames, peak {peak}");
    }

    engine.refine_position(&mut position)?;
    println!("device position: {} frames", position.frames);

    engine.shutdown();
    let stats = engine.stats();
    println!(
        "\n{} transfers, {} silence frames inserted",
        stats.transfers, stats.silence_frames_inserted
    );

    Ok(())
}
