//! Integration tests for pcm-bridge.
//!
//! Every test drives a real `StreamEngine` with worker threads against
//! in-memory devices. Tests that require actual audio hardware live next to
//! `CpalDevice` and are marked with `#[ignore]`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use pcm_bridge::{
    CapturePosition, ChannelLayout, DeviceError, DeviceOpener, DeviceProfile, DeviceProxy,
    Direction, DrainMode, EngineError, MockDevice, OpenMode, PcmConfig, PresentationPosition,
    SampleFormat, StreamContext, StreamEngine, StreamEvent, StreamPosition, StreamState,
};

/// Opener that hands out fresh mock devices and remembers them.
#[derive(Clone, Default)]
struct MockRig {
    opened: Arc<Mutex<Vec<Arc<MockDevice>>>>,
    open_calls: Arc<AtomicUsize>,
}

impl MockRig {
    fn opener<F>(&self, setup: F) -> impl DeviceOpener
    where
        F: Fn(&DeviceProfile, &MockDevice) -> Result<(), DeviceError> + Send + Sync + 'static,
    {
        let rig = self.clone();
        move |profile: &DeviceProfile,
              config: &PcmConfig,
              _mode: OpenMode|
              -> Result<Arc<dyn DeviceProxy>, DeviceError> {
            rig.open_calls.fetch_add(1, Ordering::SeqCst);
            let device = Arc::new(MockDevice::new(profile.id.as_str(), config.frame_size()));
            setup(profile, &*device)?;
            rig.opened.lock().unwrap().push(device.clone());
            Ok(device)
        }
    }

    fn plain_opener(&self) -> impl DeviceOpener {
        self.opener(|_, _| Ok(()))
    }

    fn devices(&self) -> Vec<Arc<MockDevice>> {
        self.opened.lock().unwrap().clone()
    }

    fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// True when nothing but the rig references any opened device.
    fn released(&self) -> bool {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .all(|device| Arc::strong_count(device) == 1)
    }
}

/// A device whose transfers hang until it is stopped.
#[derive(Default)]
struct StallingDevice {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StallingDevice {
    fn stall(&self) -> Result<(), DeviceError> {
        let mut stopped = self.stopped.lock().unwrap();
        while !*stopped {
            stopped = self.wake.wait(stopped).unwrap();
        }
        Err(DeviceError::Stopped)
    }
}

impl DeviceProxy for StallingDevice {
    fn name(&self) -> &str {
        "stalling"
    }

    fn read(&self, _buf: &mut [u8]) -> Result<(), DeviceError> {
        self.stall()
    }

    fn write(&self, _buf: &[u8]) -> Result<(), DeviceError> {
        self.stall()
    }

    fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        self.wake.notify_all();
    }

    fn latency_ms(&self) -> u32 {
        0
    }

    fn capture_position(&self) -> Result<CapturePosition, DeviceError> {
        Ok(CapturePosition::default())
    }

    fn presentation_position(&self) -> Result<PresentationPosition, DeviceError> {
        Ok(PresentationPosition::default())
    }

    fn reset_transferred_frames(&self, _frames: i64) {}
}

fn context(direction: Direction, buffer_frames: usize) -> StreamContext {
    StreamContext::new(
        direction,
        48000,
        ChannelLayout::Stereo,
        SampleFormat::I16,
        buffer_frames,
    )
}

fn output(id: &str) -> DeviceProfile {
    DeviceProfile::attached(0, 0, Direction::Output).with_id(id)
}

fn input(id: &str) -> DeviceProfile {
    DeviceProfile::attached(0, 0, Direction::Input).with_id(id)
}

fn collect_events() -> (Arc<Mutex<Vec<StreamEvent>>>, impl Fn(StreamEvent) + Send + Sync) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (events, move |event| sink.lock().unwrap().push(event))
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn i16_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn i16_values(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[test]
fn test_output_fans_out_to_every_device() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 64))
        .devices([output("speaker"), output("hdmi")])
        .opener(rig.plain_opener())
        .build()
        .unwrap();

    engine.start().unwrap();
    assert_eq!(engine.state(), StreamState::Active);
    assert_eq!(engine.device_count(), 2);

    let original = i16_bytes(&(0..128).collect::<Vec<i16>>());
    let mut chunk = original.clone();
    let result = engine.transfer(&mut chunk, 64).unwrap();
    assert_eq!(result.actual_frame_count, 64);

    for device in rig.devices() {
        wait_until("device to receive the chunk", || device.written_frames() == 64);
        assert_eq!(device.written(), original);
    }

    engine.standby();
    assert_eq!(engine.state(), StreamState::Idle);
}

#[test]
fn test_transfer_never_blocks_on_full_pipes() {
    let stalled = Arc::new(StallingDevice::default());
    let opener = {
        let stalled = stalled.clone();
        move |_: &DeviceProfile, _: &PcmConfig, _: OpenMode| {
            Ok::<Arc<dyn DeviceProxy>, DeviceError>(stalled.clone())
        }
    };
    let (events, on_event) = collect_events();
    let mut engine = StreamEngine::builder(context(Direction::Output, 32))
        .device(output("stalled"))
        .opener(opener)
        .on_event(on_event)
        .build()
        .unwrap();
    engine.start().unwrap();

    let mut chunk = vec![0u8; 32 * 4];
    for _ in 0..20 {
        let started = Instant::now();
        let result = engine.transfer(&mut chunk, 32).unwrap();
        assert_eq!(result.actual_frame_count, 32);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    let stats = engine.stats();
    assert_eq!(stats.transfers, 20);
    assert!(stats.frames_dropped > 0);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, StreamEvent::FramesDropped { frames, .. } if *frames > 0)));

    let started = Instant::now();
    engine.shutdown();
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_input_underrun_pads_with_silence() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Input, 8))
        .device(input("mic"))
        .opener(rig.plain_opener())
        .build()
        .unwrap();
    engine.start().unwrap();

    let mic = rig.devices().remove(0);
    let captured: Vec<u8> = (1..=32).collect();
    mic.push_capture(&captured);
    // the second read only starts once the first chunk sits in the pipe
    wait_until("first chunk to reach the pipe", || mic.read_attempts() >= 2);

    let mut buffer = vec![0xAA; 12 * 4];
    let result = engine.transfer(&mut buffer, 12).unwrap();
    assert_eq!(result.actual_frame_count, 12);
    assert_eq!(&buffer[..32], captured.as_slice());
    assert!(buffer[32..].iter().all(|&b| b == 0));
    assert_eq!(engine.stats().silence_frames_inserted, 4);

    engine.standby();
    assert!(mic.is_stopped());
}

#[test]
fn test_input_binds_a_single_device() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Input, 16))
        .devices([input("mic"), output("speaker"), input("line-in")])
        .opener(rig.plain_opener())
        .build()
        .unwrap();

    engine.start().unwrap();
    assert_eq!(engine.device_count(), 1);
    assert_eq!(rig.open_calls(), 1);
    assert_eq!(rig.devices()[0].name(), "mic");
}

#[test]
fn test_standby_releases_everything_and_restart_is_fresh() {
    let rig = MockRig::default();
    let (events, on_event) = collect_events();
    let mut engine = StreamEngine::builder(context(Direction::Output, 64))
        .devices([output("a"), output("b")])
        .opener(rig.plain_opener())
        .on_event(on_event)
        .build()
        .unwrap();

    engine.start().unwrap();
    engine.standby();

    assert!(rig.devices().iter().all(|d| d.is_stopped()));
    // workers are joined and the engine dropped its handles
    assert!(rig.released());
    let stopped = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, StreamEvent::WorkerStopped { .. }))
        .count();
    assert_eq!(stopped, 2);

    engine.start().unwrap();
    assert_eq!(rig.open_calls(), 4);
    let all = rig.devices();
    assert!(all[..2].iter().all(|d| d.stop_calls() == 1));
    assert!(all[2..].iter().all(|d| !d.is_stopped()));
    assert_eq!(engine.stats().workers_started, 4);
    drop(all);

    engine.shutdown();
    assert!(rig.released());
}

#[test]
fn test_failing_device_does_not_affect_others() {
    let rig = MockRig::default();
    let (events, on_event) = collect_events();
    let mut engine = StreamEngine::builder(context(Direction::Output, 32))
        .devices([output("good"), output("bad")])
        .opener(rig.opener(|profile, device| {
            if profile.id.as_str() == "bad" {
                device.set_fail_writes(true);
            }
            Ok(())
        }))
        .on_event(on_event)
        .build()
        .unwrap();
    engine.start().unwrap();

    let devices = rig.devices();
    let (good, bad) = (&devices[0], &devices[1]);

    let mut expected = Vec::new();
    for round in 0..4u8 {
        let mut chunk = vec![round; 32 * 4];
        expected.extend_from_slice(&chunk);
        let result = engine.transfer(&mut chunk, 32).unwrap();
        assert_eq!(result.actual_frame_count, 32);
        wait_until("good device to keep up", || good.written().len() == expected.len());
    }
    assert_eq!(good.written(), expected);
    assert!(bad.written().is_empty());

    wait_until("bad device errors", || engine.stats().device_errors > 0);
    engine.standby();

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::DeviceError { device, .. } => Some(device.as_str()),
            _ => None,
        })
        .all(|device| device == "bad"));
}

#[test]
fn test_scenario_stereo_48k_with_half_gain() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 960))
        .devices([output("speaker"), output("usb")])
        .opener(rig.plain_opener())
        .build()
        .unwrap();

    engine.start().unwrap();
    assert_eq!(engine.stats().workers_started, 2);
    engine.set_gain(0.5);

    let original: Vec<i16> = (0..960 * 2).map(|i| ((i * 37) % 20000 - 10000) as i16).collect();
    let mut chunk = i16_bytes(&original);
    let result = engine.transfer(&mut chunk, 960).unwrap();
    assert_eq!(result.actual_frame_count, 960);

    for device in rig.devices() {
        wait_until("full chunk on device", || device.written_frames() == 960);
        for (out, src) in i16_values(&device.written()).iter().zip(&original) {
            let want = (f64::from(*src) * 0.5).round();
            assert!((f64::from(*out) - want).abs() <= 4.0, "{src} -> {out}");
        }
    }

    let started = Instant::now();
    engine.standby();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(rig.released());
}

#[test]
fn test_start_without_matching_devices_fails() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 64))
        .device(input("mic"))
        .opener(rig.plain_opener())
        .build()
        .unwrap();

    let err = engine.start().unwrap_err();
    assert!(matches!(err, EngineError::NotInitialized { .. }));
    assert_eq!(engine.state(), StreamState::Idle);
    assert_eq!(rig.open_calls(), 0);
}

#[test]
fn test_open_failure_releases_opened_devices() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 64))
        .devices([output("ok"), output("broken")])
        .opener(rig.opener(|profile, _| {
            if profile.id.as_str() == "broken" {
                Err(DeviceError::open_failed("broken", "rate mismatch"))
            } else {
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let err = engine.start().unwrap_err();
    assert!(matches!(err, EngineError::NotInitialized { .. }));
    assert!(err.to_string().contains("broken"));
    assert_eq!(engine.state(), StreamState::Idle);
    assert_eq!(engine.stats().workers_started, 0);

    assert_eq!(rig.devices().len(), 1);
    assert!(rig.released());
}

#[test]
fn test_start_is_idempotent() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 64))
        .device(output("speaker"))
        .opener(rig.plain_opener())
        .build()
        .unwrap();

    engine.start().unwrap();
    engine.pause().unwrap();
    engine.flush().unwrap();
    engine.start().unwrap();
    assert_eq!(rig.open_calls(), 1);
    assert_eq!(engine.stats().workers_started, 1);
}

#[test]
fn test_latency_is_max_over_devices_and_capped() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 16))
        .devices([output("fast"), output("slow")])
        .opener(rig.opener(|profile, device| {
            device.set_latency_ms(if profile.id.as_str() == "fast" { 5 } else { 20 });
            Ok(())
        }))
        .build()
        .unwrap();
    engine.start().unwrap();

    let mut chunk = vec![0u8; 16 * 4];
    assert_eq!(engine.transfer(&mut chunk, 16).unwrap().latency_ms, 20);

    rig.devices()[1].set_latency_ms(u32::MAX);
    assert_eq!(engine.transfer(&mut chunk, 16).unwrap().latency_ms, i32::MAX);
}

#[test]
fn test_refine_position_output_folds_counter() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 16))
        .device(output("speaker"))
        .opener(rig.plain_opener())
        .build()
        .unwrap();
    engine.start().unwrap();

    let speaker = rig.devices().remove(0);
    speaker.set_presentation_frames(i64::MAX as u64 + 5);

    let mut position = StreamPosition {
        frames: 4800,
        time_ns: 0,
    };
    engine.refine_position(&mut position).unwrap();
    assert_eq!(position.frames, 5);
    assert_eq!(speaker.resets(), vec![4800]);
}

#[test]
fn test_refine_position_failure_keeps_position() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 16))
        .device(output("speaker"))
        .opener(rig.opener(|_, device| {
            device.set_fail_positions(true);
            Ok(())
        }))
        .build()
        .unwrap();
    engine.start().unwrap();

    let mut position = StreamPosition {
        frames: 1234,
        time_ns: 99,
    };
    let err = engine.refine_position(&mut position).unwrap_err();
    assert!(matches!(err, EngineError::InvalidOperation { .. }));
    assert_eq!(
        position,
        StreamPosition {
            frames: 1234,
            time_ns: 99
        }
    );
}

#[test]
fn test_refine_position_input_uses_capture_position() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Input, 16))
        .device(input("mic"))
        .opener(rig.plain_opener())
        .build()
        .unwrap();
    engine.start().unwrap();

    let mut position = StreamPosition {
        frames: 480,
        time_ns: 0,
    };
    engine.refine_position(&mut position).unwrap();
    assert_eq!(position.frames, 480);
    assert!(position.time_ns > 0);
}

#[test]
fn test_refine_position_without_devices() {
    let engine = StreamEngine::builder(context(Direction::Output, 16))
        .device(output("speaker"))
        .build()
        .unwrap();
    let mut position = StreamPosition::default();
    assert!(matches!(
        engine.refine_position(&mut position),
        Err(EngineError::NotInitialized { .. })
    ));
}

#[test]
#[should_panic(expected = "no open devices")]
fn test_transfer_without_devices_panics() {
    let mut engine = StreamEngine::builder(context(Direction::Output, 16))
        .build()
        .unwrap();
    let mut chunk = vec![0u8; 16 * 4];
    let _ = engine.transfer(&mut chunk, 16);
}

#[test]
fn test_drain_waits_one_buffer_for_output_only() {
    let output_engine = StreamEngine::builder(context(Direction::Output, 960))
        .build()
        .unwrap();
    let started = Instant::now();
    output_engine.drain(DrainMode::All).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));

    let input_engine = StreamEngine::builder(context(Direction::Input, 48000))
        .build()
        .unwrap();
    let started = Instant::now();
    input_engine.drain(DrainMode::EarlyNotify).unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_gain_control_from_another_thread() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Output, 4))
        .device(output("speaker"))
        .opener(rig.plain_opener())
        .build()
        .unwrap();
    engine.start().unwrap();

    let control = engine.gain_control();
    std::thread::spawn(move || control.set(0.0)).join().unwrap();
    assert_eq!(engine.gain(), 0.0);

    let mut chunk = i16_bytes(&[1000; 8]);
    engine.transfer(&mut chunk, 4).unwrap();
    let speaker = rig.devices().remove(0);
    wait_until("silent chunk", || speaker.written_frames() == 4);
    assert!(speaker.written().iter().all(|&b| b == 0));
}

#[test]
fn test_stub_devices_stream_end_to_end() {
    let mut engine = StreamEngine::builder(context(Direction::Input, 480))
        .device(input("stub"))
        .build()
        .unwrap();
    engine.start().unwrap();

    std::thread::sleep(Duration::from_millis(30));
    let mut buffer = vec![0u8; 480 * 4];
    engine.transfer(&mut buffer, 480).unwrap();
    assert!(buffer.iter().any(|&b| b != 0));
    engine.shutdown();
}

#[test]
fn test_workers_counted_when_start_returns() {
    let rig = MockRig::default();
    let (events, on_event) = collect_events();
    let mut engine = StreamEngine::builder(context(Direction::Output, 64))
        .devices([output("a"), output("b"), output("c")])
        .opener(rig.plain_opener())
        .on_event(on_event)
        .build()
        .unwrap();

    engine.start().unwrap();
    assert_eq!(engine.stats().workers_started, 3);
    let started = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, StreamEvent::WorkerStarted { .. }))
        .count();
    assert_eq!(started, 3);
}

#[test]
fn test_standby_releases_capture_worker_blocked_on_full_pipe() {
    let rig = MockRig::default();
    let mut engine = StreamEngine::builder(context(Direction::Input, 8))
        .device(input("mic"))
        .opener(rig.opener(|_, device| {
            // ten device buffers against an eight-frame pipe
            device.push_capture(&[0x5A; 10 * 8 * 4]);
            Ok(())
        }))
        .build()
        .unwrap();
    engine.start().unwrap();

    let mic = rig.devices().remove(0);
    // the second chunk is read only after the first filled the pipe
    wait_until("second capture read", || mic.read_attempts() >= 2);
    std::thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    engine.standby();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(mic.is_stopped());
    assert_eq!(engine.state(), StreamState::Idle);
    drop(mic);
    assert!(rig.released());
}

#[test]
fn test_failing_capture_reads_yield_silence() {
    let rig = MockRig::default();
    let (events, on_event) = collect_events();
    let mut engine = StreamEngine::builder(context(Direction::Input, 16))
        .device(input("mic"))
        .opener(rig.opener(|_, device| {
            device.set_fail_reads(true);
            Ok(())
        }))
        .on_event(on_event)
        .build()
        .unwrap();
    engine.start().unwrap();

    wait_until("read errors", || engine.stats().device_errors >= 2);

    let mut buffer = vec![0xAA; 16 * 4];
    let result = engine.transfer(&mut buffer, 16).unwrap();
    assert_eq!(result.actual_frame_count, 16);
    assert!(buffer.iter().all(|&b| b == 0));
    assert_eq!(engine.stats().silence_frames_inserted, 16);
    assert_eq!(engine.state(), StreamState::Active);

    engine.standby();
    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::DeviceError { device, .. } if device.as_str() == "mic")));
}

#[test]
#[should_panic(expected = "too short")]
fn test_transfer_rejects_overflowing_frame_count() {
    let mut engine = StreamEngine::builder(context(Direction::Output, 16))
        .build()
        .unwrap();
    let mut chunk = vec![0u8; 16 * 4];
    let _ = engine.transfer(&mut chunk, usize::MAX);
}
