mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{fake_device, FakeEngine, RecordingUnitFactory};
use loopcheck::audio::preprocess::PreprocessConfig;
use loopcheck::audio::session::LoopbackSession;
use loopcheck::logger;
use std::sync::Once;

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        let _ = logger::init_logger();
    });
}

#[test]
fn mono_frames_loop_back_in_fifo_order() {
    setup();
    let engine = FakeEngine::new();
    engine.add_device(fake_device("input_0", 8000, &[8000], 1, 0));
    engine.add_device(fake_device("output_0", 8000, &[8000], 0, 1));
    let factory = Arc::new(RecordingUnitFactory::new());
    let mut session = LoopbackSession::with_preprocess_factory(engine.clone(), factory);

    session
        .start_test("input_0", "output_0", 8000, 1, &PreprocessConfig::default())
        .expect("start");
    let frame_len = session.negotiated_format().unwrap().render.frame_samples();
    assert_eq!(frame_len, 320);

    for k in 0..5 {
        let frame = vec![k as f32 * 0.1; frame_len];
        assert!(engine.drive_capture(&frame, frame_len));
    }
    assert_eq!(session.queued_frames(), 5);

    let mut out = vec![0.0f32; frame_len];
    for k in 0..5 {
        assert!(engine.drive_playback(&mut out, frame_len));
        assert!(
            out.iter().all(|&s| (s - k as f32 * 0.1).abs() < 1e-6),
            "frame {} came back out of order",
            k
        );
    }

    // Capture has gone quiet: playback keeps running on silence.
    assert!(engine.drive_playback(&mut out, frame_len));
    assert!(out.iter().all(|&s| s == 0.0));

    session.stop_test();
}

#[test]
fn stereo_frames_survive_the_split_merge_round_trip() {
    setup();
    let engine = FakeEngine::new();
    engine.add_device(fake_device("input_0", 8000, &[8000], 2, 0));
    engine.add_device(fake_device("output_0", 8000, &[8000], 0, 2));
    let factory = Arc::new(RecordingUnitFactory::new());
    let mut session = LoopbackSession::with_preprocess_factory(engine.clone(), factory);

    session
        .start_test("input_0", "output_0", 8000, 2, &PreprocessConfig::default())
        .expect("start");
    let frame_len = session.negotiated_format().unwrap().render.frame_samples();

    // A stereo frame with distinct left/right content.
    let frame: Vec<f32> = (0..frame_len * 2)
        .map(|i| if i % 2 == 0 { i as f32 / 1000.0 } else { -(i as f32) / 1000.0 })
        .collect();
    assert!(engine.drive_capture(&frame, frame_len));

    let mut out = vec![0.0f32; frame_len * 2];
    assert!(engine.drive_playback(&mut out, frame_len));
    assert_eq!(out, frame);

    session.stop_test();
}

#[test]
fn resampled_pipeline_produces_render_length_frames() {
    setup();
    // Capture fixed at 48 kHz, render fixed at 44.1 kHz mono.
    let engine = FakeEngine::new();
    engine.add_device(fake_device("input_0", 48000, &[48000], 1, 0));
    engine.add_device(fake_device("output_0", 44100, &[44100], 0, 1));
    let factory = Arc::new(RecordingUnitFactory::new());
    let mut session = LoopbackSession::with_preprocess_factory(engine.clone(), factory);

    session
        .start_test("input_0", "output_0", 44100, 1, &PreprocessConfig::default())
        .expect("start");
    let fmt = session.negotiated_format().unwrap();
    assert!(fmt.needs_resample);
    let capture_len = fmt.capture.frame_samples();
    let render_len = fmt.render.frame_samples();

    for _ in 0..3 {
        let frame = vec![0.25f32; capture_len];
        assert!(engine.drive_capture(&frame, capture_len));
    }
    assert_eq!(session.queued_frames(), 3);

    let mut out = vec![0.0f32; render_len];
    assert!(engine.drive_playback(&mut out, render_len));
    // A constant signal stays constant through linear resampling; the last
    // couple of samples may still be settling on the very first frame.
    assert!(out[..render_len - 2]
        .iter()
        .all(|&s| (s - 0.25).abs() < 1e-4));

    session.stop_test();
}

#[test]
fn duplex_without_aec_never_invokes_echo_cancel() {
    setup();
    let engine = FakeEngine::new();
    engine.add_device(fake_device("input_0", 16000, &[16000], 1, 0));
    engine.add_device(fake_device("output_0", 16000, &[16000], 0, 1));
    let factory = RecordingUnitFactory::new();
    let counters = factory.counters.clone();
    let mut session = LoopbackSession::with_preprocess_factory(engine.clone(), Arc::new(factory));

    session
        .start_duplex_test("input_0", "output_0", 16000, 1, &PreprocessConfig::default())
        .expect("duplex start");
    let frame_len = 640;

    let capture = vec![0.3f32; frame_len];
    let mut output = vec![0.0f32; frame_len];
    assert!(engine.run_duplex_frame(&capture, &mut output, frame_len));

    // Output is the plain (pass-through preprocessed) capture signal.
    assert_eq!(counters.echo_calls.load(Ordering::SeqCst), 0);
    assert!(counters.preprocess_calls.load(Ordering::SeqCst) > 0);
    assert_eq!(output, capture);

    session.stop_test();
}

#[test]
fn duplex_echo_reference_is_the_previously_produced_frame() {
    setup();
    let engine = FakeEngine::new();
    engine.add_device(fake_device("input_0", 16000, &[16000], 1, 0));
    engine.add_device(fake_device("output_0", 16000, &[16000], 0, 1));
    let factory = RecordingUnitFactory::new();
    let counters = factory.counters.clone();
    let mut session = LoopbackSession::with_preprocess_factory(engine.clone(), Arc::new(factory));

    let config = PreprocessConfig {
        enable_aec: true,
        ..PreprocessConfig::default()
    };
    session
        .start_duplex_test("input_0", "output_0", 16000, 1, &config)
        .expect("duplex start");
    let frame_len = 640;

    // First cycle: the reference is silence (nothing rendered yet).
    let first = vec![0.4f32; frame_len];
    let mut output = vec![0.0f32; frame_len];
    assert!(engine.run_duplex_frame(&first, &mut output, frame_len));
    assert_eq!(counters.echo_calls.load(Ordering::SeqCst), 1);
    assert!(counters
        .last_reference
        .lock()
        .unwrap()
        .iter()
        .all(|&s| s == 0.0));

    // Second cycle: the reference must be exactly what the first cycle
    // produced.
    let second = vec![0.1f32; frame_len];
    let mut output2 = vec![0.0f32; frame_len];
    assert!(engine.run_duplex_frame(&second, &mut output2, frame_len));
    assert_eq!(*counters.last_reference.lock().unwrap(), output);

    session.stop_test();
}

#[test]
fn duplex_stereo_with_aec_cancels_both_channels() {
    setup();
    let engine = FakeEngine::new();
    engine.add_device(fake_device("input_0", 16000, &[16000], 2, 0));
    engine.add_device(fake_device("output_0", 16000, &[16000], 0, 2));
    let factory = RecordingUnitFactory::new();
    let counters = factory.counters.clone();
    let mut session = LoopbackSession::with_preprocess_factory(engine.clone(), Arc::new(factory));

    let config = PreprocessConfig {
        enable_aec: true,
        ..PreprocessConfig::default()
    };
    session
        .start_duplex_test("input_0", "output_0", 16000, 2, &config)
        .expect("duplex start");
    let frame_len = 640;

    let capture = vec![0.2f32; frame_len * 2];
    let mut output = vec![0.0f32; frame_len * 2];
    assert!(engine.run_duplex_frame(&capture, &mut output, frame_len));

    // One echo_cancel per channel per cycle.
    assert_eq!(counters.echo_calls.load(Ordering::SeqCst), 2);

    session.stop_test();
}
