//! Rendered buffers arriving as wire frames and landing in the mix.

use crate::helpers::tolerances::{FLOAT_EPSILON, SILENCE_THRESHOLD};
use crate::helpers::*;
use approx::assert_relative_eq;
use astrid::core::clock;
use astrid::ipc::wire;
use astrid::prelude::*;
use astrid::{SessionEvent, RENDER_BLOCK_FRAMES};

#[test]
fn test_frame_starts_after_requested_onset() {
    init_tracing();
    let (mut engine, mut feed, _session) = test_engine_with_session(1);

    let staircase = AudioBuffer::new(generate_integer_staircase(16), 1, TEST_SAMPLE_RATE_HZ).unwrap();
    // 1ms at 48kHz
    feed.accept_frame(&rendered_frame(&staircase, "pulsar", 1, 1_000_000))
        .unwrap();

    let out = engine.render(96);
    assert_silence(&out[..48], SILENCE_THRESHOLD);
    assert_eq!(&out[48..64], &generate_integer_staircase(16)[..]);
    assert_silence(&out[64..], SILENCE_THRESHOLD);
}

#[test]
fn test_two_voices_overlap_in_the_mix() {
    let (mut engine, mut feed, _session) = test_engine_with_session(1);

    let low = AudioBuffer::constant(0.25, 48, TEST_SAMPLE_RATE_HZ).unwrap();
    let high = AudioBuffer::constant(0.5, 48, TEST_SAMPLE_RATE_HZ).unwrap();
    feed.accept_frame(&rendered_frame(&low, "pulsar", 1, 0)).unwrap();
    // 0.5ms is 24 frames
    feed.accept_frame(&rendered_frame(&high, "marimba", 2, 500_000))
        .unwrap();

    let out = engine.render(96);
    for (i, &sample) in out.iter().enumerate() {
        let expected = match i {
            0..=23 => 0.25,
            24..=47 => 0.75,
            48..=71 => 0.5,
            _ => 0.0,
        };
        assert_relative_eq!(sample, expected, epsilon = FLOAT_EPSILON);
    }
}

#[test]
fn test_stereo_frame_keeps_channels_apart() {
    let (mut engine, mut feed, _session) = test_engine_with_session(2);

    let samples: Vec<f32> = (0..32).flat_map(|_| [0.3, -0.3]).collect();
    let buffer = AudioBuffer::new(samples, 2, TEST_SAMPLE_RATE_HZ).unwrap();
    feed.accept_frame(&rendered_frame(&buffer, "pad", 4, 0)).unwrap();

    let out = engine.render(32);
    for &sample in &channel(&out, 2, 0) {
        assert_relative_eq!(sample, 0.3, epsilon = FLOAT_EPSILON);
    }
    for &sample in &channel(&out, 2, 1) {
        assert_relative_eq!(sample, -0.3, epsilon = FLOAT_EPSILON);
    }
}

#[test]
fn test_late_frame_plays_immediately() {
    let (mut engine, mut feed, _session) = test_engine_with_session(1);

    let now = clock::now_nanos();
    // Asked for 10ms out, took 50ms to render
    let mut message = Message::new(MessageKind::Play, "pulsar", 3)
        .unwrap()
        .initiated_at(now - 50_000_000)
        .scheduled_in(10_000_000);
    message.mark_completed(now);
    let buffer = AudioBuffer::constant(0.5, 8, TEST_SAMPLE_RATE_HZ).unwrap();
    feed.accept_frame(&wire::serialize(&buffer, &message).unwrap())
        .unwrap();

    let out = engine.render(16);
    assert_relative_eq!(out[0], 0.5, epsilon = FLOAT_EPSILON);
    assert_silence(&out[8..], SILENCE_THRESHOLD);
}

#[test]
fn test_malformed_frame_does_not_disturb_the_feed() {
    let (mut engine, mut feed, session) = test_engine_with_session(1);

    let buffer = AudioBuffer::constant(0.5, 16, TEST_SAMPLE_RATE_HZ).unwrap();
    let frame = rendered_frame(&buffer, "pulsar", 1, 0);

    assert!(feed.accept_frame(&frame[..frame.len() / 2]).is_err());
    assert!(feed.accept_frame(&[]).is_err());
    assert!(session.events().is_empty());
    assert_eq!(feed.active_voices(), 0);

    feed.accept_frame(&frame).unwrap();
    let out = engine.render(16);
    assert_relative_eq!(out[15], 0.5, epsilon = FLOAT_EPSILON);
}

#[test]
fn test_session_follows_one_shot_voices() {
    let (mut engine, mut feed, session) = test_engine_with_session(1);

    let buffer = AudioBuffer::constant(0.1, 64, TEST_SAMPLE_RATE_HZ).unwrap();
    feed.accept_frame(&rendered_frame(&buffer, "pulsar", 1, 0)).unwrap();
    feed.accept_frame(&rendered_frame(&buffer, "pulsar", 2, 0)).unwrap();
    assert_eq!(feed.active_voices(), 2);

    engine.render_until_idle(TEST_SAMPLE_RATE_HZ as usize);
    let summary = feed.process_completions();
    assert_eq!(summary.stopped, 2);
    assert_eq!(summary.retriggered, 0);
    assert_eq!(feed.active_voices(), 0);

    let events = session.events();
    assert_eq!(events.len(), 4);
    for voice in [1, 2] {
        assert!(events.contains(&SessionEvent::Active {
            instrument: "pulsar".into(),
            voice
        }));
        assert!(events.contains(&SessionEvent::Stopped {
            instrument: "pulsar".into(),
            voice,
            renders: 1
        }));
    }

    // Buffers come back once the audio thread has swept
    engine.render(RENDER_BLOCK_FRAMES * 8);
    assert_eq!(feed.process_completions().released, 2);
}
