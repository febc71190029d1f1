//! Event scheduling as seen from the audio callback.

use crate::helpers::tolerances::{FLOAT_EPSILON, SILENCE_THRESHOLD};
use crate::helpers::*;
use approx::assert_relative_eq;
use astrid::prelude::*;
use astrid::{CompletionCallback, CompletionInfo, EventState, RENDER_BLOCK_FRAMES};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One tick per block: housekeeping runs after every frame.
fn tick(engine: &mut Engine) -> Vec<f32> {
    let mut frame = vec![0.0; engine.channels()];
    engine.process_block(&mut frame);
    frame
}

#[test]
fn test_event_plays_for_its_length_then_recycles() {
    let mut engine = test_engine(1);
    let event = engine
        .handle()
        .schedule(AudioBuffer::constant(0.5, 100, 48000).unwrap(), 0, None, 0)
        .unwrap();

    for n in 0..99 {
        tick(&mut engine);
        assert_eq!(
            engine.scheduler().state_of(event.id()),
            Some(EventState::Playing),
            "after tick {n}"
        );
    }
    tick(&mut engine);
    assert_eq!(
        engine.scheduler().state_of(event.id()),
        Some(EventState::Recycled)
    );
    assert!(!engine.scheduler().is_active());
}

#[test]
fn test_overlapping_events_sum() {
    let mut engine = test_engine(1);
    let handle = engine.handle();
    handle
        .schedule(AudioBuffer::constant(1.0, 10, 48000).unwrap(), 0, None, 0)
        .unwrap();
    handle
        .schedule(AudioBuffer::constant(1.0, 10, 48000).unwrap(), 5, None, 0)
        .unwrap();

    let out = engine.render(15);
    for (i, &sample) in out.iter().enumerate() {
        let expected = match i {
            0..=4 => 1.0,
            5..=9 => 2.0,
            _ => 1.0,
        };
        assert_relative_eq!(sample, expected, epsilon = FLOAT_EPSILON);
    }
}

#[test]
fn test_callback_fires_once_after_delay() {
    let mut engine = test_engine(1);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let callback: CompletionCallback = Box::new(move |info: CompletionInfo| {
        assert_eq!(info.tick, 50);
        counter.fetch_add(1, Ordering::SeqCst);
        true
    });
    engine
        .handle()
        .schedule(
            AudioBuffer::constant(0.5, 100, 48000).unwrap(),
            0,
            Some(callback),
            50,
        )
        .unwrap();

    for _ in 0..50 {
        tick(&mut engine);
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    for _ in 0..200 {
        tick(&mut engine);
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_mono_staircase_reaches_every_output_channel() {
    let mut engine = test_engine(2);
    let staircase = AudioBuffer::new(generate_integer_staircase(32), 1, 48000).unwrap();
    engine.handle().schedule(staircase, 8, None, 0).unwrap();

    let out = engine.render(48);
    for index in 0..2 {
        let ch = channel(&out, 2, index);
        assert_silence(&ch[..8], SILENCE_THRESHOLD);
        assert_eq!(&ch[8..40], &generate_integer_staircase(32)[..]);
        assert_silence(&ch[40..], SILENCE_THRESHOLD);
    }
}

#[test]
fn test_idle_engine_outputs_silence() {
    let mut engine = test_engine(2);
    let out = engine.render(1024);
    assert_silence(&out, SILENCE_THRESHOLD);
    assert_eq!(engine.scheduler().current_tick(), 1024);
}

#[test]
fn test_stats_visible_from_other_thread() {
    let mut engine = test_engine(1);
    let handle = engine.handle();
    handle
        .schedule(AudioBuffer::constant(0.1, 64, 48000).unwrap(), 0, None, 0)
        .unwrap();
    handle
        .schedule(AudioBuffer::constant(0.1, 64, 48000).unwrap(), 1000, None, 0)
        .unwrap();

    engine.render(10);

    let observer = std::thread::spawn(move || {
        let stats = handle.stats();
        (stats.waiting(), stats.playing(), stats.tick())
    });
    assert_eq!(observer.join().unwrap(), (1, 1, 10));
}

#[test]
fn test_concurrent_producer() {
    let mut engine = test_engine(1);
    let handle = engine.handle();

    let producer = std::thread::spawn(move || {
        for _ in 0..100 {
            while handle
                .schedule(AudioBuffer::constant(0.01, 16, 48000).unwrap(), 0, None, 0)
                .is_err()
            {
                std::thread::yield_now();
            }
        }
    });

    let mut total = 0.0f32;
    let mut rendered = 0;
    while !producer.is_finished() || engine.scheduler().is_active() || rendered < 16 {
        total += engine.render(64).iter().sum::<f32>();
        rendered += 1;
    }
    producer.join().unwrap();
    total += engine.render_until_idle(48000).iter().sum::<f32>();

    // Every event contributed all 16 of its frames
    assert_relative_eq!(total, 100.0 * 16.0 * 0.01, epsilon = 1e-3);
}

#[test]
fn test_swept_slots_are_reused() {
    let mut engine = Engine::builder()
        .offline()
        .channels(1)
        .event_capacity(8)
        .build_engine()
        .unwrap();
    let handle = engine.handle();

    for _ in 0..4 {
        for _ in 0..8 {
            handle
                .schedule(AudioBuffer::constant(0.2, 4, 48000).unwrap(), 0, None, 0)
                .unwrap();
        }
        // Long enough for the default sweep cadence
        engine.render(RENDER_BLOCK_FRAMES * 8);
        handle.collect_released();
    }

    let scheduler = engine.scheduler();
    assert_eq!(scheduler.count_waiting(), 0);
    assert_eq!(scheduler.count_playing(), 0);
    // 32 events went through the 8 preallocated slots without growing
    assert_eq!(scheduler.count_recycled(), 8);
}
