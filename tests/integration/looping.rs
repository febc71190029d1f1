//! Looping voices: the completion callback asks for the next iteration, the
//! delivery loop hands the request to the instrument, the renderer answers
//! with another buffer.

use crate::helpers::tolerances::FLOAT_EPSILON;
use crate::helpers::*;
use approx::assert_relative_eq;
use astrid::core::clock;
use astrid::ipc::wire;
use astrid::prelude::*;
use astrid::SessionEvent;
use std::sync::Arc;

/// Small blocks so callbacks run close to their due tick.
const BLOCK_FRAMES: usize = 32;
const LOOP_FRAMES: usize = 256;
const LOOP_LEAD: u64 = 64;

fn run_blocks(engine: &mut Engine, frames: usize) -> Vec<f32> {
    let channels = engine.channels();
    let mut out = vec![0.0; frames * channels];
    for block in out.chunks_mut(BLOCK_FRAMES * channels) {
        engine.process_block(block);
    }
    out
}

/// What a renderer sends back for a delivered request.
fn answer(request: &Message, buffer: &AudioBuffer) -> Vec<u8> {
    let mut reply = request.clone();
    reply.mark_completed(clock::now_nanos());
    wire::serialize(buffer, &reply).unwrap()
}

fn assert_level(samples: &[f32], level: f32) {
    for &sample in samples {
        assert_relative_eq!(sample, level, epsilon = FLOAT_EPSILON);
    }
}

#[test]
fn test_loop_iterations_play_back_to_back() {
    init_tracing();
    let session = Arc::new(RecordingSession::new());

    let mut router = ChannelRouter::new();
    let mut pulsar = router.register("pulsar", 8);
    let (delivery, submitter) = DeliveryLoop::new(DeliveryConfig::default(), router).unwrap();
    let mut delivery = delivery.spawn(submitter.clone()).unwrap();

    let (mut engine, mut feed) = Engine::builder()
        .offline()
        .channels(1)
        .session(session.clone())
        .retrigger(submitter)
        .loop_lead_frames(LOOP_LEAD)
        .build()
        .unwrap();

    let buffer = AudioBuffer::constant(0.5, LOOP_FRAMES, TEST_SAMPLE_RATE_HZ)
        .unwrap()
        .with_loop(true);
    feed.accept_frame(&rendered_frame(&buffer, "pulsar", 1, 0))
        .unwrap();

    let mut played = Vec::new();
    for iteration in 1..=3u64 {
        // Up to the loop lead: the callback fires in the last of these blocks
        let head = run_blocks(&mut engine, LOOP_FRAMES - LOOP_LEAD as usize);
        assert_level(&head, 0.5);
        played.extend(head);

        if iteration == 3 {
            feed.stop_voice(1);
        }
        let summary = feed.process_completions();
        if iteration < 3 {
            assert_eq!(summary.retriggered, 1, "iteration {iteration}");
        } else {
            assert_eq!(summary.retriggered, 0);
            assert_eq!(summary.stopped, 1);
        }

        // The rest of the current buffer plays while the request is in flight
        let tail = run_blocks(&mut engine, LOOP_LEAD as usize);
        assert_level(&tail, 0.5);
        played.extend(tail);

        if iteration < 3 {
            let request = pulsar.blocking_recv().unwrap();
            assert_eq!(request.kind, MessageKind::Play);
            assert_eq!(request.voice, 1);
            assert_eq!(
                request.timing.scheduled,
                clock::frames_to_nanos(LOOP_LEAD, TEST_SAMPLE_RATE_HZ)
            );
            feed.accept_frame(&answer(&request, &buffer)).unwrap();
        }
    }

    assert_eq!(played.len(), 3 * LOOP_FRAMES);
    assert!(!engine.scheduler().is_active());
    assert_eq!(session.renders_of(1), 2);
    assert_eq!(
        session.events().last(),
        Some(&SessionEvent::Stopped {
            instrument: "pulsar".into(),
            voice: 1,
            renders: 3
        })
    );

    let report = delivery.shutdown().unwrap();
    assert!(report.discarded.is_empty());
}

#[test]
fn test_loop_stops_when_delivery_is_gone() {
    let session = Arc::new(RecordingSession::new());
    let (delivery, submitter) =
        DeliveryLoop::new(DeliveryConfig::default(), ChannelRouter::new()).unwrap();
    let mut delivery = delivery.spawn(submitter.clone()).unwrap();

    let (mut engine, mut feed) = Engine::builder()
        .offline()
        .channels(1)
        .session(session.clone())
        .retrigger(submitter)
        .loop_lead_frames(LOOP_LEAD)
        .build()
        .unwrap();

    delivery.shutdown();
    assert!(!delivery.is_running());

    let buffer = AudioBuffer::constant(0.5, LOOP_FRAMES, TEST_SAMPLE_RATE_HZ)
        .unwrap()
        .with_loop(true);
    feed.accept_frame(&rendered_frame(&buffer, "pulsar", 7, 0))
        .unwrap();
    run_blocks(&mut engine, LOOP_FRAMES);

    let summary = feed.process_completions();
    assert_eq!(summary.retriggered, 0);
    assert_eq!(summary.stopped, 1);
    assert_eq!(session.renders_of(7), 0);
    assert_eq!(feed.active_voices(), 0);
}

#[test]
fn test_one_shot_among_loops_does_not_retrigger() {
    let (delivery, submitter) =
        DeliveryLoop::new(DeliveryConfig::default(), ChannelRouter::new()).unwrap();
    let _delivery = delivery.spawn(submitter.clone()).unwrap();
    let session = Arc::new(RecordingSession::new());

    let (mut engine, mut feed) = Engine::builder()
        .offline()
        .channels(1)
        .session(session.clone())
        .retrigger(submitter)
        .loop_lead_frames(LOOP_LEAD)
        .build()
        .unwrap();

    let one_shot = AudioBuffer::constant(0.25, 64, TEST_SAMPLE_RATE_HZ).unwrap();
    feed.accept_frame(&rendered_frame(&one_shot, "kick", 1, 0))
        .unwrap();
    run_blocks(&mut engine, 64);

    let summary = feed.process_completions();
    assert_eq!(summary.retriggered, 0);
    assert_eq!(summary.stopped, 1);
    assert_eq!(session.renders_of(1), 0);
}
