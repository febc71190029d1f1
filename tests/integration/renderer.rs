//! A simulated renderer process talking to the engine over Unix sockets.
//!
//! Control messages go out through the delivery loop and a per-instrument
//! socket; finished buffers come back over the buffer bus. Voice ids come from
//! the shared counter, as they would across real processes.
#![cfg(unix)]

use crate::helpers::tolerances::FLOAT_EPSILON;
use crate::helpers::*;
use approx::assert_relative_eq;
use astrid::core::clock;
use astrid::ipc::transport::{bus_path, forward_messages};
use astrid::ipc::{BufferBus, MessageTransport, TransportListener};
use astrid::prelude::*;
use astrid::{SessionEvent, SharedCounter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const INSTRUMENT: &str = "pulsar";

/// Answer every Play request with a constant buffer at `voice / 10`, until
/// an addressed shutdown arrives. Returns the voices in the order requested.
async fn run_renderer(listener: TransportListener, bus: std::path::PathBuf) -> Vec<u64> {
    let mut control = listener.accept().await.unwrap();
    let mut output = MessageTransport::connect(&bus).await.unwrap();

    let mut order = Vec::new();
    while let Some(mut request) = control.recv_message().await.unwrap() {
        if request.is_shutdown() {
            break;
        }
        order.push(request.voice);
        request.mark_completed(clock::now_nanos());
        let buffer =
            AudioBuffer::constant(request.voice as f32 / 10.0, 32, TEST_SAMPLE_RATE_HZ).unwrap();
        output.send_buffer(&buffer, &request).await.unwrap();
    }
    order
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requests_round_trip_through_a_renderer() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let bus_socket = bus_path(dir.path());
    let mut bus = BufferBus::bind(&bus_socket, 16).unwrap();

    let control_socket = astrid::ipc::channel_path(dir.path(), INSTRUMENT);
    let listener = TransportListener::bind(&control_socket).unwrap();
    let renderer = tokio::spawn(run_renderer(listener, bus_socket));

    let mut router = ChannelRouter::new();
    let requests = router.register(INSTRUMENT, 16);
    let control = MessageTransport::connect(&control_socket).await.unwrap();
    let forwarder = tokio::spawn(forward_messages(requests, control));

    let (delivery, submitter) = DeliveryLoop::new(DeliveryConfig::default(), router).unwrap();
    let delivery = tokio::spawn(delivery.run());

    // Submitted out of order; delivered by due time
    submitter
        .submit(
            Message::new(MessageKind::Play, INSTRUMENT, 1)
                .unwrap()
                .scheduled_in(4_000_000),
        )
        .unwrap();
    submitter
        .submit(
            Message::new(MessageKind::Play, INSTRUMENT, 2)
                .unwrap()
                .scheduled_in(1_000_000),
        )
        .unwrap();
    submitter
        .submit(
            Message::new(MessageKind::Shutdown, INSTRUMENT, 0)
                .unwrap()
                .scheduled_in(8_000_000),
        )
        .unwrap();
    submitter
        .submit(Message::shutdown().scheduled_in(10_000_000))
        .unwrap();

    let order = renderer.await.unwrap();
    assert_eq!(order, vec![2, 1]);
    assert_eq!(forwarder.await.unwrap().unwrap(), 3);
    let report = delivery.await.unwrap();
    assert_eq!(report.delivered, 3);
    assert!(report.discarded.is_empty());

    // Both answers are waiting on the bus
    let session = Arc::new(RecordingSession::new());
    let (mut engine, mut feed) = Engine::builder()
        .offline()
        .channels(1)
        .session(session.clone())
        .build()
        .unwrap();
    for _ in 0..2 {
        let frame = bus.recv().await.unwrap();
        feed.accept_frame(&frame).unwrap();
    }

    // Both were late by the time they arrived
    let out = engine.render(48);
    for &sample in &out[..32] {
        assert_relative_eq!(sample, 0.3, epsilon = FLOAT_EPSILON);
    }
    assert_silence(&out[32..], FLOAT_EPSILON);
    assert_eq!(feed.process_completions().stopped, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_feed_runs_until_shutdown() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let bus_socket = bus_path(dir.path());
    let mut bus = BufferBus::bind(&bus_socket, 16).unwrap();

    let counter_name = unique_name("feed_voices");
    let counter = SharedCounter::create(&counter_name).unwrap();

    let session = Arc::new(RecordingSession::new());
    let (mut engine, mut feed) = Engine::builder()
        .offline()
        .channels(1)
        .session(session.clone())
        .build()
        .unwrap();

    // Two renderers, each allocating its own voice ids
    let mut renderers = Vec::new();
    for _ in 0..2 {
        let bus_socket = bus_socket.clone();
        let counter_name = counter_name.clone();
        renderers.push(tokio::spawn(async move {
            let voices = SharedCounter::open(&counter_name).unwrap();
            let mut output = MessageTransport::connect(&bus_socket).await.unwrap();
            for _ in 0..3 {
                let voice = voices.read_and_increment().unwrap();
                let mut message = Message::new(MessageKind::Play, INSTRUMENT, voice).unwrap();
                message.mark_completed(clock::now_nanos());
                let buffer = AudioBuffer::constant(0.1, 16, TEST_SAMPLE_RATE_HZ).unwrap();
                output.send_buffer(&buffer, &message).await.unwrap();
            }
        }));
    }

    let (stop, stopped) = watch::channel(false);
    let watcher = {
        let session = session.clone();
        tokio::spawn(async move {
            while session.events().len() < 6 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            stop.send(true).unwrap();
        })
    };

    tokio::time::timeout(
        Duration::from_secs(10),
        feed.run(&mut bus, Duration::from_millis(1), stopped),
    )
    .await
    .expect("feed did not stop");
    watcher.await.unwrap();
    for renderer in renderers {
        renderer.await.unwrap();
    }

    // Six distinct voices, all from the one counter
    let mut voices: Vec<u64> = session
        .events()
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Active { voice, .. } => Some(*voice),
            _ => None,
        })
        .collect();
    voices.sort_unstable();
    assert_eq!(voices, (1..=6).collect::<Vec<u64>>());
    assert_eq!(counter.peek().unwrap(), 7);

    let out = engine.render(16);
    for &sample in &out {
        assert_relative_eq!(sample, 0.6, epsilon = 1e-5);
    }
}
