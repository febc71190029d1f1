//! Test helpers and fixtures for Astrid integration tests
//!
//! Engines are always offline (synthetic clock, manual block control) so
//! results do not depend on a sound card or wall-clock jitter.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (mixing of constant buffers)
//! - `SILENCE_THRESHOLD` (0.0001): Silence detection (-80dB)

#![allow(dead_code)]

pub mod tolerances;

use astrid::prelude::*;
use std::sync::Arc;

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

pub const TEST_SAMPLE_RATE_HZ: u32 = 48000;

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Offline engine without a feed.
pub fn test_engine(channels: usize) -> Engine {
    Engine::builder()
        .offline()
        .sample_rate(TEST_SAMPLE_RATE)
        .channels(channels)
        .build_engine()
        .expect("Failed to create test engine")
}

/// Offline engine plus feed reporting into a recording session.
pub fn test_engine_with_session(
    channels: usize,
) -> (Engine, BufferFeed, Arc<RecordingSession>) {
    let session = Arc::new(RecordingSession::new());
    let (engine, feed) = Engine::builder()
        .offline()
        .sample_rate(TEST_SAMPLE_RATE)
        .channels(channels)
        .session(session.clone())
        .build()
        .expect("Failed to create test engine");
    (engine, feed, session)
}

/// A renderer's output for `voice`, due `scheduled_ns` after it was requested,
/// rendered in no time.
pub fn rendered_frame(
    buffer: &AudioBuffer,
    instrument: &str,
    voice: u64,
    scheduled_ns: u64,
) -> Vec<u8> {
    let mut message = Message::new(MessageKind::Play, instrument, voice)
        .expect("valid message")
        .scheduled_in(scheduled_ns);
    let initiated = message.timing.initiated;
    message.mark_completed(initiated);
    astrid::ipc::wire::serialize(buffer, &message).expect("serializable")
}

/// Shared-memory names unique to this test process.
pub fn unique_name(name: &str) -> String {
    format!("it_{}_{}", name, std::process::id())
}

/// Generate an integer staircase signal [0, 1, 2, ..., n-1] as f32.
///
/// Each sample equals its index, allowing exact verification of which frame
/// ended up where.
pub fn generate_integer_staircase(num_samples: usize) -> Vec<f32> {
    (0..num_samples).map(|i| i as f32).collect()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Assert that a signal is approximately silent (all values near zero).
pub fn assert_silence(samples: &[f32], tolerance: f32) {
    let max = peak(samples);
    assert!(
        max <= tolerance,
        "Expected silence, but peak amplitude was {}",
        max
    );
}

/// Extract one channel from interleaved frames.
pub fn channel(interleaved: &[f32], channels: usize, index: usize) -> Vec<f32> {
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame[index])
        .collect()
}
