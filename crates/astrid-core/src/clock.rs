//! Time helpers shared by the scheduler and the IPC layer.
//!
//! Cross-process timestamps are nanoseconds since the UNIX epoch so that
//! renderer processes and the playback process agree on "now".

use std::time::{SystemTime, UNIX_EPOCH};

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Wall-clock nanoseconds since the UNIX epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Signed nanosecond span converted to frames, truncating toward zero.
#[inline]
pub fn nanos_to_frames(nanos: i64, sample_rate: u32) -> i64 {
    (nanos as i128 * sample_rate as i128 / NANOS_PER_SECOND as i128) as i64
}

#[inline]
pub fn frames_to_nanos(frames: u64, sample_rate: u32) -> u64 {
    (frames as u128 * NANOS_PER_SECOND as u128 / sample_rate as u128) as u64
}
