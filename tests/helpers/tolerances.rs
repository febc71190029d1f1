//! Tolerance constants for audio testing.

/// Floating point rounding errors when summing a handful of buffers.
pub const FLOAT_EPSILON: f32 = 1e-6;

/// Silence threshold (~-80dB).
/// Values below this are considered silent.
pub const SILENCE_THRESHOLD: f32 = 0.0001;
