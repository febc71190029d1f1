//! Real-time core of the Astrid performance engine.
//!
//! # Primary API
//!
//! - [`Scheduler`] / [`SchedulerHandle`]: sample-accurate mixing of pre-rendered buffers
//! - [`AudioBuffer`]: the unit of audio handed over by renderer processes
//! - [`CaptureRing`]: lock-free history of live input for analysis
//! - [`EngineConfig`]: sample rate, channel count and housekeeping cadence
//!
//! # Example
//!
//! ```
//! use astrid_core::{AudioBuffer, Scheduler};
//!
//! let mut scheduler = Scheduler::new(2, 48000.0, false);
//! let buffer = AudioBuffer::constant(0.5, 64, 48000).unwrap();
//! scheduler.schedule(buffer, 0, None, 0);
//!
//! scheduler.tick();
//! assert_eq!(scheduler.current_frame(), &[0.5, 0.5]);
//! ```

pub mod error;
pub use error::{Error, Result};

mod buffer;
pub use buffer::AudioBuffer;

pub mod capture;
pub use capture::{CaptureRing, CaptureStorage, HeapCapture};

pub mod clock;

mod config;
pub use config::EngineConfig;

pub mod scheduler;
pub use scheduler::{
    CompletionCallback, CompletionInfo, EventHandle, EventId, EventState, ReleasedBuffer,
    Scheduler, SchedulerHandle, SchedulerStats,
};

/// Voice identifier issued by the shared voice counter.
pub type VoiceId = u64;
