//! Engine configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the scheduler and the block loop that drives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f64,
    pub channels: usize,
    /// Wall-clock `now` when true, synthetic one-tick-per-frame clock otherwise.
    pub realtime: bool,
    /// Event slots allocated up front.
    pub event_capacity: usize,
    /// Pending events a [`SchedulerHandle`](crate::SchedulerHandle) may queue between ticks.
    pub inbound_capacity: usize,
    /// Released buffers awaiting deallocation off the audio thread.
    pub release_capacity: usize,
    /// Blocks between completion-callback passes.
    pub callback_interval_blocks: usize,
    /// Blocks between sweeps of the recycled set.
    pub sweep_interval_blocks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            channels: 2,
            realtime: true,
            event_capacity: 256,
            inbound_capacity: 256,
            release_capacity: 1024,
            callback_interval_blocks: 1,
            sweep_interval_blocks: 8,
        }
    }
}

impl EngineConfig {
    /// Deterministic configuration for offline rendering and tests.
    pub fn offline(channels: usize, sample_rate: f64) -> Self {
        Self {
            sample_rate,
            channels,
            realtime: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000.0 || self.sample_rate > 384000.0 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > 64 {
            return Err(Error::InvalidConfig(format!(
                "channels {} out of range (1-64)",
                self.channels
            )));
        }
        if self.inbound_capacity == 0 || self.release_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue capacities must be non-zero".into(),
            ));
        }
        if self.callback_interval_blocks == 0 || self.sweep_interval_blocks == 0 {
            return Err(Error::InvalidConfig(
                "housekeeping intervals must be at least one block".into(),
            ));
        }
        Ok(())
    }

    /// Duration of one tick (one output frame) in nanoseconds.
    pub fn tick_nanos(&self) -> u64 {
        (1_000_000_000.0 / self.sample_rate).round() as u64
    }
}
