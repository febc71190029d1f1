//! Pre-rendered audio buffers handed to the scheduler.

use crate::{Error, Result};

/// An immutable block of interleaved `f32` samples plus playback metadata.
///
/// Produced by a renderer process, owned by exactly one scheduler event until
/// that event is retired and swept.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    frames: usize,
    channels: u32,
    sample_rate: u32,
    looping: bool,
    /// Frames of delay already absorbed before playback.
    onset: u64,
}

impl AudioBuffer {
    /// Wrap interleaved samples. `samples.len()` must be a non-zero multiple of `channels`.
    pub fn new(samples: Vec<f32>, channels: u32, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidBuffer("channel count is zero".into()));
        }
        if sample_rate == 0 {
            return Err(Error::InvalidBuffer("sample rate is zero".into()));
        }
        if samples.is_empty() {
            return Err(Error::EmptyBuffer);
        }
        if samples.len() % channels as usize != 0 {
            return Err(Error::InvalidBuffer(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }

        let frames = samples.len() / channels as usize;
        Ok(Self {
            samples,
            frames,
            channels,
            sample_rate,
            looping: false,
            onset: 0,
        })
    }

    /// Mono buffer filled with a constant value.
    pub fn constant(value: f32, frames: usize, sample_rate: u32) -> Result<Self> {
        Self::new(vec![value; frames], 1, sample_rate)
    }

    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_onset(mut self, onset: u64) -> Self {
        self.onset = onset;
        self
    }

    /// Sample at `frame`, with `channel` wrapped onto the buffer's channel count
    /// so mono material feeds every output channel.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels as usize;
        self.samples[frame * channels + channel % channels]
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn onset(&self) -> u64 {
        self.onset
    }

    /// Playback length in nanoseconds at the buffer's own sample rate.
    pub fn duration_nanos(&self) -> u64 {
        (self.frames as u128 * 1_000_000_000 / self.sample_rate as u128) as u64
    }
}
