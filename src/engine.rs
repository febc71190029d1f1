//! Engine that drives the scheduler from an audio callback.

use crate::builder::EngineBuilder;
use crate::Result;
use astrid_core::{CaptureRing, CaptureStorage, EngineConfig, Scheduler, SchedulerHandle};
use std::sync::Arc;

/// Frames rendered per block by [`Engine::render`].
pub const RENDER_BLOCK_FRAMES: usize = 512;

/// Destination for live input frames.
pub trait InputCapture: Send + Sync {
    fn capture(&self, input: &[f32]);
}

impl<S: CaptureStorage + Send + Sync> InputCapture for CaptureRing<S> {
    fn capture(&self, input: &[f32]) {
        self.write_block(input);
    }
}

/// Block-level wrapper around a [`Scheduler`].
///
/// Owned by the audio thread. Ticks once per output frame, then runs
/// completion callbacks and sweeps at the configured block cadence.
/// Nothing here logs or blocks.
///
/// # Example
///
/// ```
/// use astrid::{AudioBuffer, Engine};
///
/// let mut engine = Engine::builder().offline().channels(1).build_engine().unwrap();
/// engine
///     .handle()
///     .schedule(AudioBuffer::constant(0.5, 4, 48000).unwrap(), 0, None, 0)
///     .unwrap();
///
/// let out = engine.render(6);
/// assert_eq!(out, vec![0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
/// ```
pub struct Engine {
    scheduler: Scheduler,
    config: EngineConfig,
    capture: Option<Arc<dyn InputCapture>>,
    blocks: u64,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scheduler: Scheduler::with_config(&config),
            config,
            capture: None,
            blocks: 0,
        })
    }

    /// Handle for scheduling from other threads.
    pub fn handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn channels(&self) -> usize {
        self.scheduler.channels()
    }

    /// Record live input into `capture` on every [`process`](Self::process) call.
    pub fn set_capture(&mut self, capture: Arc<dyn InputCapture>) {
        self.capture = Some(capture);
    }

    /// Blocks processed so far.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Fill interleaved `output`, one tick per frame. A trailing partial frame
    /// is left untouched.
    pub fn process_block(&mut self, output: &mut [f32]) {
        let channels = self.scheduler.channels();
        for frame in output.chunks_exact_mut(channels) {
            self.scheduler.tick();
            frame.copy_from_slice(self.scheduler.current_frame());
        }

        self.blocks += 1;
        if self.blocks % self.config.callback_interval_blocks as u64 == 0 {
            self.scheduler.handle_callbacks();
        }
        if self.blocks % self.config.sweep_interval_blocks as u64 == 0 {
            self.scheduler.sweep();
        }
    }

    /// Capture interleaved `input`, then fill `output`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        if let Some(capture) = &self.capture {
            capture.capture(input);
        }
        self.process_block(output);
    }

    /// Offline: produce `frames` interleaved frames.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let channels = self.scheduler.channels();
        let mut out = vec![0.0; frames * channels];
        for block in out.chunks_mut(RENDER_BLOCK_FRAMES * channels) {
            self.process_block(block);
        }
        out
    }

    /// Offline: render until nothing is queued, waiting or playing, or until
    /// `max_frames`. Returns the rendered frames.
    pub fn render_until_idle(&mut self, max_frames: usize) -> Vec<f32> {
        let channels = self.scheduler.channels();
        let handle = self.scheduler.handle();
        let mut out = Vec::new();
        let mut block = vec![0.0; RENDER_BLOCK_FRAMES * channels];

        while out.len() < max_frames * channels
            && (handle.pending() > 0 || self.scheduler.is_active())
        {
            let remaining = max_frames * channels - out.len();
            let len = remaining.min(block.len());
            self.process_block(&mut block[..len]);
            out.extend_from_slice(&block[..len]);
        }
        out
    }

    /// Release every event and buffer.
    pub fn shutdown(self) {
        self.scheduler.destroy();
    }
}
