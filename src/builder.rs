//! Builder for configuring and constructing an [`Engine`] and its [`BufferFeed`].

use crate::feed::{BufferFeed, DEFAULT_LOOP_LEAD_FRAMES};
use crate::session::{SessionStore, TracingSession};
use crate::{Engine, Result};
use astrid_core::EngineConfig;
use astrid_ipc::MessageSubmitter;
use std::sync::Arc;

/// The engine goes to the audio thread; the feed stays on a worker thread
/// and talks to the engine through a scheduler handle.
///
/// # Example
///
/// ```
/// use astrid::Engine;
///
/// let (engine, feed) = Engine::builder()
///     .sample_rate(44100.0)
///     .channels(2)
///     .sweep_interval_blocks(4)
///     .build()
///     .unwrap();
///
/// assert_eq!(engine.channels(), 2);
/// assert_eq!(feed.active_voices(), 0);
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    session: Option<Arc<dyn SessionStore>>,
    retrigger: Option<MessageSubmitter>,
    loop_lead_frames: u64,
    completion_capacity: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            session: None,
            retrigger: None,
            loop_lead_frames: DEFAULT_LOOP_LEAD_FRAMES,
            completion_capacity: 256,
        }
    }
}

impl EngineBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 48000
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    /// Default: 2
    pub fn channels(mut self, channels: usize) -> Self {
        self.config.channels = channels;
        self
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.config.realtime = realtime;
        self
    }

    /// Synthetic clock for offline rendering and tests.
    pub fn offline(self) -> Self {
        self.realtime(false)
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    pub fn release_capacity(mut self, capacity: usize) -> Self {
        self.config.release_capacity = capacity;
        self
    }

    pub fn callback_interval_blocks(mut self, blocks: usize) -> Self {
        self.config.callback_interval_blocks = blocks;
        self
    }

    pub fn sweep_interval_blocks(mut self, blocks: usize) -> Self {
        self.config.sweep_interval_blocks = blocks;
        self
    }

    /// Default: [`TracingSession`]
    pub fn session(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    /// Submit loop retrigger requests here. Without it, looping voices play once.
    pub fn retrigger(mut self, submitter: MessageSubmitter) -> Self {
        self.retrigger = Some(submitter);
        self
    }

    pub fn loop_lead_frames(mut self, frames: u64) -> Self {
        self.loop_lead_frames = frames;
        self
    }

    /// Completion records the audio thread may queue between feed passes.
    pub fn completion_capacity(mut self, capacity: usize) -> Self {
        self.completion_capacity = capacity;
        self
    }

    /// Build only the engine.
    pub fn build_engine(self) -> Result<Engine> {
        Engine::new(self.config)
    }

    pub fn build(self) -> Result<(Engine, BufferFeed)> {
        let engine = Engine::new(self.config)?;
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(TracingSession) as Arc<dyn SessionStore>);

        let mut feed = BufferFeed::new(engine.handle(), session, self.completion_capacity)
            .with_loop_lead(self.loop_lead_frames);
        if let Some(submitter) = self.retrigger {
            feed = feed.with_retrigger(submitter);
        }

        tracing::debug!(
            sample_rate = engine.config().sample_rate,
            channels = engine.channels(),
            realtime = engine.config().realtime,
            "engine built"
        );
        Ok((engine, feed))
    }
}
