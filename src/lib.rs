//! # Astrid - Real-time Audio Performance Engine
//!
//! Renderers turn instrument definitions into finished audio buffers in their
//! own processes. Astrid holds those buffers until their moment, mixes them
//! sample-accurately on the audio thread, and asks renderers for the next
//! iteration of looping material.
//!
//! ## Architecture
//!
//! Astrid is an umbrella crate that coordinates:
//! - **astrid-core** - Event scheduler, capture ring, engine configuration
//! - **astrid-ipc** - Control messages, buffer wire format, delayed delivery,
//!   shared counters, Unix-socket transport
//!
//! and adds the [`Engine`] (audio-thread block loop), the [`BufferFeed`]
//! (renderer buffers in, completions out) and the [`SessionStore`] seam.
//!
//! ## Quick Start
//!
//! ```
//! use astrid::prelude::*;
//! use std::sync::Arc;
//!
//! let session = Arc::new(RecordingSession::new());
//! let (mut engine, mut feed) = Engine::builder()
//!     .offline()
//!     .channels(1)
//!     .session(session.clone())
//!     .build()?;
//!
//! // A renderer finished a buffer for voice 1
//! let buffer = AudioBuffer::constant(0.5, 64, 48000)?;
//! let message = Message::new(MessageKind::Play, "pulsar", 1)?;
//! let frame = astrid::ipc::wire::serialize(&buffer, &message)?;
//! feed.accept_frame(&frame)?;
//!
//! // Audio thread
//! let out = engine.render(128);
//! assert_eq!(out[0], 0.5);
//!
//! // Feed thread
//! assert_eq!(feed.process_completions().stopped, 1);
//! # Ok::<(), astrid::Error>(())
//! ```

/// Re-export of astrid-core for direct access
pub use astrid_core as core;

/// Re-export of astrid-ipc for direct access
pub use astrid_ipc as ipc;

pub use astrid_core::{
    AudioBuffer, CaptureRing, CompletionCallback, CompletionInfo, EngineConfig, EventHandle,
    EventId, EventState, Scheduler, SchedulerHandle, VoiceId,
};
pub use astrid_ipc::{
    ChannelRouter, DeliveryConfig, DeliveryLoop, DeliveryQueue, Message, MessageKind,
    MessageSubmitter, SharedCounter,
};

mod builder;
mod engine;
mod error;
pub mod feed;
pub mod session;

pub use builder::EngineBuilder;
pub use engine::{Engine, InputCapture, RENDER_BLOCK_FRAMES};
pub use error::{Error, Result};
pub use feed::{BufferFeed, CompletionSummary};
pub use session::{RecordingSession, SessionEvent, SessionStore, TracingSession};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{
        AudioBuffer, BufferFeed, ChannelRouter, DeliveryConfig, DeliveryLoop, Engine,
        EngineBuilder, Message, MessageKind, RecordingSession, SessionStore, TracingSession,
    };
}
