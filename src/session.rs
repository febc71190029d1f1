//! Voice lifecycle notifications.
//!
//! The session store lives outside the engine; the feed only tells it when a
//! voice starts sounding, renders another loop iteration, or stops.

use astrid_core::VoiceId;
use parking_lot::Mutex;

/// Receiver of voice lifecycle notifications.
///
/// Every notification may be repeated without harm.
pub trait SessionStore: Send + Sync {
    /// First buffer of a voice was scheduled.
    fn voice_active(&self, instrument: &str, voice: VoiceId);

    /// A looping voice was asked to render again.
    fn render_incremented(&self, instrument: &str, voice: VoiceId);

    /// The voice finished after `renders` buffers.
    fn voice_stopped(&self, instrument: &str, voice: VoiceId, renders: u64);
}

/// Logs notifications and stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSession;

impl SessionStore for TracingSession {
    fn voice_active(&self, instrument: &str, voice: VoiceId) {
        tracing::info!(instrument, voice, "voice active");
    }

    fn render_incremented(&self, instrument: &str, voice: VoiceId) {
        tracing::debug!(instrument, voice, "render count incremented");
    }

    fn voice_stopped(&self, instrument: &str, voice: VoiceId, renders: u64) {
        tracing::info!(instrument, voice, renders, "voice stopped");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Active {
        instrument: String,
        voice: VoiceId,
    },
    Rendered {
        instrument: String,
        voice: VoiceId,
    },
    Stopped {
        instrument: String,
        voice: VoiceId,
        renders: u64,
    },
}

/// Keeps every notification in order.
#[derive(Debug, Default)]
pub struct RecordingSession {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Loop iterations recorded for `voice`.
    pub fn renders_of(&self, voice: VoiceId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Rendered { voice: v, .. } if *v == voice))
            .count()
    }
}

impl SessionStore for RecordingSession {
    fn voice_active(&self, instrument: &str, voice: VoiceId) {
        self.events.lock().push(SessionEvent::Active {
            instrument: instrument.to_string(),
            voice,
        });
    }

    fn render_incremented(&self, instrument: &str, voice: VoiceId) {
        self.events.lock().push(SessionEvent::Rendered {
            instrument: instrument.to_string(),
            voice,
        });
    }

    fn voice_stopped(&self, instrument: &str, voice: VoiceId, renders: u64) {
        self.events.lock().push(SessionEvent::Stopped {
            instrument: instrument.to_string(),
            voice,
            renders,
        });
    }
}
