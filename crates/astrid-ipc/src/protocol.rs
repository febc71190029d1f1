//! Control messages exchanged between the playback process and renderers.

use crate::error::{IpcError, Result};
use astrid_core::{clock, VoiceId};
use serde::{Deserialize, Serialize};

/// Longest instrument name, in bytes.
pub const MAX_INSTRUMENT_NAME: usize = 64;

/// Longest free-form payload, in bytes.
pub const MAX_PAYLOAD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Render and play a voice.
    Play,
    /// Fire a one-shot on an already loaded instrument.
    Trigger,
    /// Change parameters of a sounding voice.
    Update,
    /// Load or reload an instrument definition.
    Load,
    /// Stop a voice; no further loop iterations.
    Stop,
    /// Poison pill for renderers and delivery loops.
    Shutdown,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Play => write!(f, "play"),
            MessageKind::Trigger => write!(f, "trigger"),
            MessageKind::Update => write!(f, "update"),
            MessageKind::Load => write!(f, "load"),
            MessageKind::Stop => write!(f, "stop"),
            MessageKind::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Timing fields, all in nanoseconds except `onset_delay`.
///
/// `initiated` and `completed` are wall-clock nanoseconds since the UNIX epoch,
/// `scheduled` is an offset relative to `initiated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub initiated: u64,
    pub scheduled: u64,
    pub completed: u64,
    /// Running worst-case render time. Telemetry only, never consulted for scheduling.
    pub max_processing: u64,
    /// Frames to wait before playback. Derived by [`Message::compute_onset_delay`].
    pub onset_delay: u64,
}

/// A control record addressed to one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub instrument: String,
    pub voice: VoiceId,
    pub payload: String,
    pub timing: Timing,
}

impl Message {
    /// New message initiated now, scheduled for immediate delivery.
    pub fn new(kind: MessageKind, instrument: impl Into<String>, voice: VoiceId) -> Result<Self> {
        let message = Self {
            kind,
            instrument: instrument.into(),
            voice,
            payload: String::new(),
            timing: Timing {
                initiated: clock::now_nanos(),
                ..Default::default()
            },
        };
        message.validate()?;
        Ok(message)
    }

    /// Shutdown pill addressed to no instrument: it only stops the loop that sees it.
    pub fn shutdown() -> Self {
        Self {
            kind: MessageKind::Shutdown,
            instrument: String::new(),
            voice: 0,
            payload: String::new(),
            timing: Timing {
                initiated: clock::now_nanos(),
                ..Default::default()
            },
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Result<Self> {
        self.payload = payload.into();
        self.validate()?;
        Ok(self)
    }

    /// Deliver `offset_nanos` after initiation.
    pub fn scheduled_in(mut self, offset_nanos: u64) -> Self {
        self.timing.scheduled = offset_nanos;
        self
    }

    pub fn initiated_at(mut self, nanos: u64) -> Self {
        self.timing.initiated = nanos;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.instrument.len() > MAX_INSTRUMENT_NAME {
            return Err(IpcError::Protocol(format!(
                "instrument name is {} bytes (max {})",
                self.instrument.len(),
                MAX_INSTRUMENT_NAME
            )));
        }
        if self.payload.len() > MAX_PAYLOAD {
            return Err(IpcError::Protocol(format!(
                "payload is {} bytes (max {})",
                self.payload.len(),
                MAX_PAYLOAD
            )));
        }
        Ok(())
    }

    /// Absolute delivery time: `initiated + scheduled`.
    pub fn deliver_at(&self) -> u64 {
        self.timing.initiated.saturating_add(self.timing.scheduled)
    }

    pub fn is_shutdown(&self) -> bool {
        self.kind == MessageKind::Shutdown
    }

    /// Stamp render completion and fold the render time into `max_processing`.
    pub fn mark_completed(&mut self, now: u64) {
        self.timing.completed = now;
        let processing = now.saturating_sub(self.timing.initiated);
        self.timing.max_processing = self.timing.max_processing.max(processing);
    }

    /// Frames still to wait once the buffer arrives.
    ///
    /// The render time (`completed - initiated`) is subtracted from the
    /// scheduled offset, then the frames the buffer already absorbed. Negative
    /// results clamp to zero: a late buffer plays immediately. Offsets beyond
    /// `i64::MAX` nanoseconds saturate rather than wrap.
    pub fn compute_onset_delay(&mut self, sample_rate: u32, absorbed_frames: u64) -> u64 {
        let processing = self.timing.completed.saturating_sub(self.timing.initiated);
        let remaining = (self.timing.scheduled as i128 - processing as i128)
            .clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        let absorbed = i64::try_from(absorbed_frames).unwrap_or(i64::MAX);
        let frames = clock::nanos_to_frames(remaining, sample_rate).saturating_sub(absorbed);
        self.timing.onset_delay = frames.max(0) as u64;
        self.timing.onset_delay
    }
}
