//! Inter-process plumbing for the Astrid engine.
//!
//! Renderers run in their own processes. This crate carries everything that
//! crosses that boundary:
//!
//! - [`protocol`]: control [`Message`] records and their timing fields
//! - [`wire`]: a rendered buffer bundled with the message that requested it
//! - [`delivery`]: timestamp-ordered release of messages to their instrument
//! - [`shared_memory`]: cross-process [`SharedCounter`] and capture storage
//! - [`transport`]: framed Unix sockets, per-instrument channels, the buffer bus
//!
//! # Example
//!
//! ```
//! use astrid_ipc::{ChannelRouter, DeliveryQueue, Message, MessageKind};
//!
//! let mut router = ChannelRouter::new();
//! let mut pulsar = router.register("pulsar", 8);
//!
//! let mut queue = DeliveryQueue::new();
//! queue.enqueue_at(Message::new(MessageKind::Play, "pulsar", 2).unwrap(), 20);
//! queue.enqueue_at(Message::new(MessageKind::Play, "pulsar", 1).unwrap(), 10);
//!
//! queue.pump_due(30, &mut router);
//! assert_eq!(pulsar.try_recv().unwrap().voice, 1);
//! assert_eq!(pulsar.try_recv().unwrap().voice, 2);
//! ```

pub mod delivery;
pub mod error;
pub mod protocol;
pub mod shared_memory;
#[cfg(unix)]
pub mod transport;
pub mod wire;

pub use delivery::{
    ChannelRouter, DeliveryConfig, DeliveryHandle, DeliveryLoop, DeliveryQueue, DeliveryReport,
    MessageSink, MessageSubmitter, PumpOutcome, PumpRound,
};
pub use error::{IpcError, Result};
pub use protocol::{Message, MessageKind, Timing, MAX_INSTRUMENT_NAME, MAX_PAYLOAD};
pub use shared_memory::{SharedCaptureStorage, SharedCounter, SharedRegion};
#[cfg(unix)]
pub use transport::{channel_path, BufferBus, MessageTransport, TransportListener};
