//! Cross-thread access to a [`Scheduler`](super::Scheduler).

use super::{CompletionCallback, EventHandle, EventId};
use crate::{AudioBuffer, Error, Result};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// An event waiting to be linked into the scheduler at the next tick.
pub(crate) struct PendingEvent {
    pub id: EventId,
    pub buffer: AudioBuffer,
    pub delay: u64,
    pub callback: Option<CompletionCallback>,
    pub callback_delay: u64,
}

/// A buffer released by `sweep`, to be dropped off the audio thread.
#[derive(Debug)]
pub struct ReleasedBuffer {
    pub event: EventId,
    pub buffer: AudioBuffer,
}

/// Set sizes published by the audio thread after every tick and sweep.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub(crate) waiting: AtomicUsize,
    pub(crate) playing: AtomicUsize,
    pub(crate) recycled: AtomicUsize,
    pub(crate) tick: AtomicU64,
}

impl SchedulerStats {
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn playing(&self) -> usize {
        self.playing.load(Ordering::Acquire)
    }

    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::Acquire)
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }
}

/// Non-real-time side of a scheduler.
///
/// Cloning is cheap - shared state is behind Arcs. `schedule` never blocks:
/// events are pushed onto a bounded lock-free queue that the audio thread
/// drains at the top of every tick, so the onset is measured from the tick
/// that picks the event up.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) inbound: Arc<ArrayQueue<PendingEvent>>,
    pub(crate) released: Receiver<ReleasedBuffer>,
    pub(crate) stats: Arc<SchedulerStats>,
    pub(crate) next_id: Arc<AtomicU64>,
}

impl SchedulerHandle {
    pub fn schedule(
        &self,
        buffer: AudioBuffer,
        delay_ticks: u64,
        callback: Option<CompletionCallback>,
        callback_delay_ticks: u64,
    ) -> Result<EventHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = PendingEvent {
            id,
            buffer,
            delay: delay_ticks,
            callback,
            callback_delay: callback_delay_ticks,
        };

        if self.inbound.push(pending).is_err() {
            tracing::warn!(event = id, "scheduler inbound queue full, dropping event");
            return Err(Error::SchedulerFull {
                capacity: self.inbound.capacity(),
            });
        }

        tracing::trace!(event = id, delay_ticks, "event queued");
        Ok(EventHandle { id })
    }

    /// Drop every buffer the audio thread has released. Returns how many.
    pub fn collect_released(&self) -> usize {
        let mut count = 0;
        while let Ok(released) = self.released.try_recv() {
            tracing::trace!(
                event = released.event,
                frames = released.buffer.frames(),
                "buffer released"
            );
            drop(released);
            count += 1;
        }
        count
    }

    /// Events queued but not yet picked up by a tick.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// True while anything is queued, waiting or playing.
    pub fn is_active(&self) -> bool {
        !self.inbound.is_empty() || self.stats.waiting() > 0 || self.stats.playing() > 0
    }
}
