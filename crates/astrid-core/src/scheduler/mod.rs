//! Tick-driven event scheduler.
//!
//! Holds audio-bearing events in three disjoint sets - waiting, playing and
//! recycled - and mixes every playing event into one output frame per tick.
//!
//! The audio thread owns a [`Scheduler`] outright. Other threads reach it only
//! through a [`SchedulerHandle`]: new events travel over a bounded lock-free
//! queue drained at the top of each tick, and buffers released by
//! [`Scheduler::sweep`] travel back over a bounded channel so they are freed
//! off the audio thread.

mod arena;
mod handle;

pub use handle::{ReleasedBuffer, SchedulerHandle, SchedulerStats};

use crate::clock;
use crate::{AudioBuffer, EngineConfig};
use arena::{EventArena, Set, SlotIndex};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Sender};
use handle::PendingEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a scheduled event. Never reused within a process, even though
/// the slot holding the event is.
pub type EventId = u64;

/// Returned by `schedule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    id: EventId,
}

impl EventHandle {
    pub fn id(&self) -> EventId {
        self.id
    }
}

/// Which of the three sets an event currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Waiting,
    Playing,
    Recycled,
}

/// Passed to a completion callback when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionInfo {
    pub event: EventId,
    /// The tick that had just been mixed when the callback fired.
    pub tick: u64,
    /// Frames of the buffer still to be played at that point.
    pub remaining_frames: usize,
}

/// Fired at most once per event. Captured state is owned by the event and
/// dropped when its slot is swept.
///
/// Returns whether the completion was handled. `false` leaves the event
/// unfired so the next [`Scheduler::handle_callbacks`] pass calls it again,
/// and [`Scheduler::sweep`] keeps the event until it has been handled.
pub type CompletionCallback = Box<dyn FnMut(CompletionInfo) -> bool + Send>;

/// Sample-accurate mixing engine for pre-rendered buffers.
pub struct Scheduler {
    arena: EventArena,
    channels: usize,
    sample_rate: f64,
    realtime: bool,
    tick_nanos: u64,
    current_tick: u64,
    now: u64,
    current_frame: Vec<f32>,

    inbound: Arc<ArrayQueue<PendingEvent>>,
    release_tx: Sender<ReleasedBuffer>,
    handle: SchedulerHandle,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    /// `realtime` selects wall-clock `now`; otherwise `now` advances by exactly
    /// one tick's duration per tick.
    pub fn new(channels: usize, sample_rate: f64, realtime: bool) -> Self {
        let config = EngineConfig {
            channels,
            sample_rate,
            realtime,
            ..Default::default()
        };
        Self::with_config(&config)
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let channels = config.channels.max(1);
        let inbound = Arc::new(ArrayQueue::new(config.inbound_capacity.max(1)));
        let (release_tx, release_rx) = bounded(config.release_capacity.max(1));
        let next_id = Arc::new(AtomicU64::new(1));

        let handle = SchedulerHandle {
            inbound: Arc::clone(&inbound),
            released: release_rx,
            stats: Arc::new(SchedulerStats::default()),
            next_id: Arc::clone(&next_id),
        };

        Self {
            arena: EventArena::with_capacity(config.event_capacity),
            channels,
            sample_rate: config.sample_rate,
            realtime: config.realtime,
            tick_nanos: config.tick_nanos(),
            current_tick: 0,
            now: if config.realtime { clock::now_nanos() } else { 0 },
            current_frame: vec![0.0; channels],
            inbound,
            release_tx,
            handle,
            next_id,
        }
    }

    /// A handle for scheduling from other threads.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Link a new event at the tail of the waiting set with
    /// `onset = current_tick + delay_ticks`.
    ///
    /// Reuses a recycled slot when one has been swept; grows the arena otherwise.
    pub fn schedule(
        &mut self,
        buffer: AudioBuffer,
        delay_ticks: u64,
        callback: Option<CompletionCallback>,
        callback_delay_ticks: u64,
    ) -> EventHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.insert(PendingEvent {
            id,
            buffer,
            delay: delay_ticks,
            callback,
            callback_delay: callback_delay_ticks,
        });
        self.publish_stats();
        EventHandle { id }
    }

    fn insert(&mut self, pending: PendingEvent) {
        let tick = self.current_tick;
        let index = self.arena.acquire();
        let event = self.arena.get_mut(index);

        event.id = pending.id;
        event.buffer = Some(pending.buffer);
        event.position = 0;
        event.onset = tick.saturating_add(pending.delay);
        event.callback = pending.callback;
        event.callback_tick = tick.saturating_add(pending.callback_delay);
        event.fired = false;

        self.arena.push_back(Set::Waiting, index);
    }

    fn drain_inbound(&mut self) {
        while let Some(pending) = self.inbound.pop() {
            self.insert(pending);
        }
    }

    /// Produce one output frame. Call exactly once per frame from a single thread.
    pub fn tick(&mut self) {
        self.drain_inbound();

        let tick = self.current_tick;

        // Promote
        self.arena
            .move_where(Set::Waiting, Set::Playing, |event| event.onset <= tick);

        // Mix
        self.current_frame.fill(0.0);
        let mut cursor = self.arena.head(Set::Playing);
        while let Some(index) = cursor {
            let event = self.arena.get(index);
            if let Some(buffer) = &event.buffer {
                for (channel, out) in self.current_frame.iter_mut().enumerate() {
                    *out += buffer.sample(event.position, channel);
                }
            }
            cursor = event.next;
        }

        // Advance
        let mut cursor = self.arena.head(Set::Playing);
        while let Some(index) = cursor {
            let event = self.arena.get_mut(index);
            event.position += 1;
            cursor = event.next;
        }

        // Retire as soon as the final frame has been mixed
        self.arena.move_where(Set::Playing, Set::Retired, |event| {
            event.position >= event.frames()
        });

        // Clock
        self.current_tick += 1;
        self.now = if self.realtime {
            clock::now_nanos()
        } else {
            self.now + self.tick_nanos
        };

        self.publish_stats();
    }

    /// Fire every due, unfired completion callback exactly once.
    ///
    /// An event is due once the tick at its callback tick has been mixed.
    /// Events retired since the last pass are still considered until swept, so
    /// a coarse callback cadence cannot skip a short event's callback.
    pub fn handle_callbacks(&mut self) -> usize {
        let Some(mixed) = self.current_tick.checked_sub(1) else {
            return 0;
        };

        let mut fired = 0;
        for set in [Set::Playing, Set::Retired] {
            let mut cursor = self.arena.head(set);
            while let Some(index) = cursor {
                let event = self.arena.get_mut(index);
                cursor = event.next;

                if event.fired || mixed < event.callback_tick {
                    continue;
                }
                if let Some(callback) = event.callback.as_mut() {
                    let remaining_frames = event
                        .buffer
                        .as_ref()
                        .map_or(0, |b| b.frames().saturating_sub(event.position));
                    let handled = callback(CompletionInfo {
                        event: event.id,
                        tick: mixed,
                        remaining_frames,
                    });
                    if handled {
                        event.fired = true;
                        fired += 1;
                    }
                }
            }
        }
        fired
    }

    /// Release buffers owned by retired events and make their slots reusable.
    ///
    /// Buffers go back over the release queue; if it is full they are dropped here.
    /// Events whose callback has not yet been handled stay retired.
    pub fn sweep(&mut self) -> usize {
        let mut swept = 0;
        for _ in 0..self.arena.len(Set::Retired) {
            let Some(index) = self.arena.pop_front(Set::Retired) else {
                break;
            };
            let event = self.arena.get_mut(index);
            if event.callback.is_some() && !event.fired {
                self.arena.push_back(Set::Retired, index);
                continue;
            }
            event.callback = None;
            if let Some(buffer) = event.buffer.take() {
                let released = ReleasedBuffer {
                    event: event.id,
                    buffer,
                };
                // A full or closed queue hands the buffer back and it drops here
                let _ = self.release_tx.try_send(released);
            }
            self.arena.push_back(Set::Free, index);
            swept += 1;
        }
        self.publish_stats();
        swept
    }

    pub fn count_waiting(&self) -> usize {
        self.arena.len(Set::Waiting)
    }

    pub fn count_playing(&self) -> usize {
        self.arena.len(Set::Playing)
    }

    /// Retired events, swept or not. Preallocated slots that never held an
    /// event are not counted.
    pub fn count_recycled(&self) -> usize {
        self.arena.len(Set::Retired) + self.arena.len(Set::Free)
    }

    /// True iff the waiting or playing set is non-empty.
    pub fn is_active(&self) -> bool {
        self.count_waiting() > 0 || self.count_playing() > 0
    }

    /// Current set of an event, or `None` once its slot has been reused
    /// (or it is still queued on a handle).
    pub fn state_of(&self, id: EventId) -> Option<EventState> {
        for set in [Set::Waiting, Set::Playing, Set::Retired, Set::Free] {
            let mut cursor = self.arena.head(set);
            while let Some(index) = cursor {
                let event = self.arena.get(index);
                if event.id == id && id != 0 {
                    return Some(Self::public_state(set));
                }
                cursor = event.next;
            }
        }
        None
    }

    /// Ids of the events in one set, in list order. Allocates.
    pub fn events_in(&self, state: EventState) -> Vec<EventId> {
        let sets: &[Set] = match state {
            EventState::Waiting => &[Set::Waiting],
            EventState::Playing => &[Set::Playing],
            EventState::Recycled => &[Set::Retired, Set::Free],
        };
        sets.iter()
            .flat_map(|&set| self.arena.indices(set))
            .map(|index: SlotIndex| self.arena.get(index).id)
            .filter(|&id| id != 0)
            .collect()
    }

    fn public_state(set: Set) -> EventState {
        match set {
            Set::Waiting => EventState::Waiting,
            Set::Playing => EventState::Playing,
            // Vacant slots never held an event and are not searched
            Set::Retired | Set::Free | Set::Vacant => EventState::Recycled,
        }
    }

    /// The frame produced by the most recent tick.
    pub fn current_frame(&self) -> &[f32] {
        &self.current_frame
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Nanoseconds: wall clock when realtime, synthetic otherwise.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    /// Release every event and owned buffer in all sets.
    pub fn destroy(mut self) {
        self.drain_inbound();
        tracing::debug!(
            waiting = self.count_waiting(),
            playing = self.count_playing(),
            recycled = self.count_recycled(),
            slots = self.arena.slot_count(),
            "destroying scheduler"
        );
    }

    fn publish_stats(&self) {
        let stats = &self.handle.stats;
        stats.waiting.store(self.count_waiting(), Ordering::Release);
        stats.playing.store(self.count_playing(), Ordering::Release);
        stats.recycled.store(self.count_recycled(), Ordering::Release);
        stats.tick.store(self.current_tick, Ordering::Release);
    }
}
