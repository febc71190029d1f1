//! Buffer feed: hands rendered buffers to the scheduler and reacts to their
//! completion.
//!
//! Runs off the audio thread. For every frame that arrives from a renderer:
//!
//! 1. decode it (malformed frames are logged and skipped)
//! 2. subtract the render latency from the requested onset
//! 3. schedule the buffer with a completion callback
//!
//! Completion callbacks run on the audio thread, so they only push a
//! preallocated record onto a lock-free queue. [`BufferFeed::process_completions`]
//! picks those up and retriggers looping voices or reports them stopped.

use crate::session::SessionStore;
use crate::Result;
use astrid_core::{
    clock, CompletionCallback, CompletionInfo, EventHandle, EventId, SchedulerHandle, VoiceId,
};
use astrid_ipc::{wire, Message, MessageKind, MessageSubmitter};
use crossbeam::queue::ArrayQueue;
use std::collections::HashMap;
use std::sync::Arc;

/// Default frames before the end of a looping buffer at which the next
/// iteration is requested.
pub const DEFAULT_LOOP_LEAD_FRAMES: u64 = 2048;

/// Built on the feed thread, moved into the callback, filled in and pushed
/// from the audio thread.
#[derive(Debug, Clone)]
struct Completion {
    event: EventId,
    message: Message,
    looping: bool,
    sample_rate: u32,
    tick: u64,
    remaining_frames: usize,
}

#[derive(Debug, Default)]
struct VoiceRecord {
    renders: u64,
    stopped: bool,
}

/// Counters for one [`BufferFeed::process_completions`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompletionSummary {
    pub retriggered: usize,
    pub stopped: usize,
    pub released: usize,
}

pub struct BufferFeed {
    handle: SchedulerHandle,
    session: Arc<dyn SessionStore>,
    retrigger: Option<MessageSubmitter>,
    completions: Arc<ArrayQueue<Completion>>,
    voices: HashMap<VoiceId, VoiceRecord>,
    loop_lead_frames: u64,
}

impl BufferFeed {
    pub fn new(
        handle: SchedulerHandle,
        session: Arc<dyn SessionStore>,
        completion_capacity: usize,
    ) -> Self {
        Self {
            handle,
            session,
            retrigger: None,
            completions: Arc::new(ArrayQueue::new(completion_capacity.max(1))),
            voices: HashMap::new(),
            loop_lead_frames: DEFAULT_LOOP_LEAD_FRAMES,
        }
    }

    /// Where loop retrigger requests are submitted. Without one, looping
    /// voices stop after their current buffer.
    pub fn with_retrigger(mut self, submitter: MessageSubmitter) -> Self {
        self.retrigger = Some(submitter);
        self
    }

    pub fn with_loop_lead(mut self, frames: u64) -> Self {
        self.loop_lead_frames = frames;
        self
    }

    /// Decode a wire frame and schedule it.
    pub fn accept_frame(&mut self, bytes: &[u8]) -> Result<EventHandle> {
        let (buffer, mut message) = wire::deserialize(bytes).map_err(|e| {
            tracing::warn!(error = %e, bytes = bytes.len(), "dropping malformed buffer frame");
            e
        })?;

        if message.timing.completed == 0 {
            message.mark_completed(clock::now_nanos());
        }
        let delay = message.compute_onset_delay(buffer.sample_rate(), buffer.onset());
        tracing::debug!(
            instrument = %message.instrument,
            voice = message.voice,
            delay_frames = delay,
            max_processing_ns = message.timing.max_processing,
            "scheduling rendered buffer"
        );

        let frames = buffer.frames() as u64;
        let looping = buffer.is_looping();
        // Looping buffers report `loop_lead_frames` before their end so the
        // next iteration can be rendered in time
        let fire_after = if looping {
            frames.saturating_sub(self.loop_lead_frames).max(1)
        } else {
            frames
        };
        let callback_delay = delay + fire_after - 1;

        let instrument = message.instrument.clone();
        let voice = message.voice;
        let mut pending = Some(Completion {
            event: 0,
            message,
            looping,
            sample_rate: buffer.sample_rate(),
            tick: 0,
            remaining_frames: 0,
        });
        let queue = Arc::clone(&self.completions);
        // A full queue hands the record back; the scheduler retries next pass
        let callback: CompletionCallback = Box::new(move |info: CompletionInfo| {
            let Some(mut completion) = pending.take() else {
                return true;
            };
            completion.event = info.event;
            completion.tick = info.tick;
            completion.remaining_frames = info.remaining_frames;
            match queue.push(completion) {
                Ok(()) => true,
                Err(completion) => {
                    pending = Some(completion);
                    false
                }
            }
        });

        let handle = self
            .handle
            .schedule(buffer, delay, Some(callback), callback_delay)?;

        let record = self.voices.entry(voice).or_default();
        if record.renders == 0 {
            self.session.voice_active(&instrument, voice);
        }
        record.renders += 1;

        Ok(handle)
    }

    /// Stop retriggering `voice` once its current buffer completes.
    pub fn stop_voice(&mut self, voice: VoiceId) {
        if let Some(record) = self.voices.get_mut(&voice) {
            record.stopped = true;
        }
    }

    /// Voices with a buffer in flight.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Handle every completion the audio thread has reported and free
    /// released buffers.
    pub fn process_completions(&mut self) -> CompletionSummary {
        let mut summary = CompletionSummary::default();

        while let Some(completion) = self.completions.pop() {
            let message = &completion.message;
            let voice = message.voice;
            let stopped = self.voices.get(&voice).map_or(true, |r| r.stopped);

            if completion.looping && !stopped && self.request_next_iteration(&completion) {
                self.session.render_incremented(&message.instrument, voice);
                summary.retriggered += 1;
                continue;
            }

            let renders = self.voices.remove(&voice).map_or(0, |r| r.renders);
            tracing::debug!(
                instrument = %message.instrument,
                voice,
                event = completion.event,
                tick = completion.tick,
                renders,
                "voice finished"
            );
            self.session.voice_stopped(&message.instrument, voice, renders);
            summary.stopped += 1;
        }

        summary.released = self.handle.collect_released();
        summary
    }

    fn request_next_iteration(&self, completion: &Completion) -> bool {
        let Some(submitter) = &self.retrigger else {
            return false;
        };
        let original = &completion.message;
        let remaining =
            clock::frames_to_nanos(completion.remaining_frames as u64, completion.sample_rate);

        let request = Message::new(MessageKind::Play, original.instrument.clone(), original.voice)
            .and_then(|m| m.with_payload(original.payload.clone()))
            .map(|m| {
                let mut m = m.scheduled_in(remaining);
                m.timing.max_processing = original.timing.max_processing;
                m
            });

        match request.and_then(|m| submitter.submit(m)) {
            Ok(()) => {
                tracing::debug!(
                    instrument = %original.instrument,
                    voice = original.voice,
                    remaining_ns = remaining,
                    "loop retrigger requested"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    instrument = %original.instrument,
                    voice = original.voice,
                    error = %e,
                    "loop retrigger failed, stopping voice"
                );
                false
            }
        }
    }
}

#[cfg(unix)]
impl BufferFeed {
    /// Feed buffers from `bus` until `shutdown` flips to true, processing
    /// completions every `interval`.
    pub async fn run(
        &mut self,
        bus: &mut astrid_ipc::BufferBus,
        interval: std::time::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = bus.recv() => {
                    let Some(frame) = frame else { break };
                    // Malformed frames are logged in accept_frame
                    let _ = self.accept_frame(&frame);
                }
                _ = ticker.tick() => {
                    self.process_completions();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.process_completions();
        tracing::debug!(voices = self.voices.len(), "buffer feed stopped");
    }
}
