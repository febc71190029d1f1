//! Lock-free capture ring for recent live input.
//!
//! One writer (the audio input callback) publishes frames; any number of
//! readers (pitch/onset analysis in renderers) sample the recent past without
//! ever waiting on the writer. Samples are stored as `f32` bit patterns in
//! `AtomicU32` slots, so a reader may see stale data but never a torn sample.
//!
//! Nothing stops the writer from lapping a slow reader: reads at an offset
//! close to the capacity can return data newer than expected.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Backing storage for a [`CaptureRing`]: a published cursor plus the slots.
///
/// Implemented for heap memory here and for named shared memory in `astrid-ipc`.
pub trait CaptureStorage {
    /// Total frames ever written. Published with release ordering.
    fn cursor(&self) -> &AtomicU64;

    /// Interleaved sample slots, `capacity * channels` long.
    fn slots(&self) -> &[AtomicU32];

    fn channels(&self) -> usize;
}

/// Heap-allocated capture storage for in-process use.
pub struct HeapCapture {
    cursor: AtomicU64,
    slots: Box<[AtomicU32]>,
    channels: usize,
}

impl HeapCapture {
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        let slots = (0..capacity_frames.max(1) * channels)
            .map(|_| AtomicU32::new(0.0f32.to_bits()))
            .collect();
        Self {
            cursor: AtomicU64::new(0),
            slots,
            channels,
        }
    }
}

impl CaptureStorage for HeapCapture {
    fn cursor(&self) -> &AtomicU64 {
        &self.cursor
    }

    fn slots(&self) -> &[AtomicU32] {
        &self.slots
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

/// Single-writer, multi-reader circular buffer of interleaved frames.
pub struct CaptureRing<S: CaptureStorage = HeapCapture> {
    storage: S,
}

impl CaptureRing<HeapCapture> {
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        Self::from_storage(HeapCapture::new(capacity_frames, channels))
    }
}

impl<S: CaptureStorage> CaptureRing<S> {
    pub fn from_storage(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.storage.slots().len() / self.storage.channels()
    }

    pub fn channels(&self) -> usize {
        self.storage.channels()
    }

    /// Frames written since creation.
    pub fn written_frames(&self) -> u64 {
        self.storage.cursor().load(Ordering::Acquire)
    }

    /// Copy interleaved frames in at the published position, wrapping at
    /// capacity, then publish the new position.
    ///
    /// Only one context may write. A trailing partial frame is ignored.
    pub fn write_block(&self, samples: &[f32]) {
        let channels = self.storage.channels();
        let capacity = self.capacity() as u64;
        let slots = self.storage.slots();
        let start = self.storage.cursor().load(Ordering::Relaxed);

        let mut written = 0u64;
        for frame in samples.chunks_exact(channels) {
            let base = ((start + written) % capacity) as usize * channels;
            for (slot, &sample) in slots[base..base + channels].iter().zip(frame) {
                slot.store(sample.to_bits(), Ordering::Relaxed);
            }
            written += 1;
        }

        self.storage
            .cursor()
            .store(start + written, Ordering::Release);
    }

    /// Read the sample `offset` frames behind the published write position.
    ///
    /// `offset` should stay well under [`capacity`](Self::capacity) for the
    /// result to be meaningful.
    #[inline]
    pub fn read_sample(&self, offset: usize, channel: usize) -> f32 {
        let channels = self.storage.channels();
        let capacity = self.capacity() as u64;
        let pos = self.storage.cursor().load(Ordering::Acquire);

        let frame = (pos % capacity + capacity - offset as u64 % capacity) % capacity;
        let index = frame as usize * channels + channel % channels;
        f32::from_bits(self.storage.slots()[index].load(Ordering::Relaxed))
    }

    /// Fill `output` with the most recent mono history of `channel`, oldest first.
    pub fn read_recent(&self, channel: usize, output: &mut [f32]) {
        let len = output.len();
        for (i, sample) in output.iter_mut().enumerate() {
            *sample = self.read_sample(len - i, channel);
        }
    }
}
