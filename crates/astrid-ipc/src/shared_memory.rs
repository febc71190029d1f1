//! Named shared-memory regions and the state that lives in them.
//!
//! Regions are plain files under a well-known directory (`/dev/shm` on Linux,
//! the temp dir elsewhere) so unrelated processes can attach by name.

use crate::error::{IpcError, Result};
use astrid_core::capture::CaptureStorage;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NAME_PREFIX: &str = "astrid_";

/// Well-known location of a named region.
pub fn shm_path(name: &str) -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let dev_shm = PathBuf::from("/dev/shm");
        if dev_shm.is_dir() {
            return dev_shm.join(format!("{NAME_PREFIX}{name}"));
        }
    }

    std::env::temp_dir().join(format!("{NAME_PREFIX}{name}"))
}

/// A memory-mapped file shared between processes.
///
/// All access goes through atomics derived from `base`, which was taken from
/// the mapping's mutable pointer at creation.
pub struct SharedRegion {
    mmap: MmapMut,
    base: NonNull<u8>,
    name: String,
    /// Creator owns the file and removes it on drop.
    owns_memory: bool,
}

// SAFETY: the mapping is never reallocated and every access through `base`
// is atomic, so the region may be shared and sent across threads.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create (or truncate) a zero-filled region of `size` bytes.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let path = shm_path(name);

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = options.open(&path).map_err(|e| {
            IpcError::SharedMemory(format!("Failed to create shared memory file: {}", e))
        })?;

        file.set_len(size as u64)
            .map_err(|e| IpcError::SharedMemory(format!("Failed to set file size: {}", e)))?;

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            IpcError::SharedMemory(format!("Failed to create memory map: {}", e))
        })?;

        tracing::debug!(name, size, path = %path.display(), "shared region created");
        Self::from_mmap(mmap, name, true)
    }

    /// Attach to a region another process created.
    pub fn open(name: &str) -> Result<Self> {
        let path = shm_path(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                IpcError::SharedMemory(format!(
                    "Failed to open shared memory file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| IpcError::SharedMemory(format!("Failed to open memory map: {}", e)))?;

        Self::from_mmap(mmap, name, false)
    }

    fn from_mmap(mut mmap: MmapMut, name: &str, owns_memory: bool) -> Result<Self> {
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| IpcError::SharedMemory("Empty memory map".to_string()))?;
        Ok(Self {
            mmap,
            base,
            name: name.to_string(),
            owns_memory,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    fn check_bounds(&self, offset: usize, size: usize, align: usize) -> Result<()> {
        if offset % align != 0 || offset.checked_add(size).map_or(true, |end| end > self.len()) {
            return Err(IpcError::SharedMemory(format!(
                "Region '{}' ({} bytes) cannot hold {} bytes at offset {}",
                self.name,
                self.len(),
                size,
                offset
            )));
        }
        Ok(())
    }

    pub fn atomic_u32(&self, offset: usize) -> Result<&AtomicU32> {
        self.check_bounds(offset, 4, 4)?;
        // SAFETY: in bounds and aligned (mappings are page aligned)
        Ok(unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) })
    }

    pub fn atomic_u64(&self, offset: usize) -> Result<&AtomicU64> {
        self.check_bounds(offset, 8, 8)?;
        // SAFETY: in bounds and aligned (mappings are page aligned)
        Ok(unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU64) })
    }

    pub fn atomic_u32_slice(&self, offset: usize, count: usize) -> Result<&[AtomicU32]> {
        self.check_bounds(offset, count * 4, 4)?;
        // SAFETY: in bounds and aligned
        Ok(unsafe {
            std::slice::from_raw_parts(self.base.as_ptr().add(offset) as *const AtomicU32, count)
        })
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // Only clean up shared memory file if this instance owns it
        if self.owns_memory {
            let _ = std::fs::remove_file(shm_path(&self.name));
        }
    }
}

const COUNTER_LOCK: usize = 0;
const COUNTER_HOLDER: usize = 4;
const COUNTER_VALUE: usize = 8;
const COUNTER_SIZE: usize = 16;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Cross-process monotonically increasing counter (voice-id allocation).
///
/// A lock word in the shared region acts as a binary semaphore around the
/// read-increment. A lock that cannot be taken within the timeout means the
/// holder died inside the critical section; that is reported, not retried.
pub struct SharedCounter {
    region: SharedRegion,
    lock_timeout: Duration,
}

impl SharedCounter {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

    /// Create the shared state, seeded with 1 and unlocked.
    pub fn create(name: &str) -> Result<Self> {
        let region = SharedRegion::create(name, COUNTER_SIZE)?;
        region.atomic_u32(COUNTER_LOCK)?.store(UNLOCKED, Ordering::Release);
        region.atomic_u32(COUNTER_HOLDER)?.store(0, Ordering::Relaxed);
        region.atomic_u64(COUNTER_VALUE)?.store(1, Ordering::Release);
        Ok(Self {
            region,
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn open(name: &str) -> Result<Self> {
        let region = SharedRegion::open(name)?;
        if region.len() < COUNTER_SIZE {
            return Err(IpcError::SharedMemory(format!(
                "Region '{}' is too small for a counter",
                name
            )));
        }
        Ok(Self {
            region,
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Return the current value and advance it by one. No two callers, in any
    /// process, ever observe the same value.
    pub fn read_and_increment(&self) -> Result<u64> {
        self.acquire()?;
        let value = self.region.atomic_u64(COUNTER_VALUE)?;
        let current = value.load(Ordering::Relaxed);
        value.store(current + 1, Ordering::Relaxed);
        self.release()?;
        Ok(current)
    }

    /// Current value without taking the lock.
    pub fn peek(&self) -> Result<u64> {
        Ok(self.region.atomic_u64(COUNTER_VALUE)?.load(Ordering::Acquire))
    }

    fn acquire(&self) -> Result<()> {
        let lock = self.region.atomic_u32(COUNTER_LOCK)?;
        let start = Instant::now();
        let mut spins = 0u32;

        while lock
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if start.elapsed() >= self.lock_timeout {
                let holder = self.region.atomic_u32(COUNTER_HOLDER)?.load(Ordering::Relaxed);
                tracing::error!(counter = self.name(), holder, "shared counter lock is stuck");
                return Err(IpcError::LockTimeout {
                    name: self.name().to_string(),
                    holder,
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            if spins < 64 {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }

        self.region
            .atomic_u32(COUNTER_HOLDER)?
            .store(std::process::id(), Ordering::Relaxed);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let lock = self.region.atomic_u32(COUNTER_LOCK)?;
        lock.compare_exchange(LOCKED, UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| IpcError::LockNotHeld {
                name: self.name().to_string(),
            })
    }
}

const CAPTURE_CURSOR: usize = 0;
const CAPTURE_CHANNELS: usize = 8;
const CAPTURE_CAPACITY: usize = 12;
const CAPTURE_HEADER: usize = 64;

/// Capture ring storage in a named region, so renderers can read live input.
///
/// Layout: write cursor (u64), channels (u32), capacity in frames (u32),
/// padding to 64 bytes, then `capacity * channels` sample slots.
pub struct SharedCaptureStorage {
    region: SharedRegion,
    channels: usize,
    capacity: usize,
}

impl SharedCaptureStorage {
    pub fn create(name: &str, capacity_frames: usize, channels: usize) -> Result<Self> {
        let channels = channels.max(1);
        let capacity = capacity_frames.max(1);
        let region = SharedRegion::create(name, CAPTURE_HEADER + capacity * channels * 4)?;
        region.atomic_u32(CAPTURE_CHANNELS)?.store(channels as u32, Ordering::Relaxed);
        region.atomic_u32(CAPTURE_CAPACITY)?.store(capacity as u32, Ordering::Relaxed);
        region.atomic_u64(CAPTURE_CURSOR)?.store(0, Ordering::Release);
        Self::from_region(region)
    }

    pub fn open(name: &str) -> Result<Self> {
        Self::from_region(SharedRegion::open(name)?)
    }

    fn from_region(region: SharedRegion) -> Result<Self> {
        let channels = region.atomic_u32(CAPTURE_CHANNELS)?.load(Ordering::Acquire) as usize;
        let capacity = region.atomic_u32(CAPTURE_CAPACITY)?.load(Ordering::Acquire) as usize;
        if channels == 0 || capacity == 0 {
            return Err(IpcError::SharedMemory(format!(
                "Region '{}' has no capture header",
                region.name()
            )));
        }
        // Validates the slots fit before `slots()` relies on it
        region.atomic_u32_slice(CAPTURE_HEADER, capacity * channels)?;
        Ok(Self {
            region,
            channels,
            capacity,
        })
    }
}

impl CaptureStorage for SharedCaptureStorage {
    fn cursor(&self) -> &AtomicU64 {
        // SAFETY: offset 0 of a region at least CAPTURE_HEADER long
        unsafe { &*(self.region.base.as_ptr() as *const AtomicU64) }
    }

    fn slots(&self) -> &[AtomicU32] {
        // SAFETY: bounds checked in `from_region`
        unsafe {
            std::slice::from_raw_parts(
                self.region.base.as_ptr().add(CAPTURE_HEADER) as *const AtomicU32,
                self.capacity * self.channels,
            )
        }
    }

    fn channels(&self) -> usize {
        self.channels
    }
}
