//! Bounded single-producer/single-consumer sample buffer.
//!
//! Bridges the decode thread to the audio callback:
//! - the consumer side ([`SampleRing::get`]) never blocks, never allocates and never locks
//! - the producer side ([`SampleRing::put`]) waits for space, but always wakes up on cancellation
//!
//! ## Cursors
//! `front` counts samples ever written, `back` counts samples ever read. Both only grow, so
//! `front - back` is the fill level and `pos % capacity` is the slot. The producer publishes
//! `front` (release) after writing its slots; the consumer publishes `back` (release) after
//! reading. [`SampleRing::clear`] moves `back` from a third thread, so the consumer advances
//! `back` with a compare-exchange and discards what it read if the exchange fails.
//!
//! Samples are stored as `f32` bit patterns in `AtomicU32` slots; no `unsafe` is needed.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Fixed-capacity ring of interleaved `f32` samples.
pub struct SampleRing {
    slots: Box<[AtomicU32]>,
    front: AtomicU64,
    back: AtomicU64,
    // Only used to park the producer while the ring is full. The consumer never touches it.
    space_lock: Mutex<()>,
    space_cv: Condvar,
    backoff: Duration,
    underruns: AtomicU64,
}

impl SampleRing {
    /// Create a ring holding `capacity` samples (at least one).
    pub fn new(capacity: usize, backoff: Duration) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            front: AtomicU64::new(0),
            back: AtomicU64::new(0),
            space_lock: Mutex::new(()),
            space_cv: Condvar::new(),
            backoff,
            underruns: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Samples currently buffered (best-effort snapshot).
    pub fn len(&self) -> usize {
        let back = self.back.load(Ordering::Acquire);
        let front = self.front.load(Ordering::Acquire);
        front.saturating_sub(back) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of [`get`](Self::get) calls that returned silence because the ring ran dry.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Append `samples`, waiting for free space as needed.
    ///
    /// Never performs a short write: returns `true` once every sample is in the ring, or
    /// `false` if `cancel` was raised first (the remainder is dropped).
    pub fn put(&self, samples: &[f32], cancel: &AtomicBool) -> bool {
        let capacity = self.slots.len() as u64;
        let mut written = 0usize;

        while written < samples.len() {
            if cancel.load(Ordering::Acquire) {
                return false;
            }

            let front = self.front.load(Ordering::Relaxed);
            let back = self.back.load(Ordering::Acquire);
            let free = capacity.saturating_sub(front.saturating_sub(back)) as usize;
            if free == 0 {
                self.wait_for_space(cancel);
                continue;
            }

            let n = free.min(samples.len() - written);
            for (offset, sample) in samples[written..written + n].iter().enumerate() {
                let slot = ((front + offset as u64) % capacity) as usize;
                self.slots[slot].store(sample.to_bits(), Ordering::Relaxed);
            }
            self.front.store(front + n as u64, Ordering::Release);
            written += n;
        }

        true
    }

    /// Fill `out` from the ring, all or nothing.
    ///
    /// If fewer than `out.len()` samples are buffered, or a concurrent [`clear`](Self::clear)
    /// invalidated the read, `out` is filled with `default` and `false` is returned.
    /// Real-time safe: no locks, no allocation, no waiting.
    pub fn get(&self, out: &mut [f32], default: f32) -> bool {
        if out.is_empty() {
            return true;
        }
        let capacity = self.slots.len() as u64;
        let wanted = out.len() as u64;

        let back = self.back.load(Ordering::Acquire);
        let front = self.front.load(Ordering::Acquire);
        if front.saturating_sub(back) < wanted {
            out.fill(default);
            self.underruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        for (offset, sample) in out.iter_mut().enumerate() {
            let slot = ((back + offset as u64) % capacity) as usize;
            *sample = f32::from_bits(self.slots[slot].load(Ordering::Relaxed));
        }

        if self
            .back
            .compare_exchange(back, back + wanted, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // Cleared while reading; the slots may already hold newer audio.
            out.fill(default);
            return false;
        }
        true
    }

    /// Discard everything buffered so the next read sees only audio written after this call.
    pub fn clear(&self) {
        loop {
            let back = self.back.load(Ordering::Acquire);
            let front = self.front.load(Ordering::Acquire);
            if self
                .back
                .compare_exchange(back, front, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        self.wake_producer();
    }

    /// Wake a producer parked in [`put`](Self::put) so it re-checks its cancel flag.
    pub fn wake_producer(&self) {
        let _guard = self
            .space_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.space_cv.notify_all();
    }

    fn wait_for_space(&self, cancel: &AtomicBool) {
        let guard = self
            .space_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if cancel.load(Ordering::Acquire) || self.len() < self.slots.len() {
            return;
        }
        // The consumer does not signal; a short timed wait doubles as the backoff.
        let _ = self
            .space_cv
            .wait_timeout(guard, self.backoff)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }
}
