//! Frame pacing.
//!
//! [`FrameLimiter`] is a counting semaphore that bounds how many frames the
//! CPU may have submitted without the GPU confirming completion. A permit is
//! taken before recording a frame and given back from the device's
//! work-done callback.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Counting semaphore capped at the number of frames in flight.
///
/// Cloning shares the same permits, so a clone can be moved into a
/// completion callback.
#[derive(Clone)]
pub struct FrameLimiter {
    inner: Arc<LimiterState>,
}

struct LimiterState {
    available: Mutex<u32>,
    signal: Condvar,
    max: u32,
}

impl FrameLimiter {
    #[must_use]
    pub fn new(max_frames_in_flight: u32) -> Self {
        Self {
            inner: Arc::new(LimiterState {
                available: Mutex::new(max_frames_in_flight),
                signal: Condvar::new(),
                max: max_frames_in_flight,
            }),
        }
    }

    /// Blocks until a frame slot is free, then takes it.
    pub fn acquire(&self) {
        let mut available = self.inner.available.lock();
        while *available == 0 {
            self.inner.signal.wait(&mut available);
        }
        *available -= 1;
    }

    /// Takes a frame slot if one is free without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut available = self.inner.available.lock();
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    /// Returns a frame slot and wakes one waiter.
    pub fn release(&self) {
        let mut available = self.inner.available.lock();
        if *available < self.inner.max {
            *available += 1;
        } else {
            log::warn!("FrameLimiter released more often than acquired");
        }
        self.inner.signal.notify_one();
    }

    /// Frames acquired and not yet released.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.inner.max - *self.inner.available.lock()
    }

    #[must_use]
    pub fn max_frames_in_flight(&self) -> u32 {
        self.inner.max
    }
}

/// The frame currently being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Monotonic frame counter, starting at 0.
    pub index: u64,
    pub frames_in_flight: u32,
}

impl FrameInfo {
    #[must_use]
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            index: 0,
            frames_in_flight,
        }
    }

    /// Rotation slot for per-frame resources.
    #[inline]
    #[must_use]
    pub fn slot(&self) -> u32 {
        (self.index % u64::from(self.frames_in_flight)) as u32
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }
}
