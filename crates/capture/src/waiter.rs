//! Frame-available signalling between the compositor and the capture thread

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counting semaphore fed by the buffer queue's frame-available events.
///
/// Notifications that arrive before anyone waits are kept, so no frame is
/// ever missed; each wait consumes exactly one.
#[derive(Debug, Default)]
pub struct FrameAvailabilityWaiter {
    pending: Mutex<u32>,
    available: Condvar,
}

impl FrameAvailabilityWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the producer side whenever a buffer was queued
    pub fn on_frame_available(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_add(1);
        self.available.notify_one();
    }

    /// Block until a frame is available, then consume the notification
    pub fn wait_for_frame(&self) {
        let mut pending = self.pending.lock();
        while *pending == 0 {
            self.available.wait(&mut pending);
        }
        *pending -= 1;
    }

    /// Like [`Self::wait_for_frame`] but gives up after `timeout`.
    ///
    /// Returns `false` if no notification arrived in time.
    pub fn wait_for_frame_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while *pending == 0 {
            if self.available.wait_until(&mut pending, deadline).timed_out() && *pending == 0 {
                return false;
            }
        }
        *pending -= 1;
        true
    }

    /// Notifications not yet consumed
    pub fn pending(&self) -> u32 {
        *self.pending.lock()
    }
}
