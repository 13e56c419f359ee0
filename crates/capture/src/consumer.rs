//! CPU-side buffer locking

use tracing::{error, trace, warn};

use crate::backend::{BackendStatus, CpuConsumer, LockedBuffer};
use crate::format::{bytes_per_pixel, to_portable};
use crate::{CaptureError, CaptureResult, Frame};

/// Owns the CPU consumer of a virtual display's buffer queue and tracks the
/// single buffer it may hold.
pub struct FrameConsumer {
    inner: Box<dyn CpuConsumer>,
    held: Option<LockedBuffer>,
}

impl FrameConsumer {
    pub fn new(inner: Box<dyn CpuConsumer>) -> Self {
        Self { inner, held: None }
    }

    /// Whether a buffer is currently locked
    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// Lock the next queued buffer.
    ///
    /// Only one buffer may be held; call [`Self::unlock`] first.
    pub fn lock_next(&mut self) -> CaptureResult<&LockedBuffer> {
        if self.held.is_some() {
            error!("Buffer still locked, refusing to lock another");
            return Err(CaptureError::LockFailed(BackendStatus::INVALID_OPERATION.name()));
        }

        let buffer = self.inner.lock_next_buffer().map_err(|status| {
            error!(%status, "Unable to lock next buffer");
            CaptureError::LockFailed(status.name())
        })?;

        if frame_size(&buffer).is_none() {
            error!(
                width = buffer.width,
                height = buffer.height,
                stride = buffer.stride,
                "Locked buffer too large to describe"
            );
            if let Err(status) = self.inner.unlock_buffer(buffer) {
                warn!(%status, "Unable to unlock buffer");
            }
            return Err(CaptureError::LockFailed(BackendStatus::BAD_VALUE.name()));
        }

        trace!(frame = buffer.frame_number, slot = buffer.slot, "Locked buffer");
        Ok(self.held.insert(buffer))
    }

    /// Return the held buffer to the queue. Returns `false` if nothing was held.
    pub fn unlock(&mut self) -> bool {
        let Some(buffer) = self.held.take() else {
            return false;
        };

        if let Err(status) = self.inner.unlock_buffer(buffer) {
            warn!(%status, "Unable to unlock buffer");
        }
        true
    }

    /// Borrowed view of the held buffer
    pub fn frame(&self) -> Option<Frame<'_>> {
        let buffer = self.held.as_ref()?;

        Some(Frame {
            data: self.inner.locked_data(),
            format: to_portable(buffer.format),
            width: buffer.width,
            height: buffer.height,
            stride: buffer.stride,
            bytes_per_pixel: bytes_per_pixel(buffer.format),
            size: frame_size(buffer)?,
            frame_number: buffer.frame_number,
            timestamp_ns: buffer.timestamp_ns,
        })
    }
}

/// `stride * height * bpp`, or `None` if it does not fit a `u32`
fn frame_size(buffer: &LockedBuffer) -> Option<u32> {
    buffer
        .stride
        .checked_mul(buffer.height)?
        .checked_mul(bytes_per_pixel(buffer.format) as u32)
}

impl Drop for FrameConsumer {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, BufferMut, Compositor, GraphicBufferConsumer};
    use crate::format::native;
    use crate::sim::SimulatedCompositor;
    use crate::FrameAvailabilityWaiter;
    use shared_protocol::PixelFormat;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn consumer_with_frame() -> (FrameConsumer, Arc<FrameAvailabilityWaiter>) {
        let compositor = SimulatedCompositor::new();
        let (producer, queue) = compositor.create_buffer_queue().unwrap();
        queue.disable_async_buffer().unwrap();
        queue.set_default_buffer_size(30, 10).unwrap();
        queue.set_default_buffer_format(native::RGBA_8888).unwrap();

        let mut cpu = queue.create_cpu_consumer(1).unwrap();
        let waiter = Arc::new(FrameAvailabilityWaiter::new());
        cpu.set_frame_available_listener(Arc::clone(&waiter));

        producer
            .produce(&mut |buffer: BufferMut<'_>| buffer.data.fill(0x7f))
            .unwrap();
        (FrameConsumer::new(cpu), waiter)
    }

    #[test]
    fn test_lock_exposes_frame() {
        let (mut consumer, waiter) = consumer_with_frame();
        assert_eq!(waiter.pending(), 1);

        consumer.lock_next().unwrap();
        let frame = consumer.frame().unwrap();
        assert_eq!(frame.format, PixelFormat::Rgba8888);
        assert_eq!((frame.width, frame.height), (30, 10));
        assert!(frame.stride >= frame.width);
        assert_eq!(frame.size as usize, frame.data.len());
        assert!(frame.data.iter().all(|&b| b == 0x7f));
    }

    #[test]
    fn test_single_lock_at_a_time() {
        let (mut consumer, _waiter) = consumer_with_frame();
        consumer.lock_next().unwrap();

        assert!(matches!(
            consumer.lock_next(),
            Err(CaptureError::LockFailed("INVALID_OPERATION"))
        ));

        assert!(consumer.unlock());
        assert!(!consumer.unlock());
        assert!(consumer.frame().is_none());
    }

    #[test]
    fn test_lock_without_queued_buffer() {
        let (mut consumer, _waiter) = consumer_with_frame();
        consumer.lock_next().unwrap();
        consumer.unlock();

        assert!(matches!(
            consumer.lock_next(),
            Err(CaptureError::LockFailed("NOT_ENOUGH_DATA"))
        ));
        assert!(!consumer.is_holding());
    }

    /// Hands out one buffer with fixed geometry and no pixel data
    struct FixedConsumer {
        buffer: Option<LockedBuffer>,
        unlocked: Arc<AtomicBool>,
    }

    impl CpuConsumer for FixedConsumer {
        fn set_name(&mut self, _name: &str) {}

        fn set_frame_available_listener(&mut self, _listener: Arc<FrameAvailabilityWaiter>) {}

        fn lock_next_buffer(&mut self) -> BackendResult<LockedBuffer> {
            self.buffer.take().ok_or(BackendStatus::NOT_ENOUGH_DATA)
        }

        fn locked_data(&self) -> &[u8] {
            &[]
        }

        fn unlock_buffer(&mut self, _buffer: LockedBuffer) -> BackendResult<()> {
            self.unlocked.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_oversized_buffer_is_rejected() {
        let unlocked = Arc::new(AtomicBool::new(false));
        let mut consumer = FrameConsumer::new(Box::new(FixedConsumer {
            buffer: Some(LockedBuffer {
                slot: 0,
                width: 40_000,
                height: 30_000,
                stride: 40_000,
                format: native::RGBA_8888,
                frame_number: 0,
                timestamp_ns: 0,
            }),
            unlocked: Arc::clone(&unlocked),
        }));

        assert!(matches!(
            consumer.lock_next(),
            Err(CaptureError::LockFailed("BAD_VALUE"))
        ));
        assert!(unlocked.load(Ordering::SeqCst));
        assert!(!consumer.is_holding());
        assert!(consumer.frame().is_none());
    }
}
