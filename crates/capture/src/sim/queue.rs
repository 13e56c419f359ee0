//! Single-slot buffer queue of the simulated compositor

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::{FailPoint, SimEvent, Telemetry};
use crate::FrameAvailabilityWaiter;
use crate::backend::{
    BackendResult, BackendStatus, BufferMut, CpuConsumer, GraphicBufferConsumer,
    GraphicBufferProducer, LockedBuffer,
};
use crate::format::{bytes_per_pixel, native};

/// Row pitch alignment, in pixels
const STRIDE_ALIGNMENT: u32 = 32;

fn aligned_stride(width: u32) -> u32 {
    width.div_ceil(STRIDE_ALIGNMENT) * STRIDE_ALIGNMENT
}

struct QueuedBuffer {
    data: Bytes,
    width: u32,
    height: u32,
    stride: u32,
    format: i32,
    frame_number: u64,
    timestamp_ns: i64,
}

struct QueueState {
    /// Drop-oldest mode; when off the producer waits for the consumer
    async_mode: bool,
    width: u32,
    height: u32,
    format: i32,
    queued: Option<QueuedBuffer>,
    locked: bool,
    has_cpu_consumer: bool,
    listener: Option<Arc<FrameAvailabilityWaiter>>,
    abandoned: bool,
    next_frame: u64,
}

/// State shared by both endpoints and the CPU consumer
pub(super) struct QueueCore {
    id: u64,
    state: Mutex<QueueState>,
    slot_freed: Condvar,
    epoch: Instant,
    telemetry: Arc<Telemetry>,
}

impl QueueCore {
    pub(super) fn new(id: u64, telemetry: Arc<Telemetry>) -> Arc<Self> {
        telemetry.live_queues.fetch_add(1, Ordering::SeqCst);
        telemetry.record(SimEvent::QueueCreated(id));

        Arc::new(Self {
            id,
            state: Mutex::new(QueueState {
                async_mode: true,
                width: 1,
                height: 1,
                format: native::RGBA_8888,
                queued: None,
                locked: false,
                has_cpu_consumer: false,
                listener: None,
                abandoned: false,
                next_frame: 0,
            }),
            slot_freed: Condvar::new(),
            epoch: Instant::now(),
            telemetry,
        })
    }
}

impl Drop for QueueCore {
    fn drop(&mut self) {
        self.telemetry.live_queues.fetch_sub(1, Ordering::SeqCst);
        self.telemetry.record(SimEvent::QueueReleased(self.id));
        trace!(queue = self.id, "Buffer queue released");
    }
}

pub(super) struct SimProducer {
    pub(super) core: Arc<QueueCore>,
}

impl GraphicBufferProducer for SimProducer {
    fn produce(&self, render: &mut dyn FnMut(BufferMut<'_>)) -> BackendResult<u64> {
        let core = &self.core;
        let mut state = core.state.lock();

        loop {
            if state.abandoned {
                return Err(BackendStatus::DEAD_OBJECT);
            }
            let slot_busy = !state.async_mode && (state.locked || state.queued.is_some());
            if !slot_busy {
                break;
            }
            core.slot_freed.wait(&mut state);
        }

        let (width, height, format) = (state.width, state.height, state.format);
        let bpp = bytes_per_pixel(format) as usize;
        if bpp == 0 {
            return Err(BackendStatus::BAD_VALUE);
        }
        drop(state);

        // Render without holding the queue lock
        let stride = aligned_stride(width);
        let mut data = BytesMut::zeroed(stride as usize * height as usize * bpp);
        render(BufferMut {
            data: &mut data[..],
            width,
            height,
            stride,
            format,
        });

        let mut state = core.state.lock();
        if state.abandoned {
            return Err(BackendStatus::DEAD_OBJECT);
        }

        let frame_number = state.next_frame;
        state.next_frame += 1;

        let replaced = state.queued.replace(QueuedBuffer {
            data: data.freeze(),
            width,
            height,
            stride,
            format,
            frame_number,
            timestamp_ns: core.epoch.elapsed().as_nanos() as i64,
        });
        let listener = state.listener.clone();
        drop(state);

        // A replaced buffer was already announced; announcing again would
        // leave the waiter with a notification no buffer backs.
        if replaced.is_some() {
            trace!(queue = core.id, frame_number, "Dropped stale buffer");
        } else if let Some(listener) = listener {
            listener.on_frame_available();
        }

        Ok(frame_number)
    }

    fn disconnect(&self) {
        let mut state = self.core.state.lock();
        if !state.abandoned {
            debug!(queue = self.core.id, "Producer disconnected");
        }
        state.abandoned = true;
        state.queued = None;
        self.core.slot_freed.notify_all();
    }
}

pub(super) struct SimConsumerEndpoint {
    pub(super) core: Arc<QueueCore>,
}

impl GraphicBufferConsumer for SimConsumerEndpoint {
    fn disable_async_buffer(&self) -> BackendResult<()> {
        let mut state = self.core.state.lock();
        if state.has_cpu_consumer {
            return Err(BackendStatus::INVALID_OPERATION);
        }
        state.async_mode = false;
        Ok(())
    }

    fn set_default_buffer_size(&self, width: u32, height: u32) -> BackendResult<()> {
        self.core.telemetry.check(FailPoint::ConfigureBufferQueue)?;
        if width == 0 || height == 0 {
            return Err(BackendStatus::BAD_VALUE);
        }

        let mut state = self.core.state.lock();
        state.width = width;
        state.height = height;
        Ok(())
    }

    fn set_default_buffer_format(&self, format: i32) -> BackendResult<()> {
        // Only 32-bit formats are rendered
        if bytes_per_pixel(format) != 4 {
            return Err(BackendStatus::BAD_VALUE);
        }
        self.core.state.lock().format = format;
        Ok(())
    }

    fn create_cpu_consumer(&self, max_locked_buffers: usize) -> BackendResult<Box<dyn CpuConsumer>> {
        self.core.telemetry.check(FailPoint::CreateCpuConsumer)?;
        if max_locked_buffers != 1 {
            return Err(BackendStatus::BAD_VALUE);
        }

        let mut state = self.core.state.lock();
        if state.has_cpu_consumer {
            return Err(BackendStatus::ALREADY_EXISTS);
        }
        state.has_cpu_consumer = true;
        drop(state);

        Ok(Box::new(SimCpuConsumer {
            core: Arc::clone(&self.core),
            name: String::new(),
            locked: None,
        }))
    }
}

pub(super) struct SimCpuConsumer {
    core: Arc<QueueCore>,
    name: String,
    locked: Option<Bytes>,
}

impl SimCpuConsumer {
    fn release_slot(&self) {
        let mut state = self.core.state.lock();
        state.locked = false;
        self.core.slot_freed.notify_all();
    }
}

impl CpuConsumer for SimCpuConsumer {
    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn set_frame_available_listener(&mut self, listener: Arc<FrameAvailabilityWaiter>) {
        self.core.state.lock().listener = Some(listener);
    }

    fn lock_next_buffer(&mut self) -> BackendResult<LockedBuffer> {
        self.core.telemetry.check(FailPoint::LockBuffer)?;
        if self.locked.is_some() {
            return Err(BackendStatus::INVALID_OPERATION);
        }

        let mut state = self.core.state.lock();
        let buffer = state.queued.take().ok_or(BackendStatus::NOT_ENOUGH_DATA)?;
        state.locked = true;
        drop(state);

        trace!(consumer = %self.name, frame = buffer.frame_number, "Buffer acquired");
        self.locked = Some(buffer.data);
        Ok(LockedBuffer {
            slot: 0,
            width: buffer.width,
            height: buffer.height,
            stride: buffer.stride,
            format: buffer.format,
            frame_number: buffer.frame_number,
            timestamp_ns: buffer.timestamp_ns,
        })
    }

    fn locked_data(&self) -> &[u8] {
        self.locked.as_deref().unwrap_or(&[])
    }

    fn unlock_buffer(&mut self, _buffer: LockedBuffer) -> BackendResult<()> {
        if self.locked.take().is_none() {
            return Err(BackendStatus::BAD_VALUE);
        }
        self.release_slot();
        Ok(())
    }
}

impl Drop for SimCpuConsumer {
    fn drop(&mut self) {
        if self.locked.take().is_some() {
            self.release_slot();
        }
        self.core.state.lock().listener = None;
    }
}
