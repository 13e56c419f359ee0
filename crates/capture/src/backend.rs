//! Compositor backend abstraction
//!
//! Everything that talks to the platform compositor or its buffer queues goes
//! through these traits. Raw `status_t` codes stay on this side of the seam;
//! the rest of the crate sees [`crate::CaptureError`] only.

use std::fmt;
use std::sync::Arc;

use crate::FrameAvailabilityWaiter;
use crate::projection::Projection;

/// Raw status code reported by the compositor or buffer queue
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendStatus(pub i32);

impl BackendStatus {
    pub const OK: Self = Self(0);
    pub const UNKNOWN_ERROR: Self = Self(i32::MIN);
    pub const NO_MEMORY: Self = Self(-12);
    pub const INVALID_OPERATION: Self = Self(-38);
    pub const BAD_VALUE: Self = Self(-22);
    pub const BAD_TYPE: Self = Self(i32::MIN + 1);
    pub const NAME_NOT_FOUND: Self = Self(-2);
    pub const PERMISSION_DENIED: Self = Self(-1);
    pub const NO_INIT: Self = Self(-19);
    pub const ALREADY_EXISTS: Self = Self(-17);
    pub const DEAD_OBJECT: Self = Self(-32);
    pub const FAILED_TRANSACTION: Self = Self(i32::MIN + 2);
    pub const BAD_INDEX: Self = Self(-75);
    pub const NOT_ENOUGH_DATA: Self = Self(-61);
    pub const WOULD_BLOCK: Self = Self(-11);
    pub const TIMED_OUT: Self = Self(-110);
    pub const UNKNOWN_TRANSACTION: Self = Self(-74);
    pub const FDS_NOT_ALLOWED: Self = Self(i32::MIN + 7);

    /// Symbolic name, safe to surface in errors
    pub fn name(self) -> &'static str {
        match self {
            Self::OK => "NO_ERROR",
            Self::UNKNOWN_ERROR => "UNKNOWN_ERROR",
            Self::NO_MEMORY => "NO_MEMORY",
            Self::INVALID_OPERATION => "INVALID_OPERATION",
            Self::BAD_VALUE => "BAD_VALUE",
            Self::BAD_TYPE => "BAD_TYPE",
            Self::NAME_NOT_FOUND => "NAME_NOT_FOUND",
            Self::PERMISSION_DENIED => "PERMISSION_DENIED",
            Self::NO_INIT => "NO_INIT",
            Self::ALREADY_EXISTS => "ALREADY_EXISTS",
            Self::DEAD_OBJECT => "DEAD_OBJECT",
            Self::FAILED_TRANSACTION => "FAILED_TRANSACTION",
            Self::BAD_INDEX => "BAD_INDEX",
            Self::NOT_ENOUGH_DATA => "NOT_ENOUGH_DATA",
            Self::WOULD_BLOCK => "WOULD_BLOCK",
            Self::TIMED_OUT => "TIMED_OUT",
            Self::UNKNOWN_TRANSACTION => "UNKNOWN_TRANSACTION",
            Self::FDS_NOT_ALLOWED => "FDS_NOT_ALLOWED",
            _ => "UNMAPPED_ERROR",
        }
    }

    /// Whether the status means the service connection itself is gone
    pub fn is_connection_failure(self) -> bool {
        matches!(
            self,
            Self::DEAD_OBJECT | Self::NO_INIT | Self::FAILED_TRANSACTION | Self::UNKNOWN_TRANSACTION
        )
    }
}

impl fmt::Debug for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub type BackendResult<T> = Result<T, BackendStatus>;

/// Display description as reported by the compositor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDisplayInfo {
    pub w: u32,
    pub h: u32,
    /// Quarter turns
    pub orientation: u8,
    pub fps: f32,
    pub density: f32,
    pub xdpi: f32,
    pub ydpi: f32,
    pub secure: bool,
}

/// Compositor-side handle of a virtual display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayToken(pub u64);

/// Metadata of the buffer currently locked by a [`CpuConsumer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedBuffer {
    pub slot: usize,
    pub width: u32,
    pub height: u32,
    /// Row pitch in pixels
    pub stride: u32,
    /// Native pixel format code
    pub format: i32,
    pub frame_number: u64,
    pub timestamp_ns: i64,
}

/// Writable view of a dequeued buffer, handed to the renderer
pub struct BufferMut<'a> {
    pub data: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    /// Row pitch in pixels
    pub stride: u32,
    /// Native pixel format code
    pub format: i32,
}

/// Display state published atomically in one compositor transaction
pub struct DisplayTransaction {
    pub display: DisplayToken,
    pub surface: Arc<dyn GraphicBufferProducer>,
    pub projection: Projection,
    pub layer_stack: u32,
}

/// Connection to the platform compositor service
pub trait Compositor: Send + Sync {
    /// Start the process-wide RPC thread pool used for compositor callbacks
    fn start_thread_pool(&self);

    /// Verify that a compositor client can be established
    fn init_check(&self) -> BackendResult<()>;

    /// Query a built-in (physical) display
    fn builtin_display_info(&self, display_id: i32) -> BackendResult<RawDisplayInfo>;

    /// Allocate a buffer queue, returning its producer and consumer endpoints
    fn create_buffer_queue(
        &self,
    ) -> BackendResult<(Arc<dyn GraphicBufferProducer>, Arc<dyn GraphicBufferConsumer>)>;

    /// Register a new virtual display
    fn create_display(&self, name: &str, secure: bool) -> BackendResult<DisplayToken>;

    /// Apply surface, projection and layer stack of a display in one transaction
    fn apply_transaction(&self, transaction: DisplayTransaction) -> BackendResult<()>;

    /// Remove a virtual display. Unknown tokens are ignored.
    fn destroy_display(&self, display: DisplayToken);
}

/// Producer endpoint of a buffer queue (the compositor renders into it)
pub trait GraphicBufferProducer: Send + Sync {
    /// Dequeue a free buffer, let `render` fill it, and queue it.
    ///
    /// Blocks while no slot is free. Returns the queued frame number.
    fn produce(&self, render: &mut dyn FnMut(BufferMut<'_>)) -> BackendResult<u64>;

    /// Abandon the queue; blocked and future `produce` calls fail
    fn disconnect(&self);
}

/// Consumer endpoint of a buffer queue
pub trait GraphicBufferConsumer: Send + Sync {
    /// Switch the queue to synchronous, non-dropping mode
    fn disable_async_buffer(&self) -> BackendResult<()>;

    fn set_default_buffer_size(&self, width: u32, height: u32) -> BackendResult<()>;

    fn set_default_buffer_format(&self, format: i32) -> BackendResult<()>;

    /// Attach a CPU-mapped consumer allowing `max_locked_buffers` locks at once
    fn create_cpu_consumer(&self, max_locked_buffers: usize) -> BackendResult<Box<dyn CpuConsumer>>;
}

/// Consumer exposing queued buffers as readable memory
pub trait CpuConsumer: Send {
    fn set_name(&mut self, name: &str);

    /// Register the waiter signalled once per queued buffer
    fn set_frame_available_listener(&mut self, listener: Arc<FrameAvailabilityWaiter>);

    fn lock_next_buffer(&mut self) -> BackendResult<LockedBuffer>;

    /// Pixel data of the currently locked buffer; empty when nothing is locked
    fn locked_data(&self) -> &[u8];

    fn unlock_buffer(&mut self, buffer: LockedBuffer) -> BackendResult<()>;
}
