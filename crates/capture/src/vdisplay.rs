//! Virtual display lifecycle
//!
//! A virtual display is only ever fully set up or fully absent. Creation
//! builds every piece locally and publishes the result in one step; any
//! failure unwinds the pieces already built before the error is returned.

use std::sync::Arc;

use shared_protocol::Orientation;
use tracing::{debug, error, info, warn};

use crate::backend::{
    BackendResult, Compositor, DisplayToken, DisplayTransaction, GraphicBufferConsumer,
    GraphicBufferProducer,
};
use crate::format::native;
use crate::projection::{Projection, Rect};
use crate::{CaptureError, CaptureResult, CreationStep, FrameAvailabilityWaiter, FrameConsumer};

/// Name the virtual display is registered under
pub const VIRTUAL_DISPLAY_NAME: &str = "vdcap";

/// Pixel format requested from the producer
pub const CAPTURE_FORMAT: i32 = native::RGBA_8888;

/// Single outstanding buffer: the producer waits for the consumer
const MAX_LOCKED_BUFFERS: usize = 1;

const DEFAULT_LAYER_STACK: u32 = 0;

/// Geometry a virtual display is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualDisplayParams {
    /// Output buffer size
    pub desired_width: u32,
    pub desired_height: u32,
    /// Rotation applied to the layer stack
    pub orientation: Orientation,
    /// Size of the physical display's layer stack
    pub real_width: u32,
    pub real_height: u32,
}

impl VirtualDisplayParams {
    fn validate(&self) -> CaptureResult<()> {
        if self.desired_width == 0
            || self.desired_height == 0
            || self.real_width == 0
            || self.real_height == 0
        {
            error!(params = ?self, "Refusing to create a zero-sized virtual display");
            return Err(CaptureError::CreationFailed {
                step: CreationStep::ValidateGeometry,
                status: "BAD_VALUE",
            });
        }
        Ok(())
    }

    /// Projection of the real layer stack onto the desired output
    pub fn projection(&self) -> Projection {
        Projection::new(
            self.orientation,
            Rect::from_size(self.real_width, self.real_height),
            Rect::from_size(self.desired_width, self.desired_height),
        )
    }
}

/// Every resource backing one running virtual display
struct VirtualOutput {
    display: DisplayToken,
    producer: Arc<dyn GraphicBufferProducer>,
    /// Keeps the consumer endpoint alive as long as the display
    _queue: Arc<dyn GraphicBufferConsumer>,
    consumer: FrameConsumer,
    waiter: Arc<FrameAvailabilityWaiter>,
    params: VirtualDisplayParams,
}

/// Destroys a freshly created display unless creation completes
struct DisplayGuard<'a> {
    compositor: &'a dyn Compositor,
    token: DisplayToken,
    armed: bool,
}

impl<'a> DisplayGuard<'a> {
    fn new(compositor: &'a dyn Compositor, token: DisplayToken) -> Self {
        Self {
            compositor,
            token,
            armed: true,
        }
    }

    fn disarm(mut self) -> DisplayToken {
        self.armed = false;
        self.token
    }
}

impl Drop for DisplayGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(display = ?self.token, "Rolling back virtual display");
            self.compositor.destroy_display(self.token);
        }
    }
}

fn step<T>(step: CreationStep, result: BackendResult<T>) -> CaptureResult<T> {
    result.map_err(|status| {
        error!(%step, %status, "Virtual display setup failed");
        CaptureError::CreationFailed {
            step,
            status: status.name(),
        }
    })
}

/// Creates, tracks and tears down the capture's virtual display
pub struct VirtualDisplayManager {
    compositor: Arc<dyn Compositor>,
    output: Option<VirtualOutput>,
}

impl VirtualDisplayManager {
    pub fn new(compositor: Arc<dyn Compositor>) -> Self {
        Self {
            compositor,
            output: None,
        }
    }

    /// Whether a virtual display is currently up
    pub fn is_running(&self) -> bool {
        self.output.is_some()
    }

    /// Parameters of the running display
    pub fn params(&self) -> Option<&VirtualDisplayParams> {
        self.output.as_ref().map(|output| &output.params)
    }

    pub fn waiter(&self) -> Option<&Arc<FrameAvailabilityWaiter>> {
        self.output.as_ref().map(|output| &output.waiter)
    }

    pub fn consumer(&self) -> Option<&FrameConsumer> {
        self.output.as_ref().map(|output| &output.consumer)
    }

    pub fn consumer_mut(&mut self) -> Option<&mut FrameConsumer> {
        self.output.as_mut().map(|output| &mut output.consumer)
    }

    /// Set up a virtual display bound to a fresh buffer queue.
    ///
    /// An already running display is destroyed first.
    pub fn create(&mut self, params: VirtualDisplayParams) -> CaptureResult<()> {
        if self.output.is_some() {
            warn!("Virtual display already running, destroying it first");
            self.destroy();
        }

        let output = self.build(params)?;
        info!(
            display = ?output.display,
            width = params.desired_width,
            height = params.desired_height,
            orientation = params.orientation.degrees(),
            "Virtual display running"
        );
        self.output = Some(output);
        Ok(())
    }

    /// Tear down the running display, if any. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        let Some(mut output) = self.output.take() else {
            debug!("No virtual display to destroy");
            return;
        };

        info!(display = ?output.display, "Destroying virtual display");
        if output.consumer.unlock() {
            debug!("Released held buffer before teardown");
        }

        self.compositor.destroy_display(output.display);
        output.producer.disconnect();
    }

    /// Replace the running display with one using `params`
    pub fn reconfigure(&mut self, params: VirtualDisplayParams) -> CaptureResult<()> {
        self.destroy();
        self.create(params)
    }

    fn build(&self, params: VirtualDisplayParams) -> CaptureResult<VirtualOutput> {
        params.validate()?;

        debug!("Performing compositor init check");
        self.compositor.init_check().map_err(|status| {
            error!(%status, "Unable to initialize compositor client");
            CaptureError::ServiceUnavailable(status.name().to_string())
        })?;

        info!("Creating buffer queue");
        let (producer, queue) =
            step(CreationStep::CreateBufferQueue, self.compositor.create_buffer_queue())?;

        step(CreationStep::ConfigureBufferQueue, queue.disable_async_buffer())?;
        step(
            CreationStep::ConfigureBufferQueue,
            queue.set_default_buffer_size(params.desired_width, params.desired_height),
        )?;
        step(
            CreationStep::ConfigureBufferQueue,
            queue.set_default_buffer_format(CAPTURE_FORMAT),
        )?;

        info!("Creating CPU consumer");
        let mut cpu = step(
            CreationStep::CreateCpuConsumer,
            queue.create_cpu_consumer(MAX_LOCKED_BUFFERS),
        )?;
        cpu.set_name(VIRTUAL_DISPLAY_NAME);

        let waiter = Arc::new(FrameAvailabilityWaiter::new());
        cpu.set_frame_available_listener(Arc::clone(&waiter));
        let consumer = FrameConsumer::new(cpu);

        info!("Creating virtual display");
        let token = step(
            CreationStep::CreateDisplay,
            self.compositor.create_display(VIRTUAL_DISPLAY_NAME, true),
        )?;
        let guard = DisplayGuard::new(self.compositor.as_ref(), token);

        info!("Publishing virtual display");
        step(
            CreationStep::PublishDisplay,
            self.compositor.apply_transaction(DisplayTransaction {
                display: token,
                surface: Arc::clone(&producer),
                projection: params.projection(),
                layer_stack: DEFAULT_LAYER_STACK,
            }),
        )?;

        Ok(VirtualOutput {
            display: guard.disarm(),
            producer,
            _queue: queue,
            consumer,
            waiter,
            params,
        })
    }
}

impl Drop for VirtualDisplayManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
