//! Software compositor
//!
//! Implements the backend traits entirely in process: it serves built-in
//! display descriptions, hands out single-slot buffer queues, and runs one
//! render thread per published virtual display that paints a test pattern
//! through the display's projection. Used by the CLI and by tests, which also
//! rely on its failure injection and resource counters.

mod queue;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendResult, BackendStatus, BufferMut, Compositor, DisplayToken, DisplayTransaction,
    GraphicBufferConsumer, GraphicBufferProducer, RawDisplayInfo,
};
use crate::format::native;
use crate::projection::Projection;

use queue::{QueueCore, SimConsumerEndpoint, SimProducer};

/// Operations that can be made to fail once via [`SimulatedCompositor::fail_next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InitCheck,
    DisplayInfo,
    CreateBufferQueue,
    ConfigureBufferQueue,
    CreateCpuConsumer,
    CreateDisplay,
    ApplyTransaction,
    LockBuffer,
}

/// Resource lifecycle events, in the order they happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    ThreadPoolStarted,
    QueueCreated(u64),
    QueueReleased(u64),
    DisplayCreated(DisplayToken),
    TransactionApplied(DisplayToken),
    DisplayDestroyed(DisplayToken),
}

/// Counters and injected failures, shared with every queue
#[derive(Default)]
pub(crate) struct Telemetry {
    events: Mutex<Vec<SimEvent>>,
    live_queues: AtomicUsize,
    failures: Mutex<HashMap<FailPoint, BackendStatus>>,
}

impl Telemetry {
    fn record(&self, event: SimEvent) {
        self.events.lock().push(event);
    }

    /// Consume an injected failure for `point`, if one is armed
    fn check(&self, point: FailPoint) -> BackendResult<()> {
        match self.failures.lock().remove(&point) {
            Some(status) => {
                debug!(?point, %status, "Injected failure");
                Err(status)
            }
            None => Ok(()),
        }
    }
}

struct Renderer {
    stop: Sender<()>,
    surface: Arc<dyn GraphicBufferProducer>,
    handle: JoinHandle<()>,
}

impl Renderer {
    fn spawn(
        token: DisplayToken,
        surface: Arc<dyn GraphicBufferProducer>,
        projection: Projection,
        interval: Duration,
    ) -> BackendResult<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let producer = Arc::clone(&surface);

        let handle = thread::Builder::new()
            .name(format!("sim-render-{}", token.0))
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }

                    let result = producer.produce(&mut |buffer: BufferMut<'_>| {
                        paint(&projection, buffer);
                    });
                    if let Err(status) = result {
                        debug!(?token, %status, "Render surface gone");
                        break;
                    }
                }
            })
            .map_err(|e| {
                warn!(error = %e, "Unable to spawn render thread");
                BackendStatus::NO_MEMORY
            })?;

        Ok(Self {
            stop,
            surface,
            handle,
        })
    }

    fn stop(self) {
        drop(self.stop);
        self.surface.disconnect();
        if self.handle.join().is_err() {
            warn!("Render thread panicked");
        }
    }
}

/// Test-pattern color of output pixel `(x, y)` in RGBA order: red follows the
/// layer-stack x, green the layer-stack y. `None` outside the visible rect.
fn pattern(projection: &Projection, x: u32, y: u32) -> Option<[u8; 4]> {
    let layer = projection.layer_stack;
    let max_x = layer.width.saturating_sub(1).max(1);
    let max_y = layer.height.saturating_sub(1).max(1);

    let (lx, ly) = projection.map_to_layer_stack(x, y)?;
    let r = ((lx - layer.x) * 255 / max_x) as u8;
    let g = ((ly - layer.y) * 255 / max_y) as u8;
    Some([r, g, 0, 0xff])
}

fn paint(projection: &Projection, buffer: BufferMut<'_>) {
    let bpp = 4;
    let bgr = buffer.format == native::BGRA_8888;

    for y in 0..buffer.height {
        let row = y as usize * buffer.stride as usize * bpp;
        for x in 0..buffer.width {
            let Some(mut color) = pattern(projection, x, y) else {
                continue;
            };
            if bgr {
                color.swap(0, 2);
            }

            let offset = row + x as usize * bpp;
            buffer.data[offset..offset + bpp].copy_from_slice(&color);
        }
    }
}

struct VirtualDisplay {
    name: String,
    projection: Option<Projection>,
    renderer: Option<Renderer>,
}

/// Builder for [`SimulatedCompositor`]
pub struct SimulatedCompositorBuilder {
    displays: HashMap<i32, RawDisplayInfo>,
    frame_interval: Duration,
}

impl SimulatedCompositorBuilder {
    /// Add or replace a built-in display
    pub fn display(mut self, display_id: i32, info: RawDisplayInfo) -> Self {
        self.displays.insert(display_id, info);
        self
    }

    /// Delay between rendered frames
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Render `fps` frames per second; 0 renders as fast as the consumer allows
    pub fn frame_rate(self, fps: u32) -> Self {
        let interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / fps
        };
        self.frame_interval(interval)
    }

    pub fn build(self) -> SimulatedCompositor {
        SimulatedCompositor {
            displays: self.displays,
            virtual_displays: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            frame_interval: self.frame_interval,
            telemetry: Arc::new(Telemetry::default()),
            thread_pool_started: AtomicBool::new(false),
        }
    }
}

/// In-process compositor backend
pub struct SimulatedCompositor {
    displays: HashMap<i32, RawDisplayInfo>,
    virtual_displays: Mutex<HashMap<DisplayToken, VirtualDisplay>>,
    next_id: AtomicU64,
    frame_interval: Duration,
    telemetry: Arc<Telemetry>,
    thread_pool_started: AtomicBool,
}

impl SimulatedCompositor {
    /// Portrait 1080x1920 panel at 60 Hz as display 0
    pub fn default_display() -> RawDisplayInfo {
        RawDisplayInfo {
            w: 1080,
            h: 1920,
            orientation: 0,
            fps: 60.0,
            density: 3.0,
            xdpi: 480.0,
            ydpi: 480.0,
            secure: true,
        }
    }

    pub fn builder() -> SimulatedCompositorBuilder {
        SimulatedCompositorBuilder {
            displays: HashMap::from([(0, Self::default_display())]),
            frame_interval: Duration::from_millis(16),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Make the next call at `point` fail with `status`
    pub fn fail_next(&self, point: FailPoint, status: BackendStatus) {
        self.telemetry.failures.lock().insert(point, status);
    }

    /// Virtual displays currently registered
    pub fn live_displays(&self) -> usize {
        self.virtual_displays.lock().len()
    }

    /// Buffer queues not yet released by every endpoint
    pub fn live_queues(&self) -> usize {
        self.telemetry.live_queues.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.telemetry.events.lock().clone()
    }

    pub fn thread_pool_started(&self) -> bool {
        self.thread_pool_started.load(Ordering::SeqCst)
    }

    /// Projection last published for a virtual display
    pub fn projection(&self, token: DisplayToken) -> Option<Projection> {
        self.virtual_displays
            .lock()
            .get(&token)
            .and_then(|vd| vd.projection)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SimulatedCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor for SimulatedCompositor {
    fn start_thread_pool(&self) {
        if !self.thread_pool_started.swap(true, Ordering::SeqCst) {
            info!("Simulated compositor thread pool started");
            self.telemetry.record(SimEvent::ThreadPoolStarted);
        }
    }

    fn init_check(&self) -> BackendResult<()> {
        self.telemetry.check(FailPoint::InitCheck)
    }

    fn builtin_display_info(&self, display_id: i32) -> BackendResult<RawDisplayInfo> {
        self.telemetry.check(FailPoint::DisplayInfo)?;
        self.displays
            .get(&display_id)
            .copied()
            .ok_or(BackendStatus::NAME_NOT_FOUND)
    }

    fn create_buffer_queue(
        &self,
    ) -> BackendResult<(Arc<dyn GraphicBufferProducer>, Arc<dyn GraphicBufferConsumer>)> {
        self.telemetry.check(FailPoint::CreateBufferQueue)?;

        let core = QueueCore::new(self.next_id(), Arc::clone(&self.telemetry));
        let producer = Arc::new(SimProducer {
            core: Arc::clone(&core),
        });
        let consumer = Arc::new(SimConsumerEndpoint { core });
        Ok((producer, consumer))
    }

    fn create_display(&self, name: &str, secure: bool) -> BackendResult<DisplayToken> {
        self.telemetry.check(FailPoint::CreateDisplay)?;

        let token = DisplayToken(self.next_id());
        debug!(?token, name, secure, "Virtual token registered");
        self.virtual_displays.lock().insert(
            token,
            VirtualDisplay {
                name: name.to_string(),
                projection: None,
                renderer: None,
            },
        );
        self.telemetry.record(SimEvent::DisplayCreated(token));
        Ok(token)
    }

    fn apply_transaction(&self, transaction: DisplayTransaction) -> BackendResult<()> {
        self.telemetry.check(FailPoint::ApplyTransaction)?;

        let DisplayTransaction {
            display: token,
            surface,
            projection,
            layer_stack,
        } = transaction;
        if projection.layer_stack.is_empty() || projection.visible.is_empty() {
            return Err(BackendStatus::BAD_VALUE);
        }

        let previous = {
            let mut displays = self.virtual_displays.lock();
            let vd = displays
                .get_mut(&token)
                .ok_or(BackendStatus::NAME_NOT_FOUND)?;
            vd.projection = Some(projection);
            vd.renderer.take()
        };
        if let Some(renderer) = previous {
            renderer.stop();
        }

        let renderer = Renderer::spawn(token, surface, projection, self.frame_interval)?;
        match self.virtual_displays.lock().get_mut(&token) {
            Some(vd) => {
                debug!(?token, name = %vd.name, layer_stack, "Display surface attached");
                vd.renderer = Some(renderer);
            }
            // Destroyed concurrently
            None => renderer.stop(),
        }

        self.telemetry.record(SimEvent::TransactionApplied(token));
        Ok(())
    }

    fn destroy_display(&self, token: DisplayToken) {
        let Some(vd) = self.virtual_displays.lock().remove(&token) else {
            debug!(?token, "Ignoring destroy of unknown display");
            return;
        };

        if let Some(renderer) = vd.renderer {
            renderer.stop();
        }
        self.telemetry.record(SimEvent::DisplayDestroyed(token));
    }
}

impl Drop for SimulatedCompositor {
    fn drop(&mut self) {
        let displays: Vec<VirtualDisplay> =
            self.virtual_displays.get_mut().drain().map(|(_, vd)| vd).collect();
        for renderer in displays.into_iter().filter_map(|vd| vd.renderer) {
            renderer.stop();
        }
    }
}
