//! Process-wide capture bootstrap

use std::sync::Arc;

use shared_protocol::DisplayInfo;
use tracing::info;

use crate::backend::Compositor;
use crate::{CaptureController, CaptureResult, probe};

/// Proof that the compositor client's thread pool has been started.
///
/// Capture controllers can only be created through a runtime, so no capture
/// can run before the bootstrap.
#[derive(Clone)]
pub struct CaptureRuntime {
    compositor: Arc<dyn Compositor>,
}

impl CaptureRuntime {
    /// Start the compositor client's thread pool
    pub fn start(compositor: Arc<dyn Compositor>) -> Self {
        compositor.start_thread_pool();
        info!("Capture runtime started");
        Self { compositor }
    }

    pub fn compositor(&self) -> &Arc<dyn Compositor> {
        &self.compositor
    }

    /// Geometry and timing of a built-in display
    pub fn display_info(&self, display_id: i32) -> CaptureResult<DisplayInfo> {
        probe::get_display_info(self.compositor.as_ref(), display_id)
    }

    /// New, unconfigured capture of `display_id`
    pub fn create_capture(&self, display_id: i32) -> CaptureController {
        CaptureController::new(Arc::clone(&self.compositor), display_id)
    }
}
