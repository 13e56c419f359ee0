//! Capture session state machine

use std::sync::Arc;
use std::time::Duration;

use shared_protocol::DisplayInfo;
use tracing::{debug, info, warn};

use crate::backend::Compositor;
use crate::{
    CaptureError, CaptureResult, Frame, FrameAvailabilityWaiter, VirtualDisplayManager,
    VirtualDisplayParams,
};

/// Lifecycle state of a [`CaptureController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// Nothing configured yet
    #[default]
    Idle,
    /// Geometry set but no virtual display running
    Configured,
    /// Display running, no frame signalled
    AwaitingFrame,
    /// A frame was signalled and can be consumed
    FrameReady,
    /// Resources released; terminal
    Released,
}

impl CaptureState {
    /// Whether a virtual display backs this state
    pub fn is_running(self) -> bool {
        matches!(self, Self::AwaitingFrame | Self::FrameReady)
    }
}

/// How frames are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMethod {
    VirtualDisplay,
}

/// Capture statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames handed out by `consume_pending_frame`
    pub frames_consumed: u64,
    /// Failed buffer locks
    pub lock_failures: u64,
    /// Successful `apply_config_changes` calls
    pub reconfigurations: u64,
}

/// Captures frames of one physical display through a virtual display.
///
/// Driven from a single thread: every operation that can invalidate a
/// [`Frame`] takes `&mut self`, so a frame can never outlive the buffer it
/// borrows.
pub struct CaptureController {
    display_id: i32,
    desired: Option<DisplayInfo>,
    real: Option<DisplayInfo>,
    display: VirtualDisplayManager,
    frame_pending: bool,
    state: CaptureState,
    stats: CaptureStats,
}

impl CaptureController {
    pub fn new(compositor: Arc<dyn Compositor>, display_id: i32) -> Self {
        debug!(display_id, "Capture controller created");
        Self {
            display_id,
            desired: None,
            real: None,
            display: VirtualDisplayManager::new(compositor),
            frame_pending: false,
            state: CaptureState::Idle,
            stats: CaptureStats::default(),
        }
    }

    pub fn capture_method(&self) -> CaptureMethod {
        CaptureMethod::VirtualDisplay
    }

    pub fn display_id(&self) -> i32 {
        self.display_id
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    pub fn is_display_running(&self) -> bool {
        self.display.is_running()
    }

    pub fn is_buffer_held(&self) -> bool {
        self.display
            .consumer()
            .is_some_and(|consumer| consumer.is_holding())
    }

    /// Whether a signalled frame has not been consumed yet
    pub fn has_pending_frame(&self) -> bool {
        self.frame_pending
    }

    /// Output geometry and orientation of the virtual display.
    ///
    /// Takes effect on the next [`Self::apply_config_changes`].
    pub fn set_desired_info(&mut self, info: &DisplayInfo) -> CaptureResult<()> {
        self.ensure_not_released("set_desired_info")?;
        self.desired = Some(*info);
        self.mark_configured();
        Ok(())
    }

    /// Geometry of the physical display being mirrored.
    ///
    /// Takes effect on the next [`Self::apply_config_changes`].
    pub fn set_real_info(&mut self, info: &DisplayInfo) -> CaptureResult<()> {
        self.ensure_not_released("set_real_info")?;
        self.real = Some(*info);
        self.mark_configured();
        Ok(())
    }

    /// Replace the running virtual display with one built from the current
    /// geometry.
    ///
    /// Valid in every state but `Released`. On failure nothing is left
    /// running and the controller is in `Configured`, including when it was
    /// `Idle` and the missing geometry fails validation.
    pub fn apply_config_changes(&mut self) -> CaptureResult<()> {
        if self.state == CaptureState::Released {
            return Err(self.invalid("apply_config_changes"));
        }

        let params = self.params();
        self.frame_pending = false;

        match self.display.reconfigure(params) {
            Ok(()) => {
                self.stats.reconfigurations += 1;
                self.state = CaptureState::AwaitingFrame;
                info!(
                    display_id = self.display_id,
                    width = params.desired_width,
                    height = params.desired_height,
                    "Capture configured"
                );
                Ok(())
            }
            Err(e) => {
                warn!(display_id = self.display_id, error = %e, "Unable to apply capture configuration");
                self.state = CaptureState::Configured;
                Err(e)
            }
        }
    }

    /// Return the previously consumed buffer and block until the next frame
    /// is available.
    ///
    /// Returns immediately if a signalled frame has not been consumed yet.
    pub fn wait_for_frame(&mut self) -> CaptureResult<()> {
        if let Some(waiter) = self.prepare_wait("wait_for_frame")? {
            waiter.wait_for_frame();
            self.frame_signalled();
        }
        Ok(())
    }

    /// Like [`Self::wait_for_frame`] with an upper bound on the wait.
    ///
    /// Returns `Ok(false)` on timeout; the controller keeps waiting for a
    /// frame in that case.
    pub fn wait_for_frame_timeout(&mut self, timeout: Duration) -> CaptureResult<bool> {
        let Some(waiter) = self.prepare_wait("wait_for_frame_timeout")? else {
            return Ok(true);
        };

        if !waiter.wait_for_frame_timeout(timeout) {
            debug!(?timeout, "No frame within timeout");
            return Ok(false);
        }
        self.frame_signalled();
        Ok(true)
    }

    /// Lock the signalled frame and expose its pixels.
    ///
    /// A failed lock keeps the frame pending, so the call can be retried.
    pub fn consume_pending_frame(&mut self) -> CaptureResult<Frame<'_>> {
        if self.state != CaptureState::FrameReady {
            return Err(self.invalid("consume_pending_frame"));
        }

        let locked = self
            .display
            .consumer_mut()
            .map(|consumer| consumer.lock_next().map(|_| ()));
        match locked {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.stats.lock_failures += 1;
                return Err(e);
            }
            None => return Err(self.invalid("consume_pending_frame")),
        }

        self.frame_pending = false;
        self.state = CaptureState::AwaitingFrame;
        self.stats.frames_consumed += 1;

        let state = self.state;
        self.display
            .consumer()
            .and_then(|consumer| consumer.frame())
            .ok_or(CaptureError::InvalidState {
                operation: "consume_pending_frame",
                state,
            })
    }

    /// Tear down the virtual display and forget the configuration.
    ///
    /// Safe to call any number of times; the controller cannot be reused.
    pub fn release(&mut self) {
        if self.state == CaptureState::Released {
            return;
        }

        self.display.destroy();
        self.desired = None;
        self.real = None;
        self.frame_pending = false;
        self.state = CaptureState::Released;
        info!(display_id = self.display_id, stats = ?self.stats, "Capture released");
    }

    fn prepare_wait(
        &mut self,
        operation: &'static str,
    ) -> CaptureResult<Option<Arc<FrameAvailabilityWaiter>>> {
        if !self.state.is_running() {
            return Err(self.invalid(operation));
        }
        if self.frame_pending {
            return Ok(None);
        }

        if let Some(consumer) = self.display.consumer_mut() {
            consumer.unlock();
        }
        self.state = CaptureState::AwaitingFrame;

        match self.display.waiter() {
            Some(waiter) => Ok(Some(Arc::clone(waiter))),
            None => Err(self.invalid(operation)),
        }
    }

    fn frame_signalled(&mut self) {
        self.frame_pending = true;
        self.state = CaptureState::FrameReady;
    }

    fn params(&self) -> VirtualDisplayParams {
        let desired = self.desired.unwrap_or_default();
        let real = self.real.unwrap_or_default();
        VirtualDisplayParams {
            desired_width: desired.width,
            desired_height: desired.height,
            orientation: desired.orientation,
            real_width: real.width,
            real_height: real.height,
        }
    }

    fn mark_configured(&mut self) {
        if self.state == CaptureState::Idle {
            self.state = CaptureState::Configured;
        }
    }

    fn ensure_not_released(&self, operation: &'static str) -> CaptureResult<()> {
        if self.state == CaptureState::Released {
            return Err(self.invalid(operation));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> CaptureError {
        CaptureError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendStatus;
    use crate::sim::{FailPoint, SimEvent, SimulatedCompositor};
    use crate::{CreationStep, probe};
    use shared_protocol::{Orientation, PixelFormat};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn compositor() -> Arc<SimulatedCompositor> {
        Arc::new(
            SimulatedCompositor::builder()
                .frame_interval(Duration::from_millis(2))
                .build(),
        )
    }

    fn configured(compositor: &Arc<SimulatedCompositor>, width: u32, height: u32) -> CaptureController {
        let real = probe::get_display_info(compositor.as_ref(), 0).unwrap();
        let desired = DisplayInfo::with_geometry(width, height, Orientation::Rotation0);

        let mut controller = CaptureController::new(compositor.clone(), 0);
        controller.set_real_info(&real).unwrap();
        controller.set_desired_info(&desired).unwrap();
        controller
    }

    #[test]
    fn test_end_to_end_scaled_capture() {
        let compositor = compositor();
        let mut controller = configured(&compositor, 540, 960);
        controller.apply_config_changes().unwrap();

        assert!(controller.wait_for_frame_timeout(TIMEOUT).unwrap());
        let frame = controller.consume_pending_frame().unwrap();

        assert_eq!((frame.width, frame.height), (540, 960));
        assert_eq!(frame.format, PixelFormat::Rgba8888);
        assert_eq!(frame.bytes_per_pixel, 4);
        assert!(frame.stride >= frame.width);
        assert_eq!(frame.stride, 544);
        assert_eq!(frame.size, frame.stride * frame.height * 4);
        assert_eq!(frame.data.len(), frame.size as usize);
        assert_eq!(frame.rows().count(), 960);

        controller.release();
        assert_eq!(compositor.live_displays(), 0);
        assert_eq!(compositor.live_queues(), 0);
    }

    #[test]
    fn test_pending_flag_transitions() {
        let compositor = compositor();
        let mut controller = configured(&compositor, 64, 64);
        assert_eq!(controller.state(), CaptureState::Configured);
        assert!(!controller.has_pending_frame());

        controller.apply_config_changes().unwrap();
        assert_eq!(controller.state(), CaptureState::AwaitingFrame);
        assert!(!controller.has_pending_frame());

        for _ in 0..3 {
            assert!(controller.wait_for_frame_timeout(TIMEOUT).unwrap());
            assert!(controller.has_pending_frame());
            assert_eq!(controller.state(), CaptureState::FrameReady);

            controller.consume_pending_frame().unwrap();
            assert!(!controller.has_pending_frame());
            assert!(controller.is_buffer_held());
        }

        // Waiting returns the held buffer before blocking
        controller.wait_for_frame().unwrap();
        assert!(!controller.is_buffer_held());
        assert_eq!(controller.stats().frames_consumed, 3);
    }

    #[test]
    fn test_wait_with_unconsumed_frame_returns_immediately() {
        let compositor = compositor();
        let mut controller = configured(&compositor, 32, 32);
        controller.apply_config_changes().unwrap();

        controller.wait_for_frame().unwrap();
        controller.wait_for_frame().unwrap();
        assert!(controller.has_pending_frame());
        controller.consume_pending_frame().unwrap();
    }

    #[test]
    fn test_release_is_idempotent() {
        let compositor = compositor();
        let mut controller = configured(&compositor, 64, 64);
        controller.apply_config_changes().unwrap();
        controller.wait_for_frame_timeout(TIMEOUT).unwrap();
        controller.consume_pending_frame().unwrap();

        controller.release();
        controller.release();

        assert_eq!(controller.state(), CaptureState::Released);
        assert!(!controller.is_display_running());
        assert!(!controller.has_pending_frame());
        assert_eq!(compositor.live_displays(), 0);
        assert_eq!(compositor.live_queues(), 0);

        let destroyed = compositor
            .events()
            .into_iter()
            .filter(|event| matches!(event, SimEvent::DisplayDestroyed(_)))
            .count();
        assert_eq!(destroyed, 1);

        assert!(matches!(
            controller.wait_for_frame(),
            Err(CaptureError::InvalidState {
                state: CaptureState::Released,
                ..
            })
        ));
        assert!(matches!(
            controller.wait_for_frame_timeout(Duration::from_millis(10)),
            Err(CaptureError::InvalidState {
                state: CaptureState::Released,
                ..
            })
        ));
        assert!(matches!(
            controller.consume_pending_frame(),
            Err(CaptureError::InvalidState {
                state: CaptureState::Released,
                ..
            })
        ));
    }

    #[test]
    fn test_release_without_apply() {
        let compositor = compositor();
        let mut controller = CaptureController::new(compositor.clone(), 0);
        controller.release();
        controller.release();
        assert!(compositor.events().is_empty());
    }

    #[test]
    fn test_reconfiguration_tears_down_first() {
        let compositor = compositor();
        let mut controller = configured(&compositor, 64, 64);
        controller.apply_config_changes().unwrap();
        controller.wait_for_frame_timeout(TIMEOUT).unwrap();
        controller.consume_pending_frame().unwrap();

        let rotated = DisplayInfo::with_geometry(64, 32, Orientation::Rotation90);
        controller.set_desired_info(&rotated).unwrap();
        controller.apply_config_changes().unwrap();

        let events = compositor.events();
        let created: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, event)| matches!(event, SimEvent::DisplayCreated(_)))
            .map(|(i, _)| i)
            .collect();
        let destroyed = events
            .iter()
            .position(|event| matches!(event, SimEvent::DisplayDestroyed(_)))
            .unwrap();
        let released = events
            .iter()
            .position(|event| matches!(event, SimEvent::QueueReleased(_)))
            .unwrap();

        assert_eq!(created.len(), 2);
        assert!(created[0] < destroyed);
        assert!(destroyed < released);
        assert!(released < created[1]);

        assert_eq!(compositor.live_displays(), 1);
        assert_eq!(compositor.live_queues(), 1);
        assert!(!controller.is_buffer_held());
        assert_eq!(controller.stats().reconfigurations, 2);

        assert!(controller.wait_for_frame_timeout(TIMEOUT).unwrap());
        let frame = controller.consume_pending_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
    }

    #[test]
    fn test_failed_apply_rolls_back_and_retries() {
        let compositor = compositor();
        let mut controller = configured(&compositor, 64, 64);
        compositor.fail_next(FailPoint::CreateDisplay, BackendStatus::NO_MEMORY);

        assert!(matches!(
            controller.apply_config_changes(),
            Err(CaptureError::CreationFailed {
                step: CreationStep::CreateDisplay,
                status: "NO_MEMORY"
            })
        ));
        assert_eq!(controller.state(), CaptureState::Configured);
        assert!(!controller.is_display_running());
        assert_eq!(compositor.live_queues(), 0);

        controller.apply_config_changes().unwrap();
        assert_eq!(controller.state(), CaptureState::AwaitingFrame);
        assert_eq!(compositor.live_displays(), 1);
    }

    #[test]
    fn test_lock_failure_keeps_frame_pending() {
        let compositor = compositor();
        let mut controller = configured(&compositor, 64, 64);
        controller.apply_config_changes().unwrap();
        assert!(controller.wait_for_frame_timeout(TIMEOUT).unwrap());

        compositor.fail_next(FailPoint::LockBuffer, BackendStatus::TIMED_OUT);
        assert!(matches!(
            controller.consume_pending_frame(),
            Err(CaptureError::LockFailed("TIMED_OUT"))
        ));
        assert!(controller.has_pending_frame());
        assert_eq!(controller.state(), CaptureState::FrameReady);
        assert_eq!(controller.stats().lock_failures, 1);

        controller.consume_pending_frame().unwrap();
        assert!(!controller.has_pending_frame());
    }

    #[test]
    fn test_rotated_capture() {
        let compositor = compositor();
        let real = probe::get_display_info(compositor.as_ref(), 0).unwrap();
        let desired = DisplayInfo::with_geometry(192, 108, Orientation::Rotation90);

        let mut controller = CaptureController::new(compositor.clone(), 0);
        controller.set_real_info(&real).unwrap();
        controller.set_desired_info(&desired).unwrap();
        controller.apply_config_changes().unwrap();

        assert!(controller.wait_for_frame_timeout(TIMEOUT).unwrap());
        let frame = controller.consume_pending_frame().unwrap();
        assert_eq!((frame.width, frame.height), (192, 108));
        assert!(frame.rows().all(|row| row.len() == 192 * 4));
    }

    #[test]
    fn test_invalid_state_operations() {
        let compositor = compositor();
        let mut controller = CaptureController::new(compositor.clone(), 3);
        assert_eq!(controller.display_id(), 3);
        assert_eq!(controller.capture_method(), CaptureMethod::VirtualDisplay);

        assert!(matches!(
            controller.apply_config_changes(),
            Err(CaptureError::CreationFailed {
                step: CreationStep::ValidateGeometry,
                status: "BAD_VALUE"
            })
        ));
        assert_eq!(controller.state(), CaptureState::Configured);
        assert!(compositor.events().is_empty());
        assert!(matches!(
            controller.wait_for_frame(),
            Err(CaptureError::InvalidState { .. })
        ));
        assert!(matches!(
            controller.consume_pending_frame(),
            Err(CaptureError::InvalidState { .. })
        ));

        controller.release();
        let info = DisplayInfo::with_geometry(8, 8, Orientation::Rotation0);
        assert!(controller.set_desired_info(&info).is_err());
        assert!(matches!(
            controller.apply_config_changes(),
            Err(CaptureError::InvalidState {
                state: CaptureState::Released,
                ..
            })
        ));
    }

    #[test]
    fn test_consume_twice_is_rejected() {
        let compositor = compositor();
        let mut controller = configured(&compositor, 16, 16);
        controller.apply_config_changes().unwrap();
        controller.wait_for_frame_timeout(TIMEOUT).unwrap();
        controller.consume_pending_frame().unwrap();

        assert!(matches!(
            controller.consume_pending_frame(),
            Err(CaptureError::InvalidState {
                state: CaptureState::AwaitingFrame,
                ..
            })
        ));
    }

    #[test]
    fn test_drop_releases_resources() {
        let compositor = compositor();
        {
            let mut controller = configured(&compositor, 64, 64);
            controller.apply_config_changes().unwrap();
            controller.wait_for_frame_timeout(TIMEOUT).unwrap();
            controller.consume_pending_frame().unwrap();
        }
        assert_eq!(compositor.live_displays(), 0);
        assert_eq!(compositor.live_queues(), 0);
    }

    #[test]
    fn test_controller_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureController>();
    }
}
