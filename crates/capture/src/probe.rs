//! Physical display queries

use shared_protocol::{DisplayInfo, Orientation, diagonal_inches};
use tracing::{debug, error};

use crate::backend::Compositor;
use crate::{CaptureError, CaptureResult};

/// Read geometry and timing of a built-in display.
///
/// No state is kept between calls and failures are not retried.
pub fn get_display_info(compositor: &dyn Compositor, display_id: i32) -> CaptureResult<DisplayInfo> {
    let raw = compositor.builtin_display_info(display_id).map_err(|status| {
        error!(display_id, %status, "Display info query failed");
        if status.is_connection_failure() {
            CaptureError::ServiceUnavailable(status.name().to_string())
        } else {
            CaptureError::DisplayNotFound(display_id)
        }
    })?;

    let info = DisplayInfo {
        width: raw.w,
        height: raw.h,
        orientation: Orientation::from_quarter_turns(raw.orientation % 4)
            .unwrap_or_default(),
        fps: raw.fps,
        density: raw.density,
        xdpi: raw.xdpi,
        ydpi: raw.ydpi,
        secure: raw.secure,
        size: diagonal_inches(raw.w, raw.h, raw.xdpi, raw.ydpi),
    };

    debug!(display_id, ?info, "Queried display");
    Ok(info)
}
