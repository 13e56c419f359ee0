//! Capture configuration

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared_protocol::{DisplayInfo, Orientation};
use tracing::info;

use crate::{CaptureError, CaptureResult};

/// Real and virtual geometry written as `<rw>x<rh>@<vw>x<vh>/<degrees>`,
/// e.g. `1080x1920@540x960/0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectionSpec {
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub orientation: Orientation,
}

impl ProjectionSpec {
    /// Mirror `info` at its native size and orientation
    pub fn from_display(info: &DisplayInfo) -> Self {
        Self {
            real_width: info.width,
            real_height: info.height,
            virtual_width: info.width,
            virtual_height: info.height,
            orientation: info.orientation,
        }
    }

    pub fn real_info(&self) -> DisplayInfo {
        DisplayInfo::with_geometry(self.real_width, self.real_height, Orientation::Rotation0)
    }

    pub fn desired_info(&self) -> DisplayInfo {
        DisplayInfo::with_geometry(self.virtual_width, self.virtual_height, self.orientation)
    }
}

fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    let w = w.trim().parse().ok()?;
    let h = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

impl FromStr for ProjectionSpec {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CaptureError::InvalidConfig(format!("invalid projection {s:?}"));

        let (real, rest) = s.split_once('@').ok_or_else(invalid)?;
        let (virt, degrees) = rest.split_once('/').ok_or_else(invalid)?;
        let (real_width, real_height) = parse_size(real).ok_or_else(invalid)?;
        let (virtual_width, virtual_height) = parse_size(virt).ok_or_else(invalid)?;
        let orientation = degrees
            .trim()
            .parse()
            .ok()
            .and_then(Orientation::from_degrees)
            .ok_or_else(invalid)?;

        Ok(Self {
            real_width,
            real_height,
            virtual_width,
            virtual_height,
            orientation,
        })
    }
}

impl fmt::Display for ProjectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}x{}/{}",
            self.real_width,
            self.real_height,
            self.virtual_width,
            self.virtual_height,
            self.orientation.degrees()
        )
    }
}

impl TryFrom<String> for ProjectionSpec {
    type Error = CaptureError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProjectionSpec> for String {
    fn from(spec: ProjectionSpec) -> Self {
        spec.to_string()
    }
}

/// Settings for a capture run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Built-in display to mirror
    pub display_id: i32,
    /// Geometry override; the probed display is mirrored 1:1 when unset
    pub projection: Option<ProjectionSpec>,
    /// Frames to capture before stopping
    pub frame_limit: u64,
    /// Per-frame wait bound; unset waits forever
    pub wait_timeout_ms: Option<u64>,
    /// Render rate of the simulated compositor
    pub simulated_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            display_id: 0,
            projection: None,
            frame_limit: 100,
            wait_timeout_ms: None,
            simulated_fps: 60,
        }
    }
}

impl CaptureConfig {
    pub fn from_json(json: &str) -> CaptureResult<Self> {
        serde_json::from_str(json).map_err(|e| CaptureError::InvalidConfig(e.to_string()))
    }

    /// Read a JSON config file
    pub fn load(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::InvalidConfig(format!("unable to read {}: {e}", path.display()))
        })?;

        let config = Self::from_json(&contents)?;
        info!(?path, "Loaded config");
        Ok(config)
    }

    /// Projection to use for a display described by `info`
    pub fn projection_for(&self, info: &DisplayInfo) -> ProjectionSpec {
        self.projection
            .unwrap_or_else(|| ProjectionSpec::from_display(info))
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}
