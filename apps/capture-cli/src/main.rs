//! vdcap capture CLI
//!
//! Mirrors a display of the simulated compositor for a fixed number of frames
//! and reports throughput.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use capture::sim::SimulatedCompositor;
use capture::{CaptureConfig, CaptureController, CaptureError, CaptureRuntime, ProjectionSpec};
use clap::Parser;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "capture-cli",
    about = "Capture frames of a display through a virtual display",
    version
)]
struct Cli {
    /// JSON capture config; defaults are used when omitted.
    config: Option<PathBuf>,

    /// Built-in display to mirror.
    #[arg(long)]
    display_id: Option<i32>,

    /// Number of frames to capture.
    #[arg(long)]
    frames: Option<u64>,

    /// Render rate of the simulated compositor.
    #[arg(long)]
    fps: Option<u32>,

    /// Geometry as <rw>x<rh>@<vw>x<vh>/<degrees>, e.g. 1080x1920@540x960/0.
    #[arg(long)]
    projection: Option<ProjectionSpec>,

    /// Give up waiting for a frame after this many milliseconds.
    #[arg(long)]
    wait_timeout_ms: Option<u64>,
}

impl Cli {
    /// Load the config file, if any, and apply command line overrides
    fn config(&self) -> anyhow::Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                info!("No config given, using defaults");
                CaptureConfig::default()
            }
        };

        if let Some(display_id) = self.display_id {
            config.display_id = display_id;
        }
        if let Some(frames) = self.frames {
            config.frame_limit = frames;
        }
        if let Some(fps) = self.fps {
            config.simulated_fps = fps;
        }
        if let Some(projection) = self.projection {
            config.projection = Some(projection);
        }
        if let Some(timeout) = self.wait_timeout_ms {
            config.wait_timeout_ms = Some(timeout);
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("capture=debug".parse()?)
                .add_directive("capture_cli=info".parse()?),
        )
        .init();

    let config = cli.config()?;

    let compositor = SimulatedCompositor::builder()
        .frame_rate(config.simulated_fps)
        .build();
    let runtime = CaptureRuntime::start(Arc::new(compositor));

    let info = runtime
        .display_info(config.display_id)
        .context("probing display")?;
    info!(
        display_id = config.display_id,
        width = info.width,
        height = info.height,
        fps = info.fps,
        size_inches = info.size,
        "Found display"
    );

    let projection = config.projection_for(&info);
    info!(%projection, "Starting capture");

    let mut capture = runtime.create_capture(config.display_id);
    capture.set_real_info(&projection.real_info())?;
    capture.set_desired_info(&projection.desired_info())?;
    capture
        .apply_config_changes()
        .context("creating virtual display")?;

    let result = run(&mut capture, &config);
    capture.release();
    result
}

fn run(capture: &mut CaptureController, config: &CaptureConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut bytes: u64 = 0;
    let mut timeouts: u64 = 0;
    let mut consumed: u64 = 0;

    while consumed < config.frame_limit {
        match config.wait_timeout() {
            Some(timeout) => {
                if !capture.wait_for_frame_timeout(timeout)? {
                    timeouts += 1;
                    warn!(?timeout, "Timed out waiting for frame");
                    continue;
                }
            }
            None => capture.wait_for_frame()?,
        }

        let frame = match capture.consume_pending_frame() {
            Ok(frame) => frame,
            Err(CaptureError::LockFailed(status)) => {
                warn!(status, "Lock failed, retrying");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        consumed += 1;
        if consumed == 1 {
            let header = frame.header().to_bytes()?;
            info!(header_bytes = header.len(), "First frame: {}", frame);
        }
        debug!("{}", frame);
        bytes += frame.size as u64;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let stats = capture.stats();
    info!(
        frames = stats.frames_consumed,
        lock_failures = stats.lock_failures,
        timeouts,
        fps = %format!("{:.1}", stats.frames_consumed as f64 / elapsed.max(f64::EPSILON)),
        mb_per_sec = %format!("{:.1}", bytes as f64 / 1_000_000.0 / elapsed.max(f64::EPSILON)),
        "Capture finished"
    );
    Ok(())
}
