//! Virtual-display frame capture
//!
//! Mirrors a built-in display into an application-owned buffer queue through
//! a virtual display, and hands the queued frames out with zero copies:
//! - [`CaptureRuntime`]: compositor bootstrap and capture factory
//! - [`CaptureController`]: configuration and the wait/consume cycle
//! - [`backend`]: the compositor seam, implemented in process by [`sim`]

pub mod backend;
pub mod format;
pub mod probe;
pub mod projection;
pub mod sim;

mod config;
mod consumer;
mod controller;
mod error;
mod frame;
mod runtime;
mod vdisplay;
mod waiter;

pub use config::*;
pub use consumer::*;
pub use controller::*;
pub use error::*;
pub use frame::*;
pub use runtime::*;
pub use vdisplay::*;
pub use waiter::*;

pub use shared_protocol::{DisplayInfo, FrameHeader, Orientation, PixelFormat};
