//! Shared Protocol Definitions for vdcap
//!
//! Portable types describing displays and captured frames. Nothing in this
//! crate depends on a particular compositor backend, so downstream consumers
//! (encoders, streamers) can link it without pulling in the capture pipeline.

mod display;
mod error;
mod format;
mod frame;

pub use display::*;
pub use error::*;
pub use format::*;
pub use frame::*;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;
