//! Capture error types

use std::fmt;

use thiserror::Error;

use crate::CaptureState;

/// Stage of virtual display setup that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStep {
    ValidateGeometry,
    CreateBufferQueue,
    ConfigureBufferQueue,
    CreateCpuConsumer,
    CreateDisplay,
    PublishDisplay,
}

impl fmt::Display for CreationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValidateGeometry => "geometry validation",
            Self::CreateBufferQueue => "buffer queue creation",
            Self::ConfigureBufferQueue => "buffer queue configuration",
            Self::CreateCpuConsumer => "CPU consumer creation",
            Self::CreateDisplay => "virtual display creation",
            Self::PublishDisplay => "display publication",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Compositor service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Display not found: {0}")]
    DisplayNotFound(i32),

    #[error("Virtual display setup failed during {step}: {status}")]
    CreationFailed {
        step: CreationStep,
        status: &'static str,
    },

    #[error("Unable to lock next buffer: {0}")]
    LockFailed(&'static str),

    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
