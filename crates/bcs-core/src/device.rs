//! Device-layer contracts. The server does not drive hardware; it only needs
//! enough of a surface to ask devices to stop during an abort and to probe
//! busyness ahead of one.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("device '{device}': {message}")]
pub struct DeviceError {
    pub device: String,
    pub message: String,
}

impl DeviceError {
    pub fn new(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            message: message.into(),
        }
    }
}

/// Anything that can be told to halt whatever it is doing.
pub trait Stoppable: Send + Sync {
    fn name(&self) -> &str;

    fn stop(&self) -> Result<(), DeviceError>;
}

/// Moving axes. Stopped first, and concurrently, during an all-stop.
pub trait Motor: Stoppable {}

/// Scannable positioners surfaced in the interpreter namespace.
pub trait Scannable: Stoppable {
    fn is_busy(&self) -> Result<bool, DeviceError>;
}

/// Detectors add a richer status word on top of the scannable surface.
pub trait Detector: Scannable {
    fn status(&self) -> Result<DetectorStatus, DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorStatus {
    Idle,
    Busy,
    Paused,
    Standby,
    Fault,
    Monitoring,
}

impl DetectorStatus {
    /// Whether an acquisition is in flight (counts as busy for pre-abort
    /// device stops).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Busy | Self::Paused | Self::Monitoring)
    }
}
