//! HID error types.

use peqhid_core::ProtocolError;
use thiserror::Error;

/// HID error type.
#[derive(Debug, Error)]
pub enum HidError {
    #[error("Device not found")]
    DeviceNotFound,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result type for HID operations.
pub type HidResult<T> = Result<T, HidError>;
