//! Error types for the PEQ wire protocol.

use thiserror::Error;

/// Frame-level protocol error.
///
/// A report that fails to decode is dropped by the caller; it never
/// reaches an accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown frame header")]
    BadHeader,

    #[error("Truncated frame: {declared} bytes declared, {available} available")]
    Truncated { declared: usize, available: usize },

    #[error("Missing end marker (found {found:#04x})")]
    MissingEndMarker { found: u8 },

    #[error("Payload too large: {0} bytes (max 255)")]
    PayloadTooLarge(usize),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
