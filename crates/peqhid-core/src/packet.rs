//! Report framing.
//!
//! Every report has the layout
//!
//! ```text
//! 0      header byte 1 (0xAA set / 0xBB get)
//! 1      header byte 2 (0x0A set / 0x0B get)
//! 2-3    reserved, zero
//! 4      command id
//! 5      payload length
//! 6..    payload
//! +0     pad, zero
//! +1     end marker (0xEE)
//! ```
//!
//! Inbound reports may be padded to the HID report size; anything after the
//! end marker is ignored.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Header pair of a "set" frame.
pub const SET_HEADER: [u8; 2] = [0xAA, 0x0A];
/// Header pair of a "get" frame.
pub const GET_HEADER: [u8; 2] = [0xBB, 0x0B];
/// Frame terminator.
pub const END_MARKER: u8 = 0xEE;

/// Offset of the command id byte.
const COMMAND_OFFSET: usize = 4;
/// Offset of the payload length byte.
const LENGTH_OFFSET: usize = 5;
/// Offset of the first payload byte.
const PAYLOAD_OFFSET: usize = 6;
/// Bytes a frame carries besides its payload.
pub const FRAME_OVERHEAD: usize = PAYLOAD_OFFSET + 2;

/// Direction of a frame, selected by its header pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Write a value to the device
    Set,
    /// Read a value from the device (also used by device replies)
    Get,
}

impl Direction {
    /// Header pair for this direction.
    #[must_use]
    pub fn header(self) -> [u8; 2] {
        match self {
            Self::Set => SET_HEADER,
            Self::Get => GET_HEADER,
        }
    }

    fn from_header(header: [u8; 2]) -> Option<Self> {
        match header {
            SET_HEADER => Some(Self::Set),
            GET_HEADER => Some(Self::Get),
            _ => None,
        }
    }
}

/// Known command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandId {
    /// Firmware version query (uses a different header family, not handled here)
    FirmwareVersion = 11,
    /// Parameters of a single filter
    FilterParams = 21,
    /// Active preset slot
    PresetSwitch = 22,
    /// Global (preamp) gain
    GlobalGain = 23,
    /// Number of active filters
    FilterCount = 24,
    /// Persist the current filters into a slot
    SaveToDevice = 25,
    /// Reset the current preset
    ResetDevice = 27,
    /// Reset all presets
    ResetAll = 28,
    /// Device name (uses a different header family, not handled here)
    NameDevice = 48,
}

impl CommandId {
    /// Wire value of this command.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Command for a wire value, if known.
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            11 => Some(Self::FirmwareVersion),
            21 => Some(Self::FilterParams),
            22 => Some(Self::PresetSwitch),
            23 => Some(Self::GlobalGain),
            24 => Some(Self::FilterCount),
            25 => Some(Self::SaveToDevice),
            27 => Some(Self::ResetDevice),
            28 => Some(Self::ResetAll),
            48 => Some(Self::NameDevice),
            _ => None,
        }
    }
}

/// A decoded frame.
///
/// The command id is kept raw: unknown ids are not a decode error, they are
/// reported upward for the caller to ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame direction
    pub direction: Direction,
    /// Raw command id byte
    pub command_id: u8,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// The command, if the id is known.
    #[must_use]
    pub fn command(&self) -> Option<CommandId> {
        CommandId::from_wire(self.command_id)
    }
}

fn encode(direction: Direction, command: CommandId, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    let len = u8::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&direction.header());
    frame.extend_from_slice(&[0, 0, command.to_wire(), len]);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&[0, END_MARKER]);
    Ok(frame)
}

/// Build a "set" frame.
///
/// # Errors
/// Returns `PayloadTooLarge` if the payload does not fit the length byte.
pub fn encode_set(command: CommandId, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    encode(Direction::Set, command, payload)
}

/// Build a "get" frame.
///
/// # Errors
/// Returns `PayloadTooLarge` if the payload does not fit the length byte.
pub fn encode_get(command: CommandId, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    encode(Direction::Get, command, payload)
}

/// Decode an inbound report. Fails closed on any framing violation.
///
/// # Errors
/// - `BadHeader` if the first two bytes are not a known header pair
/// - `Truncated` if the declared payload exceeds the available bytes
/// - `MissingEndMarker` if the terminator is wrong
pub fn decode(bytes: &[u8]) -> ProtocolResult<Frame> {
    let Some(header) = bytes.first_chunk::<2>() else {
        return Err(ProtocolError::Truncated { declared: FRAME_OVERHEAD, available: bytes.len() });
    };
    let direction = Direction::from_header(*header).ok_or(ProtocolError::BadHeader)?;

    let Some(&declared) = bytes.get(LENGTH_OFFSET) else {
        return Err(ProtocolError::Truncated { declared: FRAME_OVERHEAD, available: bytes.len() });
    };
    let declared = usize::from(declared);
    let frame_len = declared + FRAME_OVERHEAD;
    if frame_len > bytes.len() {
        return Err(ProtocolError::Truncated { declared: frame_len, available: bytes.len() });
    }

    let found = bytes[frame_len - 1];
    if found != END_MARKER {
        return Err(ProtocolError::MissingEndMarker { found });
    }

    Ok(Frame {
        direction,
        command_id: bytes[COMMAND_OFFSET],
        payload: bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + declared].to_vec(),
    })
}
