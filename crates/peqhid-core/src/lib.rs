//! peqhid Core - Wire protocol and device model for PEQ-capable HID audio devices.
//!
//! This crate contains the pure, synchronous parts of the protocol: frame
//! encoding/decoding, scalar field transforms, the filter model and the
//! per-model capability registry. It performs no I/O.

pub mod error;
pub mod field;
pub mod filter;
pub mod packet;
pub mod profile;

pub use error::{ProtocolError, ProtocolResult};
pub use field::{ByteOrder, GainCodec};
pub use filter::{Filter, FilterType};
pub use packet::{CommandId, Direction, Frame};
pub use profile::{DeviceProfile, DeviceRegistry, SlotInfo};
