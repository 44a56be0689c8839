//! PEQ filter model.

use serde::{Deserialize, Serialize};

use crate::field::{self, ByteOrder};

/// Length of a filter-params payload.
pub const FILTER_PAYLOAD_LEN: usize = 8;

/// Shape of a single PEQ band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FilterType {
    /// Boost/cut around a center frequency
    #[default]
    #[serde(rename = "PK")]
    Peak,
    /// Low shelf with Q
    #[serde(rename = "LSQ")]
    LowShelfQ,
    /// High shelf with Q
    #[serde(rename = "HSQ")]
    HighShelfQ,
}

impl FilterType {
    /// Wire code for this filter type.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Peak => 0,
            Self::LowShelfQ => 1,
            Self::HighShelfQ => 2,
        }
    }

    /// Filter type for a wire code. Unrecognized codes normalize to `Peak`.
    #[must_use]
    pub fn from_wire(code: u8) -> Self {
        match code {
            1 => Self::LowShelfQ,
            2 => Self::HighShelfQ,
            _ => Self::Peak,
        }
    }
}

/// A single PEQ filter as read from or written to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Band index on the device
    pub index: u8,
    /// Filter shape
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    /// Center/corner frequency in Hz
    pub frequency_hz: u16,
    /// Gain in dB (resolution 0.1)
    pub gain_db: f64,
    /// Q factor (resolution 0.01)
    pub q: f64,
}

impl Filter {
    /// Create a new filter.
    #[must_use]
    pub fn new(index: u8, filter_type: FilterType, frequency_hz: u16, gain_db: f64, q: f64) -> Self {
        Self { index, filter_type, frequency_hz, gain_db, q }
    }

    /// Encode as a filter-params payload:
    /// `[index, gain(2), frequency(2), q(2), type]`.
    #[must_use]
    pub fn to_payload(&self, order: ByteOrder) -> [u8; FILTER_PAYLOAD_LEN] {
        let [g0, g1] = order.split(field::encode_gain_db(self.gain_db));
        let [f0, f1] = field::encode_frequency_hz(self.frequency_hz, order);
        let [q0, q1] = order.split(field::encode_q_factor(self.q));
        [self.index, g0, g1, f0, f1, q0, q1, self.filter_type.to_wire()]
    }

    /// Decode a filter-params payload. Returns `None` if the payload is short.
    #[must_use]
    pub fn from_payload(payload: &[u8], order: ByteOrder) -> Option<Self> {
        let bytes: &[u8; FILTER_PAYLOAD_LEN] = payload.get(..FILTER_PAYLOAD_LEN)?.try_into().ok()?;
        Some(Self {
            index: bytes[0],
            gain_db: field::decode_gain_db(order.combine([bytes[1], bytes[2]])),
            frequency_hz: field::decode_frequency_hz([bytes[3], bytes[4]], order),
            q: field::decode_q_factor(order.combine([bytes[5], bytes[6]])),
            filter_type: FilterType::from_wire(bytes[7]),
        })
    }
}
