//! Scalar field transforms.
//!
//! Multi-byte fields carry their byte order with them: different commands in
//! this protocol family place the high byte first or last, so every
//! encode/decode pair takes a [`ByteOrder`] instead of assuming one.

use serde::{Deserialize, Serialize};

/// Fixed-point scale of a filter gain (tenths of a dB).
pub const GAIN_SCALE: u16 = 10;

/// Fixed-point scale of a Q factor (hundredths).
pub const Q_SCALE: u16 = 100;

/// Placement of the two bytes of a 16-bit field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// High byte first
    #[default]
    BigEndian,
    /// Low byte first
    LittleEndian,
}

impl ByteOrder {
    /// Split a 16-bit value into its two wire bytes.
    #[must_use]
    pub fn split(self, value: u16) -> [u8; 2] {
        match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }

    /// Combine two wire bytes into a 16-bit value.
    #[must_use]
    pub fn combine(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::BigEndian => u16::from_be_bytes(bytes),
            Self::LittleEndian => u16::from_le_bytes(bytes),
        }
    }
}

/// Encode a signed fixed-point value as a two's-complement 16-bit word.
#[allow(clippy::cast_possible_truncation)]
fn encode_signed(value: f64, scale: u16) -> u16 {
    let scaled = (value * f64::from(scale)).round().clamp(f64::from(i16::MIN), f64::from(i16::MAX));
    u16::from_be_bytes((scaled as i16).to_be_bytes())
}

/// Decode a two's-complement 16-bit word into a signed fixed-point value.
fn decode_signed(raw: u16, scale: u16) -> f64 {
    // Bit 15 carries the sign
    let signed = if raw & 0x8000 == 0 {
        f64::from(raw)
    } else {
        -f64::from((raw ^ 0xFFFF) + 1)
    };
    signed / f64::from(scale)
}

/// Encode a gain in dB: `round(value * 10)` as two's-complement.
#[must_use]
pub fn encode_gain_db(value: f64) -> u16 {
    encode_signed(value, GAIN_SCALE)
}

/// Decode a two's-complement gain word into dB.
#[must_use]
pub fn decode_gain_db(raw: u16) -> f64 {
    decode_signed(raw, GAIN_SCALE)
}

/// Encode a frequency in Hz. No scaling is applied.
#[must_use]
pub fn encode_frequency_hz(value: u16, order: ByteOrder) -> [u8; 2] {
    order.split(value)
}

/// Decode a frequency in Hz.
#[must_use]
pub fn decode_frequency_hz(bytes: [u8; 2], order: ByteOrder) -> u16 {
    order.combine(bytes)
}

/// Encode a Q factor: `round(value * 100)`, saturating at the u16 range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn encode_q_factor(value: f64) -> u16 {
    (value * f64::from(Q_SCALE)).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Decode a Q factor. A wire value of zero decodes to 1.0, never 0.
#[must_use]
pub fn decode_q_factor(raw: u16) -> f64 {
    if raw == 0 {
        return 1.0;
    }
    f64::from(raw) / f64::from(Q_SCALE)
}

/// Codec for a signed gain field whose scale and byte order belong to the
/// command carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainCodec {
    /// Fixed-point multiplier (10 = tenths of a dB)
    pub scale: u16,
    /// Byte placement on the wire
    pub byte_order: ByteOrder,
}

impl GainCodec {
    /// Tenths of a dB, high byte first.
    pub const TENTHS_BE: Self = Self { scale: GAIN_SCALE, byte_order: ByteOrder::BigEndian };

    /// Encode a gain in dB into its two wire bytes.
    #[must_use]
    pub fn encode(&self, value: f64) -> [u8; 2] {
        self.byte_order.split(encode_signed(value, self.scale.max(1)))
    }

    /// Decode two wire bytes into a gain in dB.
    #[must_use]
    pub fn decode(&self, bytes: [u8; 2]) -> f64 {
        decode_signed(self.byte_order.combine(bytes), self.scale.max(1))
    }
}

impl Default for GainCodec {
    fn default() -> Self {
        Self::TENTHS_BE
    }
}
