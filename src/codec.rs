//! Value codecs
//!
//! Conversions between abstract integer ranges and the wire encodings used by
//! control surfaces: relative encoder ticks and 14-bit values split over two
//! 7-bit bytes.
//!
//! Each relative scheme is its own type. A decoder holds exactly one
//! [`EncoderCodec`], chosen when the surface is built, so a sign-magnitude byte
//! can never be run through the two's-complement rule by accident.

use serde::{Deserialize, Serialize};

/// Largest 14-bit value
pub const MAX_14BIT: u16 = 0x3FFF;

/// Decode/encode of relative encoder ticks carried in one 7-bit byte
pub trait RelativeCodec {
    /// Raw byte to signed delta (already multiplied by the step)
    fn decode(&self, raw: u8) -> i32;

    /// Signed delta to raw byte; out-of-range deltas are clamped
    fn encode(&self, delta: i32) -> u8;

    /// Largest positive delta this codec can carry in one byte
    fn max_delta(&self) -> i32;

    /// Most negative delta this codec can carry in one byte
    fn min_delta(&self) -> i32;
}

/// Two's-complement ticks wrapping at `2^bits`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwosComplement {
    bits: u8,
    step: i32,
}

impl TwosComplement {
    /// `bits` is clamped to 1..=7, `step` to at least 1
    pub fn new(bits: u8, step: i32) -> Self {
        Self { bits: bits.clamp(1, 7), step: step.max(1) }
    }

    fn modulus(&self) -> i32 {
        1 << self.bits
    }
}

impl RelativeCodec for TwosComplement {
    fn decode(&self, raw: u8) -> i32 {
        let modulus = self.modulus();
        let raw = raw as i32 % modulus;
        let ticks = if raw >= modulus / 2 { raw - modulus } else { raw };
        ticks * self.step
    }

    fn encode(&self, delta: i32) -> u8 {
        let modulus = self.modulus();
        let ticks = (delta / self.step).clamp(-modulus / 2, modulus / 2 - 1);
        ticks.rem_euclid(modulus) as u8
    }

    fn max_delta(&self) -> i32 {
        (self.modulus() / 2 - 1) * self.step
    }

    fn min_delta(&self) -> i32 {
        -(self.modulus() / 2) * self.step
    }
}

/// Bit 6 is the sign (set = negative), bits 0..5 the magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignMagnitude {
    step: i32,
}

impl SignMagnitude {
    const SIGN: u8 = 0x40;
    const MAGNITUDE: u8 = 0x3F;

    pub fn new(step: i32) -> Self {
        Self { step: step.max(1) }
    }
}

impl RelativeCodec for SignMagnitude {
    fn decode(&self, raw: u8) -> i32 {
        let magnitude = (raw & Self::MAGNITUDE) as i32 * self.step;
        if raw & Self::SIGN != 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    fn encode(&self, delta: i32) -> u8 {
        let magnitude = (delta.unsigned_abs() / self.step as u32).min(Self::MAGNITUDE as u32) as u8;
        if delta < 0 && magnitude != 0 {
            Self::SIGN | magnitude
        } else {
            magnitude
        }
    }

    fn max_delta(&self) -> i32 {
        Self::MAGNITUDE as i32 * self.step
    }

    fn min_delta(&self) -> i32 {
        -self.max_delta()
    }
}

/// 64 means "no movement"; ticks are `raw - 64`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetBinary {
    step: i32,
}

impl OffsetBinary {
    const CENTER: i32 = 64;

    pub fn new(step: i32) -> Self {
        Self { step: step.max(1) }
    }
}

impl RelativeCodec for OffsetBinary {
    fn decode(&self, raw: u8) -> i32 {
        ((raw & 0x7F) as i32 - Self::CENTER) * self.step
    }

    fn encode(&self, delta: i32) -> u8 {
        let ticks = (delta / self.step).clamp(-Self::CENTER, Self::CENTER - 1);
        (ticks + Self::CENTER) as u8
    }

    fn max_delta(&self) -> i32 {
        (Self::CENTER - 1) * self.step
    }

    fn min_delta(&self) -> i32 {
        -Self::CENTER * self.step
    }
}

/// The relative scheme a surface's encoders use, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderCodec {
    TwosComplement(TwosComplement),
    SignMagnitude(SignMagnitude),
    OffsetBinary(OffsetBinary),
}

impl RelativeCodec for EncoderCodec {
    fn decode(&self, raw: u8) -> i32 {
        match self {
            EncoderCodec::TwosComplement(c) => c.decode(raw),
            EncoderCodec::SignMagnitude(c) => c.decode(raw),
            EncoderCodec::OffsetBinary(c) => c.decode(raw),
        }
    }

    fn encode(&self, delta: i32) -> u8 {
        match self {
            EncoderCodec::TwosComplement(c) => c.encode(delta),
            EncoderCodec::SignMagnitude(c) => c.encode(delta),
            EncoderCodec::OffsetBinary(c) => c.encode(delta),
        }
    }

    fn max_delta(&self) -> i32 {
        match self {
            EncoderCodec::TwosComplement(c) => c.max_delta(),
            EncoderCodec::SignMagnitude(c) => c.max_delta(),
            EncoderCodec::OffsetBinary(c) => c.max_delta(),
        }
    }

    fn min_delta(&self) -> i32 {
        match self {
            EncoderCodec::TwosComplement(c) => c.min_delta(),
            EncoderCodec::SignMagnitude(c) => c.min_delta(),
            EncoderCodec::OffsetBinary(c) => c.min_delta(),
        }
    }
}

/// Relative encoder wire convention, as named in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderEncoding {
    TwosComplement,
    SignMagnitude,
    OffsetBinary,
}

/// Encoder settings from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EncoderConfig {
    pub encoding: EncoderEncoding,
    #[serde(default = "default_bits")]
    pub bits: u8,
    #[serde(default = "default_step")]
    pub step: i32,
}

impl EncoderConfig {
    pub fn new(encoding: EncoderEncoding) -> Self {
        Self { encoding, bits: default_bits(), step: default_step() }
    }

    /// Build the codec this configuration describes
    pub fn codec(&self) -> EncoderCodec {
        match self.encoding {
            EncoderEncoding::TwosComplement => {
                EncoderCodec::TwosComplement(TwosComplement::new(self.bits, self.step))
            }
            EncoderEncoding::SignMagnitude => EncoderCodec::SignMagnitude(SignMagnitude::new(self.step)),
            EncoderEncoding::OffsetBinary => EncoderCodec::OffsetBinary(OffsetBinary::new(self.step)),
        }
    }
}

fn default_bits() -> u8 { 7 }
fn default_step() -> i32 { 1 }

/// A 14-bit value split into two 7-bit halves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split14 {
    pub high: u8,
    pub low: u8,
}

/// Split a 14-bit value (clamped to 16383) into high and low bytes
pub fn split14(value: i32) -> Split14 {
    let value = value.clamp(0, MAX_14BIT as i32) as u16;
    Split14 { high: (value >> 7) as u8, low: (value & 0x7F) as u8 }
}

/// Join high and low 7-bit bytes into a 14-bit value
pub fn join14(high: u8, low: u8) -> u16 {
    (((high & 0x7F) as u16) << 7) | (low & 0x7F) as u16
}

/// Clamp to an absolute 7-bit value
pub fn clamp7(value: i32) -> u8 {
    value.clamp(0, 0x7F) as u8
}

/// Per-channel memory of the last high byte of a split 14-bit value.
///
/// A high byte alone never produces a value; the value is produced when the
/// low byte arrives. High bytes are never cleared, so a low byte after a
/// long pause still joins with the last high byte seen on that channel.
#[derive(Debug, Clone)]
pub struct HiLoReconstructor {
    highs: Vec<u8>,
}

impl HiLoReconstructor {
    pub fn new(channels: usize) -> Self {
        Self { highs: vec![0; channels] }
    }

    /// Record a high byte; returns false for an unknown channel
    pub fn high(&mut self, channel: usize, byte: u8) -> bool {
        match self.highs.get_mut(channel) {
            Some(slot) => {
                *slot = byte & 0x7F;
                true
            }
            None => false,
        }
    }

    /// Combine a low byte with the channel's last high byte
    pub fn low(&self, channel: usize, byte: u8) -> Option<u16> {
        self.highs.get(channel).map(|&high| join14(high, byte))
    }

    /// Back to the initial all-zero state
    pub fn reset(&mut self) {
        self.highs.iter_mut().for_each(|h| *h = 0);
    }
}
