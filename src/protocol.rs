//! Protocol families
//!
//! A protocol family is a pair of strategies: a [`ProtocolFramer`] that turns
//! output writes into wire packets and an [`InputDecoder`] that turns inbound
//! messages into [`InputEvent`]s. Families are composed at construction with
//! [`build`]; the surface engine never looks at protocol bytes itself.

pub mod hui;
pub mod mcu;
pub mod pad;
pub mod segment;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::codec::{EncoderConfig, EncoderEncoding};
use crate::midi::{format_hex, MidiMessage};
use crate::surface::{InputEvent, OutputAddress, OutputKind, WireState};

/// One outbound wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Short channel message (CC, note, pitch bend)
    Value(Vec<u8>),
    /// Complete SysEx frame including F0 and F7
    Framed(Vec<u8>),
}

impl Packet {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Packet::Value(b) | Packet::Framed(b) => b,
        }
    }

    pub(crate) fn cc(cc: u8, value: u8) -> Self {
        Packet::Value(vec![0xB0, cc & 0x7F, value & 0x7F])
    }

    pub(crate) fn note(channel: u8, note: u8, velocity: u8) -> Self {
        Packet::Value(vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F])
    }

    /// Build a SysEx frame: F0, header, body, F7
    pub(crate) fn sysex(header: &[u8], body: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(header.len() + body.len() + 2);
        bytes.push(0xF0);
        bytes.extend_from_slice(header);
        bytes.extend(body.iter().map(|b| b & 0x7F));
        bytes.push(0xF7);
        Packet::Framed(bytes)
    }
}

/// How blinking reaches the device for a kind of output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkStrategy {
    /// The blink scheduler alternates values
    Timer,
    /// The wire message itself carries the blink
    Wire,
}

/// How a text cell can be addressed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAddressing {
    /// Any contiguous run of cells can be written in one message
    Span,
    /// Each cell is written on its own
    Cell,
    /// Only whole blocks can be written
    Block { start: u16, len: u16 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("no wire mapping for {0}")]
    Unmapped(OutputAddress),
    #[error("no text mapping for cell {0}")]
    UnmappedText(u16),
    #[error("text write at cell {cell} ({len} cells) is not block aligned")]
    UnalignedText { cell: u16, len: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("button message {} without a preceding zone select", format_hex(.raw))]
    NoZone { raw: Vec<u8> },
    #[error("no button mapped at zone {zone} port {port}")]
    UnmappedButton { zone: u8, port: u8 },
    #[error("unrecognized message {}", format_hex(.raw))]
    Unrecognized { raw: Vec<u8> },
    #[error("malformed SysEx ({} bytes): {}", .raw.len(), format_hex(.raw))]
    MalformedSysEx { raw: Vec<u8> },
    #[error("unparseable bytes {}", format_hex(.raw))]
    Unparseable { raw: Vec<u8> },
}

impl DecodeError {
    pub(crate) fn unrecognized(message: &MidiMessage) -> Self {
        DecodeError::Unrecognized { raw: message.encode() }
    }
}

/// Device-initiated replies recognized by byte pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceReply {
    /// Keepalive answer
    Ping,
    /// Mackie host-connection challenge
    HostConnectionQuery { serial: Vec<u8>, challenge: [u8; 4] },
    ConnectionConfirmed { serial: Vec<u8> },
    /// Firmware version string
    Version(String),
    /// Universal identity reply
    Identity { manufacturer: Vec<u8>, family: u16, model: u16, version: Vec<u8> },
}

/// What one inbound message amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// State update only (zone select, fader high byte) or ignorable reply
    Nothing,
    Event(InputEvent),
    Reply(DeviceReply),
}

/// Outbound half of a protocol family
pub trait ProtocolFramer {
    fn family(&self) -> ProtocolFamily;

    /// Whether the address exists on this surface
    fn supports(&self, address: &OutputAddress) -> bool;

    fn blink_strategy(&self, _kind: OutputKind) -> BlinkStrategy {
        BlinkStrategy::Timer
    }

    /// Packets for one non-text output, in wire order
    fn encode_output(&self, address: &OutputAddress, wire: &WireState) -> Result<Vec<Packet>, FrameError>;

    /// `None` if the cell does not exist
    fn text_addressing(&self, cell: u16) -> Option<TextAddressing>;

    /// Wire glyph for a character shown in `cell`; unsupported characters map to the blank glyph
    fn glyph(&self, cell: u16, ch: char) -> u8;

    fn blank_glyph(&self, _cell: u16) -> u8 {
        segment::BLANK
    }

    /// Glyph showing `count` dashes, for cells that have one
    fn dash_glyph(&self, _cell: u16, _count: u8) -> Option<u8> {
        None
    }

    /// Packets writing `glyphs` to consecutive cells starting at `first_cell`
    fn encode_text(&self, first_cell: u16, glyphs: &[u8]) -> Result<Vec<Packet>, FrameError>;

    /// Sent once on attach
    fn handshake(&self) -> Vec<Packet> {
        Vec::new()
    }

    /// Sent periodically while attached
    fn keepalive(&self) -> Option<Packet> {
        None
    }

    /// Answer to a device reply, if the protocol expects one
    fn respond(&self, _reply: &DeviceReply) -> Vec<Packet> {
        Vec::new()
    }
}

/// Inbound half of a protocol family
pub trait InputDecoder {
    fn decode(&mut self, message: &MidiMessage) -> Result<Decoded, DecodeError>;

    /// Drop per-connection state (zone, partial values)
    fn reset(&mut self);

    /// Currently selected zone, for zoned protocols
    fn zone(&self) -> Option<u8> {
        None
    }
}

/// Supported protocol families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// Zoned buttons, hi/lo faders (Mackie HUI)
    Hui,
    /// Note buttons, pitch-bend faders, LCD (Mackie Control / X-Touch)
    Mcu,
    /// Pad grid with line display (Push-style)
    Pad,
}

impl ProtocolFamily {
    pub fn default_encoder(&self) -> EncoderConfig {
        match self {
            ProtocolFamily::Hui | ProtocolFamily::Mcu => EncoderConfig::new(EncoderEncoding::SignMagnitude),
            ProtocolFamily::Pad => EncoderConfig::new(EncoderEncoding::TwosComplement),
        }
    }

    /// Global indices one unit occupies, for every input and output kind.
    /// Chained units must be at least this far apart.
    pub fn span(&self) -> u16 {
        match self {
            ProtocolFamily::Hui => hui::SPAN,
            ProtocolFamily::Mcu => mcu::SPAN,
            ProtocolFamily::Pad => pad::SPAN,
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolFamily::Hui => write!(f, "hui"),
            ProtocolFamily::Mcu => write!(f, "mcu"),
            ProtocolFamily::Pad => write!(f, "pad"),
        }
    }
}

impl std::str::FromStr for ProtocolFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hui" => Ok(ProtocolFamily::Hui),
            "mcu" | "mackie" | "xtouch" => Ok(ProtocolFamily::Mcu),
            "pad" | "push" => Ok(ProtocolFamily::Pad),
            other => Err(format!("unknown protocol family '{}'", other)),
        }
    }
}

/// Construction-time options shared by all families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOptions {
    pub encoder: EncoderConfig,
    /// Mackie extender unit (device id 0x15)
    pub extender: bool,
    /// Mode byte for the pad family's set-mode message
    pub user_mode: u8,
}

impl ProtocolOptions {
    pub fn for_family(family: ProtocolFamily) -> Self {
        Self { encoder: family.default_encoder(), extender: false, user_mode: 1 }
    }
}

/// Compose the framer/decoder pair for a family
pub fn build(family: ProtocolFamily, options: &ProtocolOptions) -> (Box<dyn ProtocolFramer>, Box<dyn InputDecoder>) {
    let codec = options.encoder.codec();
    match family {
        ProtocolFamily::Hui => (Box::new(hui::HuiFramer::new()), Box::new(hui::HuiDecoder::new(codec))),
        ProtocolFamily::Mcu => (
            Box::new(mcu::McuFramer::new(options.extender)),
            Box::new(mcu::McuDecoder::new(codec, options.extender)),
        ),
        ProtocolFamily::Pad => (
            Box::new(pad::PadFramer::new(options.user_mode)),
            Box::new(pad::PadDecoder::new(codec)),
        ),
    }
}

/// Universal identity reply: 7E dev 06 02 manufacturer family(2) model(2) version(4)
pub(crate) fn parse_identity(data: &[u8]) -> Option<DeviceReply> {
    if data.len() < 5 || data[0] != 0x7E || data[2] != 0x06 || data[3] != 0x02 {
        return None;
    }
    let rest = &data[4..];
    let id_len = if rest.first() == Some(&0x00) { 3 } else { 1 };
    if rest.len() < id_len + 4 {
        return None;
    }
    let (manufacturer, rest) = rest.split_at(id_len);
    let family = rest[0] as u16 | (rest[1] as u16) << 7;
    let model = rest[2] as u16 | (rest[3] as u16) << 7;
    Some(DeviceReply::Identity {
        manufacturer: manufacturer.to_vec(),
        family,
        model,
        version: rest[4..].to_vec(),
    })
}

/// Split a block-addressed text write into `(block number, glyphs)` pieces.
///
/// `first_cell` and the glyph count must both fall on block boundaries of a
/// region starting at `region_start` with `blocks` blocks of `width` cells.
pub(crate) fn split_blocks(
    first_cell: u16,
    glyphs: &[u8],
    region_start: u16,
    width: u16,
    blocks: u16,
) -> Result<Vec<(u16, &[u8])>, FrameError> {
    let unaligned = || FrameError::UnalignedText { cell: first_cell, len: glyphs.len() };
    if first_cell < region_start || (first_cell - region_start) % width != 0 || glyphs.len() % width as usize != 0 {
        return Err(unaligned());
    }
    let first_block = (first_cell - region_start) / width;
    let pieces: Vec<_> = glyphs
        .chunks(width as usize)
        .enumerate()
        .map(|(i, chunk)| (first_block + i as u16, chunk))
        .collect();
    if pieces.last().map_or(false, |(block, _)| *block >= blocks) {
        return Err(FrameError::UnmappedText(first_cell));
    }
    Ok(pieces)
}
