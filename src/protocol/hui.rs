//! Mackie HUI
//!
//! Buttons and LEDs are grouped in zones of eight ports. Every button write
//! is a zone select followed by a port message; inbound button messages are
//! only meaningful relative to the last zone the device selected.

use tracing::debug;

use super::{
    segment, split_blocks, Decoded, DecodeError, DeviceReply, FrameError, InputDecoder, Packet,
    ProtocolFamily, ProtocolFramer, TextAddressing,
};
use crate::codec::{clamp7, split14, EncoderCodec, HiLoReconstructor, RelativeCodec};
use crate::midi::MidiMessage;
use crate::surface::{InputAddress, InputEvent, OutputAddress, OutputKind, WireState};

pub const PORTS_PER_ZONE: u16 = 8;
/// Highest zone with buttons behind it
pub const MAX_ZONE: u8 = 0x1D;
pub const CHANNELS: u16 = 8;
/// Jog wheel shows up as the encoder after the eight V-pots
pub const JOG_ENCODER: u16 = 8;

const ZONE_SELECT_OUT: u8 = 0x0C;
const PORT_OUT: u8 = 0x2C;
const ZONE_SELECT_IN: u8 = 0x0F;
const PORT_IN: u8 = 0x2F;
const PORT_ON: u8 = 0x40;
const PORT_MASK: u8 = 0x0F;

const FADER_HIGH: u8 = 0x00;
const FADER_LOW: u8 = 0x20;
const VPOT_RING: u8 = 0x10;
const VPOT_IN: u8 = 0x40;
const JOG: u8 = 0x0D;

const SYSEX_HEADER: [u8; 5] = [0x00, 0x00, 0x66, 0x05, 0x00];
const SCRIBBLE_CMD: u8 = 0x10;
const LCD_CMD: u8 = 0x12;

pub const SCRIBBLE_FIRST: u16 = 0;
pub const SCRIBBLE_WIDTH: u16 = 4;
pub const LCD_FIRST: u16 = 32;
pub const LCD_WIDTH: u16 = 10;
const LCD_ZONES: u16 = 8;
pub const TEXT_CELLS: u16 = LCD_FIRST + LCD_WIDTH * LCD_ZONES;

/// Every zone's ports
pub const SPAN: u16 = (MAX_ZONE as u16 + 1) * PORTS_PER_ZONE;

const PING: [u8; 3] = [0x90, 0x00, 0x00];

#[derive(Debug, Default)]
pub struct HuiFramer;

impl HuiFramer {
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolFramer for HuiFramer {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Hui
    }

    fn supports(&self, address: &OutputAddress) -> bool {
        match address.kind {
            OutputKind::Button => address.index < (MAX_ZONE as u16 + 1) * PORTS_PER_ZONE,
            OutputKind::Fader | OutputKind::KnobRing => address.index < CHANNELS,
            OutputKind::TextCell => address.index < TEXT_CELLS,
            OutputKind::Pad => false,
        }
    }

    fn encode_output(&self, address: &OutputAddress, wire: &WireState) -> Result<Vec<Packet>, FrameError> {
        if !self.supports(address) {
            return Err(FrameError::Unmapped(*address));
        }
        let index = address.index;
        match address.kind {
            OutputKind::Button => {
                let zone = (index / PORTS_PER_ZONE) as u8;
                let port = (index % PORTS_PER_ZONE) as u8;
                let on = if wire.value > 0 { PORT_ON } else { 0 };
                Ok(vec![Packet::cc(ZONE_SELECT_OUT, zone), Packet::cc(PORT_OUT, on | port)])
            }
            OutputKind::Fader => {
                let split = split14(wire.value);
                let channel = index as u8;
                Ok(vec![
                    Packet::cc(FADER_HIGH + channel, split.high),
                    Packet::cc(FADER_LOW + channel, split.low),
                ])
            }
            OutputKind::KnobRing => Ok(vec![Packet::cc(VPOT_RING + index as u8, clamp7(wire.value))]),
            OutputKind::TextCell => self.encode_text(index, &[wire.value as u8]),
            OutputKind::Pad => Err(FrameError::Unmapped(*address)),
        }
    }

    fn text_addressing(&self, cell: u16) -> Option<TextAddressing> {
        if cell < LCD_FIRST {
            let start = cell - cell % SCRIBBLE_WIDTH;
            Some(TextAddressing::Block { start, len: SCRIBBLE_WIDTH })
        } else if cell < TEXT_CELLS {
            let start = cell - (cell - LCD_FIRST) % LCD_WIDTH;
            Some(TextAddressing::Block { start, len: LCD_WIDTH })
        } else {
            None
        }
    }

    fn glyph(&self, _cell: u16, ch: char) -> u8 {
        segment::ascii_glyph(ch)
    }

    fn encode_text(&self, first_cell: u16, glyphs: &[u8]) -> Result<Vec<Packet>, FrameError> {
        let (command, pieces) = if first_cell < LCD_FIRST {
            (SCRIBBLE_CMD, split_blocks(first_cell, glyphs, SCRIBBLE_FIRST, SCRIBBLE_WIDTH, LCD_FIRST / SCRIBBLE_WIDTH)?)
        } else if first_cell < TEXT_CELLS {
            (LCD_CMD, split_blocks(first_cell, glyphs, LCD_FIRST, LCD_WIDTH, LCD_ZONES)?)
        } else {
            return Err(FrameError::UnmappedText(first_cell));
        };

        Ok(pieces
            .into_iter()
            .map(|(block, chars)| {
                let mut body = Vec::with_capacity(chars.len() + 2);
                body.push(command);
                body.push(block as u8);
                body.extend_from_slice(chars);
                Packet::sysex(&SYSEX_HEADER, &body)
            })
            .collect())
    }

    fn keepalive(&self) -> Option<Packet> {
        Some(Packet::Value(PING.to_vec()))
    }
}

/// Inbound HUI state: the selected zone and the fader high bytes
#[derive(Debug)]
pub struct HuiDecoder {
    zone: Option<u8>,
    faders: HiLoReconstructor,
    codec: EncoderCodec,
}

impl HuiDecoder {
    pub fn new(codec: EncoderCodec) -> Self {
        Self { zone: None, faders: HiLoReconstructor::new(CHANNELS as usize), codec }
    }

    fn port(&self, value: u8, message: &MidiMessage) -> Result<Decoded, DecodeError> {
        let zone = self.zone.ok_or_else(|| DecodeError::NoZone { raw: message.encode() })?;
        let port = value & PORT_MASK;
        if zone > MAX_ZONE || port as u16 >= PORTS_PER_ZONE {
            return Err(DecodeError::UnmappedButton { zone, port });
        }

        let address = InputAddress::button(zone as u16 * PORTS_PER_ZONE + port as u16);
        let event = if value & PORT_ON != 0 {
            InputEvent::ButtonDown(address)
        } else {
            InputEvent::ButtonUp(address)
        };
        Ok(Decoded::Event(event))
    }
}

impl InputDecoder for HuiDecoder {
    fn decode(&mut self, message: &MidiMessage) -> Result<Decoded, DecodeError> {
        match *message {
            MidiMessage::ControlChange { channel: 0, cc, value } => match cc {
                ZONE_SELECT_IN => {
                    self.zone = Some(value);
                    Ok(Decoded::Nothing)
                }
                PORT_IN => self.port(value, message),
                c if (FADER_HIGH..FADER_HIGH + CHANNELS as u8).contains(&c) => {
                    self.faders.high((c - FADER_HIGH) as usize, value);
                    Ok(Decoded::Nothing)
                }
                c if (FADER_LOW..FADER_LOW + CHANNELS as u8).contains(&c) => {
                    let channel = c - FADER_LOW;
                    match self.faders.low(channel as usize, value) {
                        Some(value) => Ok(Decoded::Event(InputEvent::AbsoluteValue {
                            address: InputAddress::fader(channel as u16),
                            value,
                        })),
                        None => Err(DecodeError::unrecognized(message)),
                    }
                }
                c if (VPOT_IN..VPOT_IN + CHANNELS as u8).contains(&c) => Ok(Decoded::Event(InputEvent::EncoderDelta {
                    address: InputAddress::encoder((c - VPOT_IN) as u16),
                    delta: self.codec.decode(value),
                })),
                JOG => Ok(Decoded::Event(InputEvent::EncoderDelta {
                    address: InputAddress::encoder(JOG_ENCODER),
                    delta: self.codec.decode(value),
                })),
                _ => Err(DecodeError::unrecognized(message)),
            },
            MidiMessage::NoteOn { channel: 0, note: 0, velocity: 0x7F } => Ok(Decoded::Reply(DeviceReply::Ping)),
            MidiMessage::SysEx { ref data } if data.starts_with(&SYSEX_HEADER[..3]) => {
                debug!("Ignoring HUI SysEx ({} bytes)", data.len());
                Ok(Decoded::Nothing)
            }
            // Active sensing and clock
            MidiMessage::System { .. } => Ok(Decoded::Nothing),
            _ => Err(DecodeError::unrecognized(message)),
        }
    }

    fn reset(&mut self) {
        self.zone = None;
        self.faders.reset();
    }

    fn zone(&self) -> Option<u8> {
        self.zone
    }
}
