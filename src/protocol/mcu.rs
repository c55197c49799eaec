//! Mackie Control Universal (and X-Touch in MC mode)
//!
//! Buttons are notes, faders are pitch bend per channel. The LCD takes any
//! run of characters at an offset; the 7-segment display is written one
//! digit per control change.

use tracing::{debug, warn};

use super::{
    parse_identity, segment, BlinkStrategy, Decoded, DecodeError, DeviceReply, FrameError, InputDecoder,
    Packet, ProtocolFamily, ProtocolFramer, TextAddressing,
};
use crate::codec::{clamp7, EncoderCodec, RelativeCodec, MAX_14BIT};
use crate::midi::MidiMessage;
use crate::surface::{InputAddress, InputEvent, OutputAddress, OutputKind, WireState};

const VENDOR: [u8; 3] = [0x00, 0x00, 0x66];
const DEVICE_MAIN: u8 = 0x14;
const DEVICE_EXTENDER: u8 = 0x15;

const CMD_DEVICE_QUERY: u8 = 0x00;
const CMD_HOST_CONNECTION_QUERY: u8 = 0x01;
const CMD_HOST_CONNECTION_REPLY: u8 = 0x02;
const CMD_CONNECTION_CONFIRM: u8 = 0x03;
const CMD_CONNECTION_ERROR: u8 = 0x04;
const CMD_LCD: u8 = 0x12;
const CMD_VERSION_REQUEST: u8 = 0x13;
const CMD_VERSION_REPLY: u8 = 0x14;

const SERIAL_LEN: usize = 7;
const CHALLENGE_LEN: usize = 4;

pub const BUTTONS: u16 = 128;
/// Eight channel faders plus master
pub const FADERS: u16 = 9;
pub const RINGS: u16 = 8;
pub const JOG_ENCODER: u16 = 8;

const VPOT_RING: u8 = 0x30;
const VPOT_IN: u8 = 0x10;
const JOG: u8 = 0x3C;

const VELOCITY_ON: u8 = 0x7F;
const VELOCITY_OFF: u8 = 0x00;
const VELOCITY_BLINK: u8 = 0x01;

pub const LCD_CELLS: u16 = 112;
pub const TIMECODE_FIRST: u16 = 112;
pub const TIMECODE_DIGITS: u16 = 10;
pub const ASSIGNMENT_FIRST: u16 = 122;
pub const ASSIGNMENT_DIGITS: u16 = 2;
pub const TEXT_CELLS: u16 = ASSIGNMENT_FIRST + ASSIGNMENT_DIGITS;

/// Button notes are the widest range
pub const SPAN: u16 = BUTTONS;

/// Leftmost timecode digit is CC 0x49, counting down to the right
const TIMECODE_CC: u8 = 0x49;
const ASSIGNMENT_CC: u8 = 0x4B;

fn device_id(extender: bool) -> u8 {
    if extender { DEVICE_EXTENDER } else { DEVICE_MAIN }
}

fn digit_cc(cell: u16) -> Option<u8> {
    if (TIMECODE_FIRST..TIMECODE_FIRST + TIMECODE_DIGITS).contains(&cell) {
        Some(TIMECODE_CC - (cell - TIMECODE_FIRST) as u8)
    } else if (ASSIGNMENT_FIRST..TEXT_CELLS).contains(&cell) {
        Some(ASSIGNMENT_CC - (cell - ASSIGNMENT_FIRST) as u8)
    } else {
        None
    }
}

/// Answer to the host-connection challenge
pub fn challenge_response(challenge: [u8; 4]) -> [u8; 4] {
    let [c1, c2, c3, c4] = challenge.map(|b| b as i32);
    [
        (c1 + (c2 ^ 0x0A) - c4) & 0x7F,
        ((c3 >> 4) ^ (c1 + c4)) & 0x7F,
        ((c4 - (c3 << 2)) ^ (c1 | c2)) & 0x7F,
        (c2 - c3 + (0xF0 ^ (c4 << 4))) & 0x7F,
    ]
    .map(|r| r as u8)
}

#[derive(Debug)]
pub struct McuFramer {
    device: u8,
}

impl McuFramer {
    pub fn new(extender: bool) -> Self {
        Self { device: device_id(extender) }
    }

    fn header(&self) -> [u8; 4] {
        [VENDOR[0], VENDOR[1], VENDOR[2], self.device]
    }
}

impl ProtocolFramer for McuFramer {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Mcu
    }

    fn supports(&self, address: &OutputAddress) -> bool {
        match address.kind {
            OutputKind::Button => address.index < BUTTONS,
            OutputKind::Fader => address.index < FADERS,
            OutputKind::KnobRing => address.index < RINGS,
            OutputKind::TextCell => address.index < TEXT_CELLS,
            OutputKind::Pad => false,
        }
    }

    fn blink_strategy(&self, kind: OutputKind) -> BlinkStrategy {
        match kind {
            OutputKind::Button => BlinkStrategy::Wire,
            _ => BlinkStrategy::Timer,
        }
    }

    fn encode_output(&self, address: &OutputAddress, wire: &WireState) -> Result<Vec<Packet>, FrameError> {
        if !self.supports(address) {
            return Err(FrameError::Unmapped(*address));
        }
        let index = address.index as u8;
        match address.kind {
            OutputKind::Button => {
                let velocity = match wire.blink {
                    Some(blink) if wire.value > 0 || blink.color > 0 => VELOCITY_BLINK,
                    _ if wire.value > 0 => VELOCITY_ON,
                    _ => VELOCITY_OFF,
                };
                Ok(vec![Packet::note(0, index, velocity)])
            }
            OutputKind::Fader => {
                let value = wire.value.clamp(0, MAX_14BIT as i32) as u16;
                let bytes = MidiMessage::PitchBend { channel: index, value }.encode();
                Ok(vec![Packet::Value(bytes)])
            }
            OutputKind::KnobRing => Ok(vec![Packet::cc(VPOT_RING + index, clamp7(wire.value))]),
            OutputKind::TextCell => self.encode_text(address.index, &[wire.value as u8]),
            OutputKind::Pad => Err(FrameError::Unmapped(*address)),
        }
    }

    fn text_addressing(&self, cell: u16) -> Option<TextAddressing> {
        if cell < LCD_CELLS {
            Some(TextAddressing::Span)
        } else if cell < TEXT_CELLS {
            Some(TextAddressing::Cell)
        } else {
            None
        }
    }

    fn glyph(&self, cell: u16, ch: char) -> u8 {
        if cell < LCD_CELLS {
            segment::ascii_glyph(ch)
        } else {
            segment::segment_code(ch)
        }
    }

    fn dash_glyph(&self, cell: u16, count: u8) -> Option<u8> {
        digit_cc(cell).map(|_| segment::dash_glyph(count))
    }

    fn encode_text(&self, first_cell: u16, glyphs: &[u8]) -> Result<Vec<Packet>, FrameError> {
        let end = first_cell as usize + glyphs.len();
        if end > TEXT_CELLS as usize {
            return Err(FrameError::UnmappedText(first_cell));
        }

        let mut packets = Vec::new();
        let lcd_len = (LCD_CELLS as usize).saturating_sub(first_cell as usize).min(glyphs.len());
        if lcd_len > 0 {
            let mut body = Vec::with_capacity(lcd_len + 2);
            body.push(CMD_LCD);
            body.push(first_cell as u8);
            body.extend_from_slice(&glyphs[..lcd_len]);
            packets.push(Packet::sysex(&self.header(), &body));
        }
        for (offset, &glyph) in glyphs.iter().enumerate().skip(lcd_len) {
            let cell = first_cell + offset as u16;
            let cc = digit_cc(cell).ok_or(FrameError::UnmappedText(cell))?;
            packets.push(Packet::cc(cc, glyph));
        }
        Ok(packets)
    }

    fn handshake(&self) -> Vec<Packet> {
        vec![
            Packet::sysex(&self.header(), &[CMD_DEVICE_QUERY]),
            Packet::sysex(&self.header(), &[CMD_VERSION_REQUEST, 0x00]),
        ]
    }

    fn respond(&self, reply: &DeviceReply) -> Vec<Packet> {
        match reply {
            DeviceReply::HostConnectionQuery { serial, challenge } => {
                let mut body = Vec::with_capacity(1 + SERIAL_LEN + CHALLENGE_LEN);
                body.push(CMD_HOST_CONNECTION_REPLY);
                body.extend_from_slice(serial);
                body.extend_from_slice(&challenge_response(*challenge));
                vec![Packet::sysex(&self.header(), &body)]
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct McuDecoder {
    codec: EncoderCodec,
    device: u8,
}

impl McuDecoder {
    pub fn new(codec: EncoderCodec, extender: bool) -> Self {
        Self { codec, device: device_id(extender) }
    }

    fn vendor_sysex(&self, data: &[u8], message: &MidiMessage) -> Result<Decoded, DecodeError> {
        let malformed = || DecodeError::MalformedSysEx { raw: message.encode() };
        let (&device, rest) = data[VENDOR.len()..].split_first().ok_or_else(malformed)?;
        if device != DEVICE_MAIN && device != DEVICE_EXTENDER {
            debug!("Ignoring Mackie SysEx for device {:02X}", device);
            return Ok(Decoded::Nothing);
        }
        if device != self.device {
            debug!("SysEx addressed to device {:02X}, expected {:02X}", device, self.device);
        }
        let (&command, payload) = rest.split_first().ok_or_else(malformed)?;

        match command {
            CMD_HOST_CONNECTION_QUERY => {
                if payload.len() != SERIAL_LEN + CHALLENGE_LEN {
                    return Err(malformed());
                }
                let (serial, challenge) = payload.split_at(SERIAL_LEN);
                let challenge = [challenge[0], challenge[1], challenge[2], challenge[3]];
                Ok(Decoded::Reply(DeviceReply::HostConnectionQuery { serial: serial.to_vec(), challenge }))
            }
            CMD_CONNECTION_CONFIRM => {
                if payload.len() < SERIAL_LEN {
                    return Err(malformed());
                }
                Ok(Decoded::Reply(DeviceReply::ConnectionConfirmed { serial: payload[..SERIAL_LEN].to_vec() }))
            }
            CMD_CONNECTION_ERROR => {
                warn!("Device reported a host connection error");
                Ok(Decoded::Nothing)
            }
            CMD_VERSION_REPLY => {
                let version: String = payload
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| b as char)
                    .collect();
                Ok(Decoded::Reply(DeviceReply::Version(version.trim().to_string())))
            }
            other => {
                debug!("Ignoring Mackie SysEx command {:02X}", other);
                Ok(Decoded::Nothing)
            }
        }
    }
}

impl InputDecoder for McuDecoder {
    fn decode(&mut self, message: &MidiMessage) -> Result<Decoded, DecodeError> {
        match *message {
            MidiMessage::NoteOn { channel: 0, note, .. } => {
                Ok(Decoded::Event(InputEvent::ButtonDown(InputAddress::button(note as u16))))
            }
            MidiMessage::NoteOff { channel: 0, note, .. } => {
                Ok(Decoded::Event(InputEvent::ButtonUp(InputAddress::button(note as u16))))
            }
            MidiMessage::PitchBend { channel, value } if (channel as u16) < FADERS => {
                Ok(Decoded::Event(InputEvent::AbsoluteValue { address: InputAddress::fader(channel as u16), value }))
            }
            MidiMessage::ControlChange { channel: 0, cc, value } => match cc {
                c if (VPOT_IN..VPOT_IN + RINGS as u8).contains(&c) => Ok(Decoded::Event(InputEvent::EncoderDelta {
                    address: InputAddress::encoder((c - VPOT_IN) as u16),
                    delta: self.codec.decode(value),
                })),
                JOG => Ok(Decoded::Event(InputEvent::EncoderDelta {
                    address: InputAddress::encoder(JOG_ENCODER),
                    delta: self.codec.decode(value),
                })),
                _ => Err(DecodeError::unrecognized(message)),
            },
            MidiMessage::SysEx { ref data } if data.starts_with(&VENDOR) => self.vendor_sysex(data, message),
            MidiMessage::SysEx { ref data } => match parse_identity(data) {
                Some(reply) => Ok(Decoded::Reply(reply)),
                None => Err(DecodeError::unrecognized(message)),
            },
            MidiMessage::System { .. } => Ok(Decoded::Nothing),
            _ => Err(DecodeError::unrecognized(message)),
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncoderConfig, EncoderEncoding};
    use crate::surface::WireBlink;

    fn decoder() -> McuDecoder {
        McuDecoder::new(EncoderConfig::new(EncoderEncoding::SignMagnitude).codec(), false)
    }

    #[test]
    fn test_button_velocities() {
        let framer = McuFramer::new(false);
        let addr = OutputAddress::button(0x5E);
        let on = framer.encode_output(&addr, &WireState::steady(1)).unwrap();
        assert_eq!(on, vec![Packet::Value(vec![0x90, 0x5E, 0x7F])]);
        let off = framer.encode_output(&addr, &WireState::steady(0)).unwrap();
        assert_eq!(off, vec![Packet::Value(vec![0x90, 0x5E, 0x00])]);
        let blink = WireState { value: 0, blink: Some(WireBlink { color: 1, fast: false }) };
        assert_eq!(framer.encode_output(&addr, &blink).unwrap(), vec![Packet::Value(vec![0x90, 0x5E, 0x01])]);
        assert_eq!(framer.blink_strategy(OutputKind::Button), BlinkStrategy::Wire);
    }

    #[test]
    fn test_fader_pitch_bend() {
        let framer = McuFramer::new(false);
        let packets = framer.encode_output(&OutputAddress::fader(8), &WireState::steady(20000)).unwrap();
        assert_eq!(packets, vec![Packet::Value(vec![0xE8, 0x7F, 0x7F])]);
    }

    #[test]
    fn test_lcd_span_and_digits() {
        let framer = McuFramer::new(true);
        let packets = framer.encode_text(58, b"Vol").unwrap();
        assert_eq!(
            packets,
            vec![Packet::Framed(vec![0xF0, 0x00, 0x00, 0x66, 0x15, 0x12, 58, b'V', b'o', b'l', 0xF7])]
        );

        let packets = framer.encode_text(112, &[0x31, 0x32]).unwrap();
        assert_eq!(packets, vec![Packet::Value(vec![0xB0, 0x49, 0x31]), Packet::Value(vec![0xB0, 0x48, 0x32])]);

        let packets = framer.encode_text(123, &[0x05]).unwrap();
        assert_eq!(packets, vec![Packet::Value(vec![0xB0, 0x4A, 0x05])]);
        assert!(framer.encode_text(123, &[0x05, 0x06]).is_err());
    }

    #[test]
    fn test_glyph_tables_by_cell() {
        let framer = McuFramer::new(false);
        assert_eq!(framer.glyph(0, 'a'), b'a');
        assert_eq!(framer.glyph(112, 'a'), 0x01);
        assert_eq!(framer.dash_glyph(113, 1), Some(0x3D));
        assert_eq!(framer.dash_glyph(10, 1), None);
    }

    #[test]
    fn test_handshake_messages() {
        let framer = McuFramer::new(false);
        let bytes: Vec<_> = framer.handshake().iter().map(|p| p.bytes().to_vec()).collect();
        assert_eq!(
            bytes,
            vec![
                vec![0xF0, 0x00, 0x00, 0x66, 0x14, 0x00, 0xF7],
                vec![0xF0, 0x00, 0x00, 0x66, 0x14, 0x13, 0x00, 0xF7],
            ]
        );
    }

    #[test]
    fn test_host_connection_challenge() {
        let mut decoder = decoder();
        let mut data = vec![0x00, 0x00, 0x66, 0x14, 0x01];
        data.extend_from_slice(b"ABC1234");
        data.extend_from_slice(&[0x10, 0x20, 0x30, 0x40]);
        let decoded = decoder.decode(&MidiMessage::SysEx { data }).unwrap();

        let reply = match decoded {
            Decoded::Reply(reply) => reply,
            other => panic!("expected reply, got {:?}", other),
        };
        assert_eq!(
            reply,
            DeviceReply::HostConnectionQuery { serial: b"ABC1234".to_vec(), challenge: [0x10, 0x20, 0x30, 0x40] }
        );

        let response = McuFramer::new(false).respond(&reply);
        let bytes = response[0].bytes();
        assert_eq!(&bytes[..6], &[0xF0, 0x00, 0x00, 0x66, 0x14, 0x02]);
        assert_eq!(&bytes[6..13], b"ABC1234");
        assert_eq!(&bytes[13..17], &challenge_response([0x10, 0x20, 0x30, 0x40]));
        assert_eq!(bytes[17], 0xF7);
    }

    #[test]
    fn test_challenge_response_formula() {
        // c1=0x10 c2=0x20 c3=0x30 c4=0x40
        // r1 = 0x10 + (0x20 ^ 0x0A) - 0x40 = 0x10 + 0x2A - 0x40 = -6 -> 0x7A
        // r2 = (0x30 >> 4) ^ (0x10 + 0x40) = 0x03 ^ 0x50 = 0x53
        // r3 = (0x40 - 0xC0) ^ (0x10 | 0x20) = -0x80 ^ 0x30 -> 0x30
        // r4 = 0x20 - 0x30 + (0xF0 ^ 0x400) = -0x10 + 0x4F0 = 0x4E0 -> 0x60
        assert_eq!(challenge_response([0x10, 0x20, 0x30, 0x40]), [0x7A, 0x53, 0x30, 0x60]);
    }

    #[test]
    fn test_malformed_challenge() {
        let mut decoder = decoder();
        let data = vec![0x00, 0x00, 0x66, 0x14, 0x01, 0x01, 0x02];
        assert!(matches!(decoder.decode(&MidiMessage::SysEx { data }), Err(DecodeError::MalformedSysEx { .. })));
    }

    #[test]
    fn test_version_reply() {
        let mut decoder = decoder();
        let mut data = vec![0x00, 0x00, 0x66, 0x14, 0x14];
        data.extend_from_slice(b"V1.22");
        assert_eq!(
            decoder.decode(&MidiMessage::SysEx { data }),
            Ok(Decoded::Reply(DeviceReply::Version("V1.22".into())))
        );
    }

    #[test]
    fn test_inputs() {
        let mut decoder = decoder();
        assert_eq!(
            decoder.decode(&MidiMessage::NoteOn { channel: 0, note: 0x10, velocity: 0x7F }),
            Ok(Decoded::Event(InputEvent::ButtonDown(InputAddress::button(0x10))))
        );
        assert_eq!(
            decoder.decode(&MidiMessage::NoteOff { channel: 0, note: 0x10, velocity: 0 }),
            Ok(Decoded::Event(InputEvent::ButtonUp(InputAddress::button(0x10))))
        );
        assert_eq!(
            decoder.decode(&MidiMessage::PitchBend { channel: 2, value: 8192 }),
            Ok(Decoded::Event(InputEvent::AbsoluteValue { address: InputAddress::fader(2), value: 8192 }))
        );
        assert_eq!(
            decoder.decode(&MidiMessage::ControlChange { channel: 0, cc: 0x3C, value: 0x41 }),
            Ok(Decoded::Event(InputEvent::EncoderDelta { address: InputAddress::encoder(8), delta: -1 }))
        );
        assert!(decoder.decode(&MidiMessage::ProgramChange { channel: 0, program: 1 }).is_err());
    }
}
