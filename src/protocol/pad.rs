//! Push-style pad grid
//!
//! 8x8 pads with palette colors, single-color button LEDs with a brightness
//! scale, and a four-line character display written a whole line at a time.

use tracing::debug;

use super::{
    parse_identity, segment, split_blocks, BlinkStrategy, Decoded, DecodeError, DeviceReply, FrameError,
    InputDecoder, Packet, ProtocolFamily, ProtocolFramer, TextAddressing,
};
use crate::codec::{clamp7, EncoderCodec, RelativeCodec};
use crate::midi::MidiMessage;
use crate::surface::{InputAddress, InputEvent, OutputAddress, OutputKind, WireState};

const SYSEX_HEADER: [u8; 3] = [0x47, 0x7F, 0x15];
const LINE_CMD: u8 = 0x18;
const SET_MODE_CMD: u8 = 0x62;
const IDENTITY_REQUEST: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];
const MANUFACTURER: u8 = 0x47;

pub const PAD_NOTE_BASE: u8 = 36;
pub const PADS: u16 = 64;
pub const BUTTONS: u16 = 128;

/// Zero-based MIDI channels carrying the pad blink color
const BLINK_FAST_CHANNEL: u8 = 13;
const BLINK_SLOW_CHANNEL: u8 = 15;

const LED_OFF: u8 = 0;
const LED_DIM: u8 = 1;
const LED_LIT: u8 = 4;
const LED_BLINK_SLOW: u8 = 1;
const LED_BLINK_FAST: u8 = 2;

pub const LINES: u16 = 4;
pub const LINE_WIDTH: u16 = 68;
pub const TEXT_CELLS: u16 = LINES * LINE_WIDTH;

const ENCODER_CC_FIRST: u8 = 71;
const ENCODER_CC_LAST: u8 = 79;
const TEMPO_CC: u8 = 14;
const SWING_CC: u8 = 15;
const TOUCH_NOTE_LAST: u8 = 10;
/// Encoder touch notes are reported as buttons above the CC range
pub const TOUCH_BUTTON_BASE: u16 = 0x80;

/// Display cells are the widest range
pub const SPAN: u16 = TEXT_CELLS;

/// Brightness for a button value on the single-color scale
fn led_level(value: i32) -> u8 {
    match value {
        v if v <= 0 => LED_OFF,
        1 => LED_DIM,
        _ => LED_LIT,
    }
}

#[derive(Debug)]
pub struct PadFramer {
    user_mode: u8,
}

impl PadFramer {
    pub fn new(user_mode: u8) -> Self {
        Self { user_mode: user_mode & 0x7F }
    }
}

impl ProtocolFramer for PadFramer {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Pad
    }

    fn supports(&self, address: &OutputAddress) -> bool {
        match address.kind {
            OutputKind::Pad => address.index < PADS,
            OutputKind::Button => address.index < BUTTONS,
            OutputKind::TextCell => address.index < TEXT_CELLS,
            OutputKind::KnobRing | OutputKind::Fader => false,
        }
    }

    fn blink_strategy(&self, kind: OutputKind) -> BlinkStrategy {
        match kind {
            OutputKind::Pad | OutputKind::Button => BlinkStrategy::Wire,
            _ => BlinkStrategy::Timer,
        }
    }

    fn encode_output(&self, address: &OutputAddress, wire: &WireState) -> Result<Vec<Packet>, FrameError> {
        if !self.supports(address) {
            return Err(FrameError::Unmapped(*address));
        }
        match address.kind {
            OutputKind::Pad => {
                let note = PAD_NOTE_BASE + address.index as u8;
                let mut packets = vec![Packet::note(0, note, clamp7(wire.value))];
                if let Some(blink) = wire.blink {
                    let channel = if blink.fast { BLINK_FAST_CHANNEL } else { BLINK_SLOW_CHANNEL };
                    packets.push(Packet::note(channel, note, clamp7(blink.color)));
                }
                Ok(packets)
            }
            OutputKind::Button => {
                let level = match wire.blink {
                    Some(blink) => match led_level(wire.value.max(blink.color)) {
                        LED_OFF => LED_OFF,
                        level if blink.fast => level + LED_BLINK_FAST,
                        level => level + LED_BLINK_SLOW,
                    },
                    None => led_level(wire.value),
                };
                Ok(vec![Packet::cc(address.index as u8, level)])
            }
            OutputKind::TextCell => self.encode_text(address.index, &[wire.value as u8]),
            OutputKind::KnobRing | OutputKind::Fader => Err(FrameError::Unmapped(*address)),
        }
    }

    fn text_addressing(&self, cell: u16) -> Option<TextAddressing> {
        (cell < TEXT_CELLS).then(|| TextAddressing::Block { start: cell - cell % LINE_WIDTH, len: LINE_WIDTH })
    }

    fn glyph(&self, _cell: u16, ch: char) -> u8 {
        segment::ascii_glyph(ch)
    }

    fn encode_text(&self, first_cell: u16, glyphs: &[u8]) -> Result<Vec<Packet>, FrameError> {
        let lines = split_blocks(first_cell, glyphs, 0, LINE_WIDTH, LINES)?;
        Ok(lines
            .into_iter()
            .map(|(line, chars)| {
                let mut body = Vec::with_capacity(chars.len() + 4);
                body.extend_from_slice(&[LINE_CMD + line as u8, 0x00, LINE_WIDTH as u8 + 1, 0x00]);
                body.extend_from_slice(chars);
                Packet::sysex(&SYSEX_HEADER, &body)
            })
            .collect())
    }

    fn handshake(&self) -> Vec<Packet> {
        vec![
            Packet::Framed(IDENTITY_REQUEST.to_vec()),
            Packet::sysex(&SYSEX_HEADER, &[SET_MODE_CMD, 0x00, 0x01, self.user_mode]),
        ]
    }
}

#[derive(Debug)]
pub struct PadDecoder {
    codec: EncoderCodec,
}

impl PadDecoder {
    pub fn new(codec: EncoderCodec) -> Self {
        Self { codec }
    }

    fn note(&self, note: u8, down: bool, message: &MidiMessage) -> Result<Decoded, DecodeError> {
        let address = match note {
            n if n >= PAD_NOTE_BASE && ((n - PAD_NOTE_BASE) as u16) < PADS => {
                InputAddress::pad((n - PAD_NOTE_BASE) as u16)
            }
            n if n <= TOUCH_NOTE_LAST => InputAddress::button(TOUCH_BUTTON_BASE + n as u16),
            _ => return Err(DecodeError::unrecognized(message)),
        };
        let event = if down { InputEvent::ButtonDown(address) } else { InputEvent::ButtonUp(address) };
        Ok(Decoded::Event(event))
    }

    fn encoder(&self, index: u16, value: u8) -> Decoded {
        Decoded::Event(InputEvent::EncoderDelta { address: InputAddress::encoder(index), delta: self.codec.decode(value) })
    }
}

impl InputDecoder for PadDecoder {
    fn decode(&mut self, message: &MidiMessage) -> Result<Decoded, DecodeError> {
        match *message {
            MidiMessage::NoteOn { note, .. } => self.note(note, true, message),
            MidiMessage::NoteOff { note, .. } => self.note(note, false, message),
            MidiMessage::ControlChange { cc, value, .. } => Ok(match cc {
                ENCODER_CC_FIRST..=ENCODER_CC_LAST => self.encoder((cc - ENCODER_CC_FIRST) as u16, value),
                TEMPO_CC => self.encoder(9, value),
                SWING_CC => self.encoder(10, value),
                _ => {
                    let address = InputAddress::button(cc as u16);
                    Decoded::Event(if value > 0 {
                        InputEvent::ButtonDown(address)
                    } else {
                        InputEvent::ButtonUp(address)
                    })
                }
            }),
            // Touch strip
            MidiMessage::PitchBend { value, .. } => {
                Ok(Decoded::Event(InputEvent::AbsoluteValue { address: InputAddress::fader(0), value }))
            }
            MidiMessage::PolyPressure { .. } | MidiMessage::ChannelPressure { .. } => Ok(Decoded::Nothing),
            MidiMessage::SysEx { ref data } => match parse_identity(data) {
                Some(DeviceReply::Identity { ref manufacturer, .. }) if manufacturer.first() != Some(&MANUFACTURER) => {
                    debug!("Identity reply from another manufacturer");
                    Ok(Decoded::Nothing)
                }
                Some(reply) => Ok(Decoded::Reply(reply)),
                None => {
                    debug!("Ignoring SysEx ({} bytes)", data.len());
                    Ok(Decoded::Nothing)
                }
            },
            MidiMessage::System { .. } => Ok(Decoded::Nothing),
            MidiMessage::ProgramChange { .. } => Err(DecodeError::unrecognized(message)),
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncoderConfig, EncoderEncoding};
    use crate::surface::WireBlink;

    fn decoder() -> PadDecoder {
        PadDecoder::new(EncoderConfig::new(EncoderEncoding::TwosComplement).codec())
    }

    #[test]
    fn test_pad_steady_and_blink() {
        let framer = PadFramer::new(1);
        let addr = OutputAddress::pad(0);
        assert_eq!(
            framer.encode_output(&addr, &WireState::steady(5)).unwrap(),
            vec![Packet::Value(vec![0x90, 36, 5])]
        );

        let fast = WireState { value: 5, blink: Some(WireBlink { color: 9, fast: true }) };
        assert_eq!(
            framer.encode_output(&addr, &fast).unwrap(),
            vec![Packet::Value(vec![0x90, 36, 5]), Packet::Value(vec![0x9D, 36, 9])]
        );
        let slow = WireState { value: 5, blink: Some(WireBlink { color: 9, fast: false }) };
        assert_eq!(framer.encode_output(&addr, &slow).unwrap()[1], Packet::Value(vec![0x9F, 36, 9]));
    }

    #[test]
    fn test_button_led_scale() {
        let framer = PadFramer::new(1);
        let addr = OutputAddress::button(85);
        let level = |wire: WireState| framer.encode_output(&addr, &wire).unwrap()[0].bytes()[2];
        assert_eq!(level(WireState::steady(0)), 0);
        assert_eq!(level(WireState::steady(1)), 1);
        assert_eq!(level(WireState::steady(2)), 4);
        assert_eq!(level(WireState { value: 2, blink: Some(WireBlink { color: 0, fast: false }) }), 5);
        assert_eq!(level(WireState { value: 2, blink: Some(WireBlink { color: 0, fast: true }) }), 6);
        assert_eq!(level(WireState { value: 0, blink: Some(WireBlink { color: 0, fast: true }) }), 0);
    }

    #[test]
    fn test_display_line() {
        let framer = PadFramer::new(1);
        let line = [b'x'; 68];
        let packets = framer.encode_text(68, &line).unwrap();
        let bytes = packets[0].bytes();
        assert_eq!(&bytes[..8], &[0xF0, 0x47, 0x7F, 0x15, 0x19, 0x00, 0x45, 0x00]);
        assert_eq!(bytes.len(), 8 + 68 + 1);
        assert_eq!(framer.text_addressing(140), Some(TextAddressing::Block { start: 136, len: 68 }));
        assert_eq!(framer.text_addressing(272), None);
    }

    #[test]
    fn test_handshake() {
        let framer = PadFramer::new(3);
        let packets = framer.handshake();
        assert_eq!(packets[0].bytes(), &[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]);
        assert_eq!(packets[1].bytes(), &[0xF0, 0x47, 0x7F, 0x15, 0x62, 0x00, 0x01, 0x03, 0xF7]);
    }

    #[test]
    fn test_inputs() {
        let mut decoder = decoder();
        assert_eq!(
            decoder.decode(&MidiMessage::NoteOn { channel: 0, note: 99, velocity: 64 }),
            Ok(Decoded::Event(InputEvent::ButtonDown(InputAddress::pad(63))))
        );
        assert_eq!(
            decoder.decode(&MidiMessage::NoteOff { channel: 0, note: 10, velocity: 0 }),
            Ok(Decoded::Event(InputEvent::ButtonUp(InputAddress::button(0x8A))))
        );
        assert_eq!(
            decoder.decode(&MidiMessage::ControlChange { channel: 0, cc: 71, value: 0x7F }),
            Ok(Decoded::Event(InputEvent::EncoderDelta { address: InputAddress::encoder(0), delta: -1 }))
        );
        assert_eq!(
            decoder.decode(&MidiMessage::ControlChange { channel: 0, cc: 15, value: 0x02 }),
            Ok(Decoded::Event(InputEvent::EncoderDelta { address: InputAddress::encoder(10), delta: 2 }))
        );
        assert_eq!(
            decoder.decode(&MidiMessage::ControlChange { channel: 0, cc: 85, value: 0 }),
            Ok(Decoded::Event(InputEvent::ButtonUp(InputAddress::button(85))))
        );
        assert_eq!(decoder.decode(&MidiMessage::ChannelPressure { channel: 0, pressure: 40 }), Ok(Decoded::Nothing));
        assert!(decoder.decode(&MidiMessage::NoteOn { channel: 0, note: 20, velocity: 1 }).is_err());
    }

    #[test]
    fn test_identity_reply() {
        let mut decoder = decoder();
        let data = vec![0x7E, 0x00, 0x06, 0x02, 0x47, 0x15, 0x00, 0x19, 0x00, 0x01, 0x02, 0x00, 0x00];
        assert!(matches!(
            decoder.decode(&MidiMessage::SysEx { data }),
            Ok(Decoded::Reply(DeviceReply::Identity { family: 0x15, .. }))
        ));
    }
}
