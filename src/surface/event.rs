//! Normalized input events

use std::fmt;

/// What kind of physical control produced an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputKind {
    Button,
    Pad,
    Encoder,
    Fader,
}

/// One physical control of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputAddress {
    pub kind: InputKind,
    pub index: u16,
}

impl InputAddress {
    pub const fn new(kind: InputKind, index: u16) -> Self {
        Self { kind, index }
    }

    pub const fn button(index: u16) -> Self {
        Self::new(InputKind::Button, index)
    }

    pub const fn pad(index: u16) -> Self {
        Self::new(InputKind::Pad, index)
    }

    pub const fn encoder(index: u16) -> Self {
        Self::new(InputKind::Encoder, index)
    }

    pub const fn fader(index: u16) -> Self {
        Self::new(InputKind::Fader, index)
    }
}

impl fmt::Display for InputAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            InputKind::Button => "button",
            InputKind::Pad => "pad",
            InputKind::Encoder => "encoder",
            InputKind::Fader => "fader",
        };
        write!(f, "{}#{}", kind, self.index)
    }
}

/// Normalized event delivered to UI logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    ButtonDown(InputAddress),
    ButtonUp(InputAddress),
    ButtonLongPress(InputAddress),
    /// Signed ticks moved since the last report
    EncoderDelta { address: InputAddress, delta: i32 },
    AbsoluteValue { address: InputAddress, value: u16 },
}

impl InputEvent {
    pub fn address(&self) -> InputAddress {
        match *self {
            InputEvent::ButtonDown(address)
            | InputEvent::ButtonUp(address)
            | InputEvent::ButtonLongPress(address)
            | InputEvent::EncoderDelta { address, .. }
            | InputEvent::AbsoluteValue { address, .. } => address,
        }
    }

    /// Same event with its index shifted by a unit offset
    pub fn offset(self, by: u16) -> Self {
        let shift = |a: InputAddress| InputAddress::new(a.kind, a.index.saturating_add(by));
        match self {
            InputEvent::ButtonDown(a) => InputEvent::ButtonDown(shift(a)),
            InputEvent::ButtonUp(a) => InputEvent::ButtonUp(shift(a)),
            InputEvent::ButtonLongPress(a) => InputEvent::ButtonLongPress(shift(a)),
            InputEvent::EncoderDelta { address, delta } => {
                InputEvent::EncoderDelta { address: shift(address), delta }
            }
            InputEvent::AbsoluteValue { address, value } => {
                InputEvent::AbsoluteValue { address: shift(address), value }
            }
        }
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputEvent::ButtonDown(a) => write!(f, "{} down", a),
            InputEvent::ButtonUp(a) => write!(f, "{} up", a),
            InputEvent::ButtonLongPress(a) => write!(f, "{} long-press", a),
            InputEvent::EncoderDelta { address, delta } => write!(f, "{} {:+}", address, delta),
            InputEvent::AbsoluteValue { address, value } => write!(f, "{} = {}", address, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_keeps_payload() {
        let event = InputEvent::EncoderDelta { address: InputAddress::encoder(2), delta: -3 };
        assert_eq!(
            event.offset(8),
            InputEvent::EncoderDelta { address: InputAddress::encoder(10), delta: -3 }
        );
        assert_eq!(event.to_string(), "encoder#2 -3");
    }
}
