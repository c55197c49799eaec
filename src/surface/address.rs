//! Output addressing and output state

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of physical output an address points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Button,
    Pad,
    KnobRing,
    Fader,
    TextCell,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputKind::Button => "button",
            OutputKind::Pad => "pad",
            OutputKind::KnobRing => "knob_ring",
            OutputKind::Fader => "fader",
            OutputKind::TextCell => "text_cell",
        };
        f.write_str(name)
    }
}

/// One physical output of a surface; `(kind, index)` is unique per surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputAddress {
    pub kind: OutputKind,
    pub index: u16,
}

impl OutputAddress {
    pub const fn new(kind: OutputKind, index: u16) -> Self {
        Self { kind, index }
    }

    pub const fn button(index: u16) -> Self {
        Self::new(OutputKind::Button, index)
    }

    pub const fn pad(index: u16) -> Self {
        Self::new(OutputKind::Pad, index)
    }

    pub const fn knob_ring(index: u16) -> Self {
        Self::new(OutputKind::KnobRing, index)
    }

    pub const fn fader(index: u16) -> Self {
        Self::new(OutputKind::Fader, index)
    }

    pub const fn text_cell(index: u16) -> Self {
        Self::new(OutputKind::TextCell, index)
    }
}

impl fmt::Display for OutputAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.index)
    }
}

/// Requested state of an output.
///
/// With `blink_color` set the output alternates between `value` and
/// `blink_color`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputState {
    pub value: i32,
    pub blink_color: Option<i32>,
    pub blink_fast: bool,
}

impl OutputState {
    pub const fn steady(value: i32) -> Self {
        Self { value, blink_color: None, blink_fast: false }
    }

    pub const fn blinking(value: i32, blink_color: i32, fast: bool) -> Self {
        Self { value, blink_color: Some(blink_color), blink_fast: fast }
    }

    pub fn is_blinking(&self) -> bool {
        self.blink_color.is_some()
    }

    /// Value visible in the given blink phase
    pub fn displayed(&self, phase: bool) -> i32 {
        match (phase, self.blink_color) {
            (true, Some(color)) => color,
            _ => self.value,
        }
    }
}

/// Blink carried inside the wire message itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireBlink {
    pub color: i32,
    pub fast: bool,
}

/// What has actually been put on the wire for an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireState {
    pub value: i32,
    pub blink: Option<WireBlink>,
}

impl WireState {
    pub const fn steady(value: i32) -> Self {
        Self { value, blink: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_displayed_follows_phase() {
        let state = OutputState::blinking(5, 9, true);
        assert_eq!(state.displayed(false), 5);
        assert_eq!(state.displayed(true), 9);
        assert_eq!(OutputState::steady(5).displayed(true), 5);
    }

    #[test]
    fn test_addresses_order_by_kind_then_index() {
        let mut addrs = vec![OutputAddress::fader(1), OutputAddress::button(9), OutputAddress::button(2)];
        addrs.sort();
        assert_eq!(addrs, vec![OutputAddress::button(2), OutputAddress::button(9), OutputAddress::fader(1)]);
        assert_eq!(OutputAddress::knob_ring(3).to_string(), "knob_ring#3");
    }
}
