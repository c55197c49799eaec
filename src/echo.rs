//! Local feedback mapper
//!
//! Turns input events straight into outputs so a surface can be exercised
//! without a host: buttons and pads toggle their LEDs, a long press toggles
//! blinking, encoders move their rings and faders are sent back to their
//! motors. The last event is shown in a status text field.

use std::collections::HashMap;

use tracing::debug;

use crate::chain::ExtendedSurface;
use crate::protocol::ProtocolFamily;
use crate::surface::{InputAddress, InputEvent, InputKind, OutputAddress, OutputKind};

/// Palette index used for lit pads
const PAD_COLOR: i32 = 21;
const RING_MAX: i32 = 0x7F;

/// Text field `(first_cell, width)` used for status on a family's display
pub fn status_field(family: ProtocolFamily) -> (u16, u16) {
    match family {
        ProtocolFamily::Mcu => (0, 56),
        // First four LCD zones
        ProtocolFamily::Hui => (32, 40),
        ProtocolFamily::Pad => (0, 68),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Led {
    lit: bool,
    blinking: bool,
}

#[derive(Debug, Default)]
pub struct EchoMapper {
    leds: HashMap<OutputAddress, Led>,
    rings: HashMap<u16, i32>,
    status: Option<(u16, u16)>,
}

impl EchoMapper {
    pub fn new(status: Option<(u16, u16)>) -> Self {
        Self { status, ..Self::default() }
    }

    fn led_address(input: InputAddress) -> Option<OutputAddress> {
        match input.kind {
            InputKind::Button => Some(OutputAddress::button(input.index)),
            InputKind::Pad => Some(OutputAddress::pad(input.index)),
            InputKind::Encoder | InputKind::Fader => None,
        }
    }

    fn show_led(&self, chain: &mut ExtendedSurface, address: OutputAddress) {
        let led = self.leds.get(&address).copied().unwrap_or_default();
        let on = if address.kind == OutputKind::Pad { PAD_COLOR } else { 1 };
        let value = if led.lit { on } else { 0 };
        let blink = led.blinking.then(|| if led.lit { 0 } else { on });
        if let Err(e) = chain.set_output(address, value, blink, false) {
            debug!("Echo: {}", e);
        }
    }

    /// React to one event
    pub fn apply(&mut self, event: &InputEvent, chain: &mut ExtendedSurface) {
        match *event {
            InputEvent::ButtonDown(input) => {
                if let Some(address) = Self::led_address(input) {
                    let led = self.leds.entry(address).or_default();
                    led.lit = !led.lit;
                    self.show_led(chain, address);
                }
            }
            InputEvent::ButtonLongPress(input) => {
                if let Some(address) = Self::led_address(input) {
                    let led = self.leds.entry(address).or_default();
                    led.blinking = !led.blinking;
                    // The press already toggled the LED; undo that
                    led.lit = !led.lit;
                    self.show_led(chain, address);
                }
            }
            InputEvent::ButtonUp(_) => {}
            InputEvent::EncoderDelta { address, delta } => {
                let ring = self.rings.entry(address.index).or_insert(0);
                *ring = (*ring + delta).clamp(0, RING_MAX);
                if let Err(e) = chain.set_output(OutputAddress::knob_ring(address.index), *ring, None, false) {
                    debug!("Echo: {}", e);
                }
            }
            InputEvent::AbsoluteValue { address, value } => {
                if let Err(e) = chain.set_output(OutputAddress::fader(address.index), value as i32, None, false) {
                    debug!("Echo: {}", e);
                }
            }
        }

        if let Some((first, width)) = self.status {
            if let Err(e) = chain.set_text(first, width, &event.to_string()) {
                debug!("Echo: {}", e);
            }
        }
    }
}
