//! surfacelink - protocol translation and state-diff engine for MIDI
//! control surfaces.
//!
//! Application code writes logical outputs (button LEDs, faders, knob rings,
//! pads, text cells) to a [`surface::Surface`] and receives normalized
//! [`surface::InputEvent`]s back. Each surface caches what it last sent and
//! only writes what changed, in the wire format of its protocol family.

pub mod chain;
pub mod codec;
pub mod config;
pub mod echo;
pub mod midi;
pub mod protocol;
pub mod sniffer;
pub mod surface;
pub mod transport;
