//! Surface engine
//!
//! A [`Surface`] owns everything one physical unit needs: the framer/decoder
//! pair for its protocol family, the output state cache, the blink scheduler,
//! inbound stream reassembly and the transport. UI logic talks to it through
//! abstract addresses only.
//!
//! Every write goes through the same path: the cache decides whether the
//! request is new, the framer turns the resulting wire state into packets, and
//! the cache records what reached the device. Blink flips, reconfirmations and
//! re-attach flushes all reuse that path.

pub mod address;
pub mod blink;
pub mod cache;
pub mod event;
pub mod scheduler;


use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub use address::{OutputAddress, OutputKind, OutputState, WireBlink, WireState};
pub use blink::{BlinkRate, BlinkScheduler, BlinkTiming};
pub use cache::{Diff, OutputStateCache};
pub use event::{InputAddress, InputEvent, InputKind};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};

use crate::midi::{format_hex, MidiMessage, MidiStream};
use crate::protocol::{
    self, BlinkStrategy, DecodeError, Decoded, DeviceReply, FrameError, InputDecoder, Packet, ProtocolFamily,
    ProtocolFramer, ProtocolOptions, TextAddressing,
};
use crate::transport::TransportSink;

/// Errors returned to UI logic
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("{address} does not exist on surface '{surface}'")]
    UnmappedOutput { surface: String, address: OutputAddress },
    #[error("text cell {cell} does not exist on surface '{surface}'")]
    UnmappedText { surface: String, cell: u16 },
    #[error("surface '{surface}' does not support {what}")]
    Unsupported { surface: String, what: &'static str },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Runtime tunables of a surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    /// Output kinds whose writes are repeated once after `reconfirm_delay`
    pub reconfirm_kinds: Vec<OutputKind>,
    pub reconfirm_delay: Duration,
    pub blink: BlinkTiming,
    /// `None` disables long-press detection
    pub long_press: Option<Duration>,
    /// `None` disables keepalive pings
    pub keepalive: Option<Duration>,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            reconfirm_kinds: vec![OutputKind::KnobRing],
            reconfirm_delay: Duration::from_millis(120),
            blink: BlinkTiming::default(),
            long_press: Some(Duration::from_millis(500)),
            keepalive: Some(Duration::from_millis(1000)),
        }
    }
}

type Listener = Box<dyn FnMut(&InputEvent)>;

/// One physical control surface
pub struct Surface {
    name: String,
    framer: Box<dyn ProtocolFramer>,
    decoder: Box<dyn InputDecoder>,
    sink: Box<dyn TransportSink>,
    scheduler: Box<dyn Scheduler>,
    cache: OutputStateCache,
    blink: BlinkScheduler,
    stream: MidiStream,
    options: SurfaceOptions,
    attached: bool,
    keepalive_pending: bool,
    /// Buttons currently held, with their press number
    held: HashMap<InputAddress, u64>,
    presses: u64,
    listeners: Vec<Listener>,
    firmware: Option<String>,
}

impl Surface {
    pub fn new(
        name: impl Into<String>,
        framer: Box<dyn ProtocolFramer>,
        decoder: Box<dyn InputDecoder>,
        sink: Box<dyn TransportSink>,
        scheduler: Box<dyn Scheduler>,
        options: SurfaceOptions,
    ) -> Self {
        Self {
            name: name.into(),
            framer,
            decoder,
            sink,
            scheduler,
            cache: OutputStateCache::new(),
            blink: BlinkScheduler::new(options.blink),
            stream: MidiStream::new(),
            options,
            attached: false,
            keepalive_pending: false,
            held: HashMap::new(),
            presses: 0,
            listeners: Vec::new(),
            firmware: None,
        }
    }

    /// Build a surface for a protocol family
    pub fn from_family(
        name: impl Into<String>,
        family: ProtocolFamily,
        protocol_options: &ProtocolOptions,
        sink: Box<dyn TransportSink>,
        scheduler: Box<dyn Scheduler>,
        options: SurfaceOptions,
    ) -> Self {
        let (framer, decoder) = protocol::build(family, protocol_options);
        Self::new(name, framer, decoder, sink, scheduler, options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> ProtocolFamily {
        self.framer.family()
    }

    /// Global indices this unit occupies when chained
    pub fn span(&self) -> u16 {
        self.framer.family().span()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Firmware version reported by the device, if it answered
    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    pub fn cache(&self) -> &OutputStateCache {
        &self.cache
    }

    pub fn options(&self) -> &SurfaceOptions {
        &self.options
    }

    pub fn supports(&self, address: &OutputAddress) -> bool {
        self.framer.supports(address)
    }

    /// Register a callback for every decoded input event
    pub fn on_input_event(&mut self, listener: impl FnMut(&InputEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Apply new timing; takes effect from the next scheduled task
    pub fn update_options(&mut self, options: SurfaceOptions) {
        self.blink.set_timing(options.blink);
        self.options = options;
        self.arm_keepalive();
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Handshake, then push the whole cache to the device
    pub fn attach(&mut self) {
        if self.attached {
            return;
        }
        self.attached = true;
        info!("Attaching surface '{}' ({})", self.name, self.framer.family());

        let handshake = self.framer.handshake();
        if !handshake.is_empty() && !self.send_all(&handshake) {
            debug!("Surface '{}': handshake not sent", self.name);
        }
        self.force_flush_all();
        self.arm_blink();
        self.arm_keepalive();
    }

    /// Stop all traffic. Tasks still in flight become no-ops.
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.decoder.reset();
        self.stream.reset();
        self.blink.disarm();
        self.held.clear();
        self.cache.forget_sent();
        info!("Detached surface '{}'", self.name);
    }

    /// Detach and release the output port. The surface stays silent after
    /// this, even if attached again.
    pub fn close(&mut self) {
        self.detach();
        self.sink.close();
    }

    // ---------------------------------------------------------------------
    // Outputs
    // ---------------------------------------------------------------------

    /// Set an output, optionally blinking between `value` and `blink_color`
    pub fn set_output(
        &mut self,
        address: OutputAddress,
        value: i32,
        blink_color: Option<i32>,
        blink_fast: bool,
    ) -> Result<(), SurfaceError> {
        self.request_write(address, OutputState { value, blink_color, blink_fast })
    }

    /// Record a requested state and write it if it differs from the cache
    pub fn request_write(&mut self, address: OutputAddress, state: OutputState) -> Result<(), SurfaceError> {
        if !self.framer.supports(&address) {
            return Err(SurfaceError::UnmappedOutput { surface: self.name.clone(), address });
        }
        if self.cache.request(address, state) == Diff::Unchanged {
            trace!("{} unchanged on '{}'", address, self.name);
            return Ok(());
        }

        self.update_blink(address, &state);
        // A changed request is written once even if the wire already shows it
        self.write_current(address, true);

        if self.attached && self.options.reconfirm_kinds.contains(&address.kind) {
            self.scheduler
                .schedule_once(self.options.reconfirm_delay, ScheduledTask::Reconfirm { address, expected: state });
        }
        Ok(())
    }

    /// Write `text` into `width` cells starting at `first_cell`, padded or
    /// truncated to the field width. Only changed cells reach the wire.
    pub fn set_text(&mut self, first_cell: u16, width: u16, text: &str) -> Result<(), SurfaceError> {
        let cells: Vec<u16> = (0..width)
            .map(|offset| first_cell.checked_add(offset))
            .collect::<Option<_>>()
            .ok_or_else(|| SurfaceError::UnmappedText { surface: self.name.clone(), cell: first_cell })?;
        if let Some(&cell) = cells.iter().find(|&&cell| self.framer.text_addressing(cell).is_none()) {
            return Err(SurfaceError::UnmappedText { surface: self.name.clone(), cell });
        }

        let mut chars = text.chars();
        let mut changed = Vec::new();
        for cell in cells {
            let glyph = match chars.next() {
                Some(ch) => self.framer.glyph(cell, ch),
                None => self.framer.blank_glyph(cell),
            };
            let address = OutputAddress::text_cell(cell);
            if self.cache.request(address, OutputState::steady(glyph as i32)) != Diff::Unchanged {
                self.blink.stop(&address);
                changed.push(cell);
            }
        }

        self.write_text_cells(changed, true);
        Ok(())
    }

    /// Show `count` dashes in a segment cell
    pub fn set_dash_meter(&mut self, cell: u16, count: u8) -> Result<(), SurfaceError> {
        let glyph = self
            .framer
            .dash_glyph(cell, count)
            .ok_or_else(|| SurfaceError::Unsupported { surface: self.name.clone(), what: "dash meters on this cell" })?;
        self.request_write(OutputAddress::text_cell(cell), OutputState::steady(glyph as i32))
    }

    /// Resend the requested state of one address, bypassing dedup
    pub fn force_flush(&mut self, address: OutputAddress) -> Result<(), SurfaceError> {
        if !self.framer.supports(&address) {
            return Err(SurfaceError::UnmappedOutput { surface: self.name.clone(), address });
        }
        if address.kind == OutputKind::TextCell {
            self.write_text_cells(vec![address.index], true);
        } else {
            self.write_current(address, true);
        }
        Ok(())
    }

    /// Resend every cached address
    pub fn force_flush_all(&mut self) {
        let (text, other): (Vec<_>, Vec<_>) =
            self.cache.addresses().into_iter().partition(|a| a.kind == OutputKind::TextCell);
        debug!("Surface '{}': flushing {} outputs", self.name, text.len() + other.len());
        for address in other {
            self.write_current(address, true);
        }
        self.write_text_cells(text.into_iter().map(|a| a.index).collect(), true);
    }

    fn update_blink(&mut self, address: OutputAddress, state: &OutputState) {
        if self.framer.blink_strategy(address.kind) != BlinkStrategy::Timer {
            return;
        }
        if state.is_blinking() {
            self.blink.start(address, BlinkRate::from_fast(state.blink_fast));
            self.arm_blink();
        } else if self.blink.stop(&address) {
            trace!("{} stopped blinking", address);
        }
    }

    /// What the device should show right now for `address`
    fn wire_state(&self, address: &OutputAddress) -> Option<WireState> {
        let state = self.cache.desired(address)?;
        Some(match self.framer.blink_strategy(address.kind) {
            BlinkStrategy::Wire => WireState {
                value: state.value,
                blink: state.blink_color.map(|color| WireBlink { color, fast: state.blink_fast }),
            },
            BlinkStrategy::Timer => {
                WireState::steady(state.displayed(self.blink.phase(address).unwrap_or(false)))
            }
        })
    }

    fn write_current(&mut self, address: OutputAddress, force: bool) {
        if address.kind == OutputKind::TextCell {
            self.write_text_cells(vec![address.index], force);
            return;
        }
        let Some(wire) = self.wire_state(&address) else {
            return;
        };
        if !force && !self.cache.needs_send(&address, &wire) {
            trace!("{} already shown on '{}'", address, self.name);
            return;
        }

        match self.framer.encode_output(&address, &wire) {
            Ok(packets) => {
                if self.send_all(&packets) {
                    self.cache.mark_sent(address, wire);
                } else {
                    self.cache.mark_unsent(&address);
                }
            }
            Err(e) => warn!("Surface '{}': {}", self.name, e),
        }
    }

    /// Write text cells, grouped the way the protocol addresses them
    fn write_text_cells(&mut self, mut cells: Vec<u16>, force: bool) {
        cells.sort_unstable();
        cells.dedup();
        cells.retain(|&cell| {
            let address = OutputAddress::text_cell(cell);
            match self.wire_state(&address) {
                Some(wire) => force || self.cache.needs_send(&address, &wire),
                None => false,
            }
        });
        if cells.is_empty() {
            return;
        }

        // Inclusive (first, last) runs
        let mut runs: Vec<(u16, u16, TextAddressing)> = Vec::new();
        for cell in cells {
            match self.framer.text_addressing(cell) {
                Some(TextAddressing::Cell) => runs.push((cell, cell, TextAddressing::Cell)),
                Some(TextAddressing::Span) => match runs.last_mut() {
                    Some((_, last, TextAddressing::Span)) => *last = cell,
                    _ => runs.push((cell, cell, TextAddressing::Span)),
                },
                Some(block @ TextAddressing::Block { start, len }) => match runs.last() {
                    Some(&(first, _, _)) if first == start => {}
                    _ => runs.push((start, start + len - 1, block)),
                },
                None => warn!("Surface '{}': no text mapping for cell {}", self.name, cell),
            }
        }

        for (first, last, _) in runs {
            self.write_text_run(first, last);
        }
    }

    fn write_text_run(&mut self, first: u16, last: u16) {
        let glyphs: Vec<u8> = (first..=last)
            .map(|cell| match self.wire_state(&OutputAddress::text_cell(cell)) {
                Some(wire) => wire.value.clamp(0, 0xFF) as u8,
                None => self.framer.blank_glyph(cell),
            })
            .collect();

        let packets = match self.framer.encode_text(first, &glyphs) {
            Ok(packets) => packets,
            Err(e) => {
                warn!("Surface '{}': {}", self.name, e);
                return;
            }
        };
        let sent = self.send_all(&packets);
        for (cell, glyph) in (first..=last).zip(glyphs) {
            let address = OutputAddress::text_cell(cell);
            if sent {
                self.cache.mark_sent(address, WireState::steady(glyph as i32));
            } else {
                self.cache.mark_unsent(&address);
            }
        }
    }

    /// Hand packets to the transport. False if anything could not be sent.
    fn send_all(&mut self, packets: &[Packet]) -> bool {
        if !self.attached {
            debug!("Surface '{}' detached, write deferred", self.name);
            return false;
        }
        if !self.sink.is_connected() {
            debug!("Surface '{}' not connected, write deferred", self.name);
            return false;
        }
        for packet in packets {
            let result = match packet {
                Packet::Value(bytes) => self.sink.send_value_message(bytes),
                Packet::Framed(bytes) => self.sink.send_framed_message(bytes),
            };
            if let Err(e) = result {
                debug!("Surface '{}': write failed: {}", self.name, e);
                return false;
            }
            trace!("{} <- {}", self.name, format_hex(packet.bytes()));
        }
        true
    }

    // ---------------------------------------------------------------------
    // Inputs
    // ---------------------------------------------------------------------

    /// Feed raw bytes from the transport; returns the decoded events
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<InputEvent> {
        let mut events = Vec::new();
        for raw in self.stream.push(bytes) {
            let Some(message) = MidiMessage::parse(&raw) else {
                warn!("Surface '{}': {}", self.name, DecodeError::Unparseable { raw });
                continue;
            };
            match self.decoder.decode(&message) {
                Ok(Decoded::Nothing) => {}
                Ok(Decoded::Event(event)) => {
                    trace!("{} -> {}", self.name, event);
                    self.track_press(&event);
                    events.push(event);
                }
                Ok(Decoded::Reply(reply)) => self.handle_reply(reply),
                Err(e) => warn!("Surface '{}' (zone {:?}): {}", self.name, self.decoder.zone(), e),
            }
        }
        self.notify(&events);
        events
    }

    fn track_press(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::ButtonDown(address) => {
                self.presses += 1;
                let press = self.presses;
                self.held.insert(address, press);
                if let (true, Some(delay)) = (self.attached, self.options.long_press) {
                    self.scheduler.schedule_once(delay, ScheduledTask::LongPress { address, press });
                }
            }
            InputEvent::ButtonUp(address) => {
                self.held.remove(&address);
            }
            _ => {}
        }
    }

    fn handle_reply(&mut self, reply: DeviceReply) {
        match &reply {
            DeviceReply::Ping => trace!("Surface '{}': ping", self.name),
            DeviceReply::Version(version) => {
                info!("Surface '{}': firmware {}", self.name, version);
                self.firmware = Some(version.clone());
            }
            DeviceReply::HostConnectionQuery { serial, .. } => {
                info!("Surface '{}': connection query from {}", self.name, String::from_utf8_lossy(serial));
            }
            DeviceReply::ConnectionConfirmed { .. } => info!("Surface '{}': connection confirmed", self.name),
            DeviceReply::Identity { manufacturer, family, model, version } => info!(
                "Surface '{}': identity {} family {:04X} model {:04X} version {}",
                self.name,
                format_hex(manufacturer),
                family,
                model,
                format_hex(version)
            ),
        }

        let answer = self.framer.respond(&reply);
        if !answer.is_empty() && !self.send_all(&answer) {
            debug!("Surface '{}': reply not answered", self.name);
        }
    }

    fn notify(&mut self, events: &[InputEvent]) {
        for listener in self.listeners.iter_mut() {
            events.iter().for_each(|e| listener(e));
        }
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Run a task posted earlier through the scheduler
    pub fn on_timer(&mut self, task: ScheduledTask) -> Vec<InputEvent> {
        match task {
            ScheduledTask::Reconfirm { address, expected } => {
                if self.attached && self.cache.is_current(&address, &expected) {
                    trace!("Reconfirming {} on '{}'", address, self.name);
                    self.write_current(address, true);
                }
                Vec::new()
            }
            ScheduledTask::BlinkTick { generation } => {
                if !self.blink.accept_tick(generation) || !self.attached {
                    return Vec::new();
                }
                let (text, other): (Vec<_>, Vec<_>) =
                    self.blink.tick().into_iter().map(|(a, _)| a).partition(|a| a.kind == OutputKind::TextCell);
                for address in other {
                    self.write_current(address, false);
                }
                self.write_text_cells(text.into_iter().map(|a| a.index).collect(), false);
                self.arm_blink();
                Vec::new()
            }
            ScheduledTask::LongPress { address, press } => {
                if !self.attached || self.held.get(&address) != Some(&press) {
                    return Vec::new();
                }
                let events = vec![InputEvent::ButtonLongPress(address)];
                self.notify(&events);
                events
            }
            ScheduledTask::Keepalive => {
                self.keepalive_pending = false;
                if !self.attached {
                    return Vec::new();
                }
                if let Some(ping) = self.framer.keepalive() {
                    self.send_all(&[ping]);
                }
                self.arm_keepalive();
                Vec::new()
            }
        }
    }

    fn arm_blink(&mut self) {
        if self.attached && self.blink.needs_arm() {
            let generation = self.blink.arm();
            self.scheduler.schedule_once(self.blink.timing().tick, ScheduledTask::BlinkTick { generation });
        }
    }

    fn arm_keepalive(&mut self) {
        if !self.attached || self.keepalive_pending || self.framer.keepalive().is_none() {
            return;
        }
        if let Some(period) = self.options.keepalive {
            self.keepalive_pending = true;
            self.scheduler.schedule_once(period, ScheduledTask::Keepalive);
        }
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("name", &self.name)
            .field("family", &self.framer.family())
            .field("attached", &self.attached)
            .field("outputs", &self.cache.len())
            .field("blinking", &self.blink.len())
            .finish()
    }
}
