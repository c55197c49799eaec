//! Chained units
//!
//! Several physical units (a main unit plus extenders) act as one logical
//! surface. Each unit is an independent [`Surface`] with its own cache, zone
//! and blink state; the chain only maps global indices to units and back.
//!
//! Each unit occupies `index_offset .. index_offset + span` for every kind,
//! where the span is fixed by its protocol family. Ranges may not overlap, so
//! a global index names exactly one control on one unit. Events coming back
//! from a unit are shifted up by its offset.

use thiserror::Error;
use tracing::debug;

use crate::surface::{InputEvent, OutputAddress, ScheduledTask, Surface, SurfaceError, SurfaceOptions};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("index offset {0} is already used by another unit")]
    DuplicateOffset(u16),
    #[error("unit at offset {offset} (span {span}) overlaps the unit at offset {other}")]
    Overlap { offset: u16, span: u16, other: u16 },
    #[error("unit at offset {offset} (span {span}) runs past the last index")]
    OutOfRange { offset: u16, span: u16 },
}

struct Unit {
    offset: u16,
    span: u16,
    surface: Surface,
}

impl Unit {
    fn end(&self) -> u32 {
        self.offset as u32 + self.span as u32
    }
}

/// Check that a unit at `offset` covering `span` indices fits beside `others`
pub fn check_range(offset: u16, span: u16, others: impl IntoIterator<Item = (u16, u16)>) -> Result<(), ChainError> {
    let end = offset as u32 + span as u32;
    if end > u16::MAX as u32 + 1 {
        return Err(ChainError::OutOfRange { offset, span });
    }
    for (other, other_span) in others {
        if other == offset {
            return Err(ChainError::DuplicateOffset(offset));
        }
        if (offset as u32) < other as u32 + other_span as u32 && (other as u32) < end {
            return Err(ChainError::Overlap { offset, span, other });
        }
    }
    Ok(())
}

type Listener = Box<dyn FnMut(&InputEvent)>;

/// Units chained into one logical surface
#[derive(Default)]
pub struct ExtendedSurface {
    /// Ordered by offset
    units: Vec<Unit>,
    /// Unit numbers handed out by `push`, in push order
    order: Vec<u16>,
    listeners: Vec<Listener>,
}

impl ExtendedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit; returns its unit number (push order)
    pub fn push(&mut self, offset: u16, surface: Surface) -> Result<usize, ChainError> {
        let span = surface.span();
        check_range(offset, span, self.units.iter().map(|u| (u.offset, u.span)))?;
        let at = self.units.partition_point(|u| u.offset < offset);
        self.units.insert(at, Unit { offset, span, surface });
        self.order.push(offset);
        Ok(self.order.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn position(&self, unit: usize) -> Option<usize> {
        let offset = *self.order.get(unit)?;
        self.units.iter().position(|u| u.offset == offset)
    }

    /// Unit by the number `push` returned
    pub fn unit(&self, unit: usize) -> Option<&Surface> {
        self.position(unit).map(|i| &self.units[i].surface)
    }

    pub fn unit_mut(&mut self, unit: usize) -> Option<&mut Surface> {
        self.position(unit).map(move |i| &mut self.units[i].surface)
    }

    pub fn offset_of(&self, unit: usize) -> Option<u16> {
        self.order.get(unit).copied()
    }

    /// Unit position and local address for a global address
    fn route(&self, address: &OutputAddress) -> Option<(usize, OutputAddress)> {
        let at = self.units.partition_point(|u| u.offset <= address.index).checked_sub(1)?;
        if address.index as u32 >= self.units[at].end() {
            return None;
        }
        let local = OutputAddress::new(address.kind, address.index - self.units[at].offset);
        Some((at, local))
    }

    fn unrouted(address: OutputAddress) -> SurfaceError {
        SurfaceError::UnmappedOutput { surface: "chain".into(), address }
    }

    pub fn set_output(
        &mut self,
        address: OutputAddress,
        value: i32,
        blink_color: Option<i32>,
        blink_fast: bool,
    ) -> Result<(), SurfaceError> {
        let (at, local) = self.route(&address).ok_or_else(|| Self::unrouted(address))?;
        self.units[at].surface.set_output(local, value, blink_color, blink_fast)
    }

    /// Text fields must lie within one unit's range
    pub fn set_text(&mut self, first_cell: u16, width: u16, text: &str) -> Result<(), SurfaceError> {
        let address = OutputAddress::text_cell(first_cell);
        let (at, local) = self.route(&address).ok_or_else(|| Self::unrouted(address))?;
        self.units[at].surface.set_text(local.index, width, text)
    }

    pub fn set_dash_meter(&mut self, cell: u16, count: u8) -> Result<(), SurfaceError> {
        let address = OutputAddress::text_cell(cell);
        let (at, local) = self.route(&address).ok_or_else(|| Self::unrouted(address))?;
        self.units[at].surface.set_dash_meter(local.index, count)
    }

    pub fn force_flush(&mut self, address: OutputAddress) -> Result<(), SurfaceError> {
        let (at, local) = self.route(&address).ok_or_else(|| Self::unrouted(address))?;
        self.units[at].surface.force_flush(local)
    }

    pub fn force_flush_all(&mut self) {
        self.units.iter_mut().for_each(|u| u.surface.force_flush_all());
    }

    pub fn attach_all(&mut self) {
        self.units.iter_mut().for_each(|u| u.surface.attach());
    }

    pub fn detach_all(&mut self) {
        self.units.iter_mut().for_each(|u| u.surface.detach());
    }

    /// Detach every unit and close its output port
    pub fn close_all(&mut self) {
        self.units.iter_mut().for_each(|u| u.surface.close());
    }

    pub fn update_options(&mut self, options: &SurfaceOptions) {
        self.units.iter_mut().for_each(|u| u.surface.update_options(options.clone()));
    }

    pub fn on_input_event(&mut self, listener: impl FnMut(&InputEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Raw bytes from one unit; events come back in global indices
    pub fn receive(&mut self, unit: usize, bytes: &[u8]) -> Vec<InputEvent> {
        let Some(at) = self.position(unit) else {
            debug!("Input for unknown unit {}", unit);
            return Vec::new();
        };
        let offset = self.units[at].offset;
        let events: Vec<_> = self.units[at].surface.receive(bytes).into_iter().map(|e| e.offset(offset)).collect();
        self.notify(&events);
        events
    }

    /// A task one unit scheduled has fired
    pub fn on_timer(&mut self, unit: usize, task: ScheduledTask) -> Vec<InputEvent> {
        let Some(at) = self.position(unit) else {
            return Vec::new();
        };
        let offset = self.units[at].offset;
        let events: Vec<_> = self.units[at].surface.on_timer(task).into_iter().map(|e| e.offset(offset)).collect();
        self.notify(&events);
        events
    }

    fn notify(&mut self, events: &[InputEvent]) {
        for listener in self.listeners.iter_mut() {
            events.iter().for_each(|e| listener(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ProtocolFamily, ProtocolOptions};
    use crate::surface::{InputAddress, ManualScheduler};
    use crate::transport::MemorySink;

    fn unit(family: ProtocolFamily, extender: bool) -> (Surface, MemorySink) {
        let sink = MemorySink::new();
        let options = ProtocolOptions { extender, ..ProtocolOptions::for_family(family) };
        let surface = Surface::from_family(
            if extender { "ext" } else { "main" },
            family,
            &options,
            Box::new(sink.clone()),
            Box::new(ManualScheduler::new()),
            SurfaceOptions { keepalive: None, ..SurfaceOptions::default() },
        );
        (surface, sink)
    }

    fn chain() -> (ExtendedSurface, MemorySink, MemorySink) {
        let mut chain = ExtendedSurface::new();
        let (main, main_sink) = unit(ProtocolFamily::Mcu, false);
        let (ext, ext_sink) = unit(ProtocolFamily::Mcu, true);
        assert_eq!(chain.push(0, main), Ok(0));
        assert_eq!(chain.push(128, ext), Ok(1));
        chain.attach_all();
        main_sink.clear();
        ext_sink.clear();
        (chain, main_sink, ext_sink)
    }

    #[test]
    fn test_outputs_route_by_offset() {
        let (mut chain, main_sink, ext_sink) = chain();
        chain.set_output(OutputAddress::knob_ring(3), 7, None, false).unwrap();
        chain.set_output(OutputAddress::knob_ring(130), 7, None, false).unwrap();

        assert_eq!(main_sink.take(), vec![vec![0xB0, 0x33, 0x07]]);
        assert_eq!(ext_sink.take(), vec![vec![0xB0, 0x32, 0x07]]);
    }

    #[test]
    fn test_unit_range_errors_stay_local() {
        let (mut chain, _, _) = chain();
        // Extender has 8 rings: global 136 is local 8
        assert!(matches!(
            chain.set_output(OutputAddress::knob_ring(136), 1, None, false),
            Err(SurfaceError::UnmappedOutput { .. })
        ));
    }

    #[test]
    fn test_events_shift_by_unit_offset() {
        let (mut chain, _, _) = chain();
        let events = chain.receive(1, &[0xE1, 0x00, 0x40]);
        assert_eq!(events, vec![InputEvent::AbsoluteValue { address: InputAddress::fader(129), value: 8192 }]);

        let events = chain.receive(0, &[0xE1, 0x00, 0x40]);
        assert_eq!(events, vec![InputEvent::AbsoluteValue { address: InputAddress::fader(1), value: 8192 }]);
    }

    #[test]
    fn test_duplicate_offset_rejected() {
        let mut chain = ExtendedSurface::new();
        let (a, _) = unit(ProtocolFamily::Hui, false);
        let (b, _) = unit(ProtocolFamily::Hui, false);
        chain.push(0, a).unwrap();
        assert_eq!(chain.push(0, b).unwrap_err(), ChainError::DuplicateOffset(0));
    }

    #[test]
    fn test_overlapping_units_rejected() {
        let mut chain = ExtendedSurface::new();
        let (main, _) = unit(ProtocolFamily::Mcu, false);
        let (ext, _) = unit(ProtocolFamily::Mcu, true);
        let (grid, _) = unit(ProtocolFamily::Pad, false);
        chain.push(0, main).unwrap();
        assert_eq!(
            chain.push(8, ext).unwrap_err(),
            ChainError::Overlap { offset: 8, span: 128, other: 0 }
        );
        // Pad display needs 272 indices, which would reach into the next unit
        chain.push(400, unit(ProtocolFamily::Hui, false).0).unwrap();
        assert!(matches!(chain.push(130, grid), Err(ChainError::Overlap { other: 400, .. })));
        assert_eq!(
            check_range(u16::MAX - 10, 128, std::iter::empty()),
            Err(ChainError::OutOfRange { offset: u16::MAX - 10, span: 128 })
        );
    }

    #[test]
    fn test_units_never_share_global_addresses() {
        let (mut chain, main_sink, ext_sink) = chain();

        // Top button note on each unit
        let main = chain.receive(0, &[0x90, 0x5E, 0x7F]);
        let ext = chain.receive(1, &[0x90, 0x56, 0x7F]);
        assert_eq!(main, vec![InputEvent::ButtonDown(InputAddress::button(0x5E))]);
        assert_eq!(ext, vec![InputEvent::ButtonDown(InputAddress::button(128 + 0x56))]);

        chain.set_output(OutputAddress::button(0x5E), 1, None, false).unwrap();
        assert_eq!(main_sink.take(), vec![vec![0x90, 0x5E, 0x7F]]);
        assert!(ext_sink.is_empty());

        // Main unit timecode digits stay on the main unit
        chain.set_text(112, 2, "12").unwrap();
        assert_eq!(main_sink.take(), vec![vec![0xB0, 0x49, 0x31], vec![0xB0, 0x48, 0x32]]);
        assert!(ext_sink.is_empty());
    }

    #[test]
    fn test_indices_between_units_are_unrouted() {
        let mut chain = ExtendedSurface::new();
        chain.push(0, unit(ProtocolFamily::Mcu, false).0).unwrap();
        chain.push(300, unit(ProtocolFamily::Mcu, true).0).unwrap();
        assert!(matches!(
            chain.set_output(OutputAddress::button(200), 1, None, false),
            Err(SurfaceError::UnmappedOutput { .. })
        ));
    }

    #[test]
    fn test_units_keep_push_numbers_when_sorted() {
        let mut chain = ExtendedSurface::new();
        let (ext, _) = unit(ProtocolFamily::Mcu, true);
        let (main, _) = unit(ProtocolFamily::Mcu, false);
        assert_eq!(chain.push(128, ext), Ok(0));
        assert_eq!(chain.push(0, main), Ok(1));
        assert_eq!(chain.unit(0).map(|s| s.name()), Some("ext"));
        assert_eq!(chain.offset_of(1), Some(0));
    }

    #[test]
    fn test_hui_units_keep_independent_zones() {
        let mut chain = ExtendedSurface::new();
        let (a, _) = unit(ProtocolFamily::Hui, false);
        let (b, _) = unit(ProtocolFamily::Hui, false);
        chain.push(0, a).unwrap();
        chain.push(240, b).unwrap();
        chain.attach_all();

        chain.receive(0, &[0xB0, 0x0F, 0x01]);
        // Unit 1 never saw a zone select
        assert!(chain.receive(1, &[0xB0, 0x2F, 0x41]).is_empty());
        assert_eq!(
            chain.receive(0, &[0xB0, 0x2F, 0x41]),
            vec![InputEvent::ButtonDown(InputAddress::button(9))]
        );

        chain.receive(1, &[0xB0, 0x0F, 0x01]);
        assert_eq!(
            chain.receive(1, &[0xB0, 0x2F, 0x41]),
            vec![InputEvent::ButtonDown(InputAddress::button(249))]
        );
    }

    #[test]
    fn test_close_all_silences_every_unit() {
        let (mut chain, main_sink, ext_sink) = chain();
        chain.close_all();
        assert!(chain.units.iter().all(|u| !u.surface.is_attached()));

        chain.set_output(OutputAddress::fader(0), 100, None, false).unwrap();
        chain.set_output(OutputAddress::fader(129), 100, None, false).unwrap();
        chain.attach_all();
        assert!(main_sink.is_empty());
        assert!(ext_sink.is_empty());
    }
}
