//! MIDI transport
//!
//! Outbound bytes go through a [`TransportSink`]; inbound bytes arrive from
//! the midir callback thread and are forwarded, tagged with the unit number,
//! over an unbounded tokio channel. Message boundaries are restored on the
//! receiving side by [`MidiStream`](crate::midi::MidiStream).

use anyhow::{anyhow, Context, Result};
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection, MidiOutputPort};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::protocol::Packet;

const CLIENT_NAME: &str = "surfacelink";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,
    #[error("send failed: {0}")]
    Send(String),
}

/// Outbound side of a device connection
pub trait TransportSink {
    fn is_connected(&self) -> bool;

    /// Short channel message
    fn send_value_message(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Complete SysEx frame
    fn send_framed_message(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Release the port. Later sends fail with `Disconnected`.
    fn close(&mut self) {}
}

/// Sink writing to a midir output port
pub struct MidiSink {
    conn: Option<MidiOutputConnection>,
    port_name: String,
}

impl MidiSink {
    /// Connect to the first output port whose name contains `pattern`
    pub fn connect(pattern: &str) -> Result<Self> {
        let midi_out = MidiOutput::new(&format!("{}-out", CLIENT_NAME)).context("Failed to create MIDI output")?;
        debug!("Found {} MIDI output ports", midi_out.port_count());

        let (port, port_name) =
            find_output_port(&midi_out, pattern).ok_or_else(|| anyhow!("Output port '{}' not found", pattern))?;
        info!("Connecting to output port: {}", port_name);

        let conn = midi_out.connect(&port, CLIENT_NAME).map_err(|e| anyhow!("{}", e)).context("Failed to connect to output port")?;
        Ok(Self { conn: Some(conn), port_name })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let conn = self.conn.as_mut().ok_or(TransportError::Disconnected)?;
        conn.send(bytes).map_err(|e| TransportError::Send(e.to_string()))
    }
}

impl TransportSink for MidiSink {
    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn send_value_message(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.send(bytes)
    }

    fn send_framed_message(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.send(bytes)
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            info!("Closed output port {}", self.port_name);
        }
    }
}

/// Live input subscription; dropping it closes the port
pub struct InputPort {
    _conn: MidiInputConnection<()>,
    pub name: String,
    pub unit: usize,
}

/// Connect to the first input port whose name contains `pattern` and forward
/// every raw buffer as `(unit, bytes)`
pub fn connect_input(pattern: &str, unit: usize, tx: mpsc::UnboundedSender<(usize, Vec<u8>)>) -> Result<InputPort> {
    let mut midi_in = MidiInput::new(&format!("{}-in-{}", CLIENT_NAME, unit)).context("Failed to create MIDI input")?;
    // SysEx, clock and active sensing all reach the decoder
    midi_in.ignore(midir::Ignore::None);
    debug!("Found {} MIDI input ports", midi_in.port_count());

    let (port, name) =
        find_input_port(&midi_in, pattern).ok_or_else(|| anyhow!("Input port '{}' not found", pattern))?;
    info!("Connecting to input port: {}", name);

    let conn = midi_in
        .connect(
            &port,
            CLIENT_NAME,
            move |_timestamp, data, _| {
                if tx.send((unit, data.to_vec())).is_err() {
                    trace!("Input dropped after shutdown");
                }
            },
            (),
        )
        .map_err(|e| anyhow!("{}", e))
        .context("Failed to connect to input port")?;

    Ok(InputPort { _conn: conn, name, unit })
}

/// Find an input port by case-insensitive substring match
fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(MidiInputPort, String)> {
    let pattern = pattern.to_lowercase();
    midi_in.ports().into_iter().find_map(|port| {
        let name = midi_in.port_name(&port).ok()?;
        name.to_lowercase().contains(&pattern).then(|| {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            (port, name)
        })
    })
}

/// Find an output port by case-insensitive substring match
fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    let pattern = pattern.to_lowercase();
    midi_out.ports().into_iter().find_map(|port| {
        let name = midi_out.port_name(&port).ok()?;
        name.to_lowercase().contains(&pattern).then(|| {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            (port, name)
        })
    })
}

#[derive(Debug, Default)]
struct MemoryLog {
    packets: Vec<Packet>,
    disconnected: bool,
    fail_sends: bool,
}

/// In-memory sink recording every packet.
///
/// Clones share the same log, so a test can keep one handle while the
/// surface owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    log: Rc<RefCell<MemoryLog>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate unplugging (`false`) or replugging (`true`) the device
    pub fn set_connected(&self, connected: bool) {
        self.log.borrow_mut().disconnected = !connected;
    }

    /// Report connected but fail every send
    pub fn set_failing(&self, failing: bool) {
        self.log.borrow_mut().fail_sends = failing;
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.log.borrow().packets.clone()
    }

    /// Raw bytes of every packet sent so far
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.log.borrow().packets.iter().map(|p| p.bytes().to_vec()).collect()
    }

    /// Drain the log
    pub fn take(&self) -> Vec<Vec<u8>> {
        self.log.borrow_mut().packets.drain(..).map(|p| p.bytes().to_vec()).collect()
    }

    pub fn len(&self) -> usize {
        self.log.borrow().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.borrow().packets.is_empty()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().packets.clear();
    }

    fn record(&mut self, packet: Packet) -> Result<(), TransportError> {
        let mut log = self.log.borrow_mut();
        if log.disconnected {
            return Err(TransportError::Disconnected);
        }
        if log.fail_sends {
            return Err(TransportError::Send("simulated failure".into()));
        }
        log.packets.push(packet);
        Ok(())
    }
}

impl TransportSink for MemorySink {
    fn is_connected(&self) -> bool {
        !self.log.borrow().disconnected
    }

    fn send_value_message(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.record(Packet::Value(bytes.to_vec()))
    }

    fn send_framed_message(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.record(Packet::Framed(bytes.to_vec()))
    }

    fn close(&mut self) {
        self.log.borrow_mut().disconnected = true;
    }
}

/// Port discovery utilities
pub mod discovery {
    use super::*;

    /// Information about a MIDI port
    #[derive(Debug, Clone)]
    pub struct PortInfo {
        pub index: usize,
        pub name: String,
        pub is_virtual: bool,
    }

    fn is_virtual(name: &str) -> bool {
        name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC")
    }

    pub fn discover_input_ports() -> Result<Vec<PortInfo>> {
        let midi_in = MidiInput::new(&format!("{}-discovery", CLIENT_NAME))?;
        Ok(midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_in.port_name(port).ok()?;
                Some(PortInfo { index, is_virtual: is_virtual(&name), name })
            })
            .collect())
    }

    pub fn discover_output_ports() -> Result<Vec<PortInfo>> {
        let midi_out = MidiOutput::new(&format!("{}-discovery", CLIENT_NAME))?;
        Ok(midi_out
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_out.port_name(port).ok()?;
                Some(PortInfo { index, is_virtual: is_virtual(&name), name })
            })
            .collect())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shares_log() {
        let sink = MemorySink::new();
        let mut owned = sink.clone();
        owned.send_value_message(&[0x90, 0x10, 0x7F]).unwrap();
        owned.send_framed_message(&[0xF0, 0x00, 0xF7]).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.packets(),
            vec![Packet::Value(vec![0x90, 0x10, 0x7F]), Packet::Framed(vec![0xF0, 0x00, 0xF7])]
        );
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_memory_sink_disconnected() {
        let sink = MemorySink::new();
        let mut owned = sink.clone();
        sink.set_connected(false);
        assert!(!owned.is_connected());
        assert_eq!(owned.send_value_message(&[0xB0, 0, 0]), Err(TransportError::Disconnected));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_memory_sink_close_stops_sends() {
        let sink = MemorySink::new();
        let mut owned = sink.clone();
        owned.send_value_message(&[0x90, 0x01, 0x7F]).unwrap();
        owned.close();
        assert!(!sink.is_connected());
        assert_eq!(owned.send_framed_message(&[0xF0, 0xF7]), Err(TransportError::Disconnected));
        assert_eq!(sink.take(), vec![vec![0x90, 0x01, 0x7F]]);
    }
}
