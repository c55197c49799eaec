//! MIDI sniffer for debugging and development
//!
//! Prints every message a surface sends, as raw hex, as parsed MIDI and as
//! the event (or decode error) the chosen protocol family makes of it.

use anyhow::{Context, Result};
use colored::*;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::midi::{format_hex, MidiMessage, MidiStream};
use crate::protocol::{self, Decoded, DecodeError, InputDecoder, ProtocolFamily, ProtocolOptions};
use crate::transport::{self, discovery};

/// One reassembled message and what the decoder made of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnifferEvent {
    pub timestamp_ms: u64,
    pub data: Vec<u8>,
    pub message: Option<MidiMessage>,
    pub decoded: Result<Decoded, DecodeError>,
}

/// Decoding half of the sniffer, independent of any port
pub struct Decoder {
    stream: MidiStream,
    decoder: Box<dyn InputDecoder>,
    start: Instant,
}

impl Decoder {
    pub fn new(family: ProtocolFamily) -> Self {
        let (_, decoder) = protocol::build(family, &ProtocolOptions::for_family(family));
        Self { stream: MidiStream::new(), decoder, start: Instant::now() }
    }

    /// Feed raw bytes; returns one event per complete message
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SnifferEvent> {
        let timestamp_ms = self.start.elapsed().as_millis() as u64;
        self.stream
            .push(bytes)
            .into_iter()
            .map(|data| {
                let message = MidiMessage::parse(&data);
                let decoded = match &message {
                    Some(message) => self.decoder.decode(message),
                    None => Err(DecodeError::Unparseable { raw: data.clone() }),
                };
                SnifferEvent { timestamp_ms, data, message, decoded }
            })
            .collect()
    }
}

/// Monitor one input port until Ctrl+C
pub async fn run_cli_sniffer(pattern: &str, family: ProtocolFamily) -> Result<()> {
    println!("{}", "=== MIDI Sniffer ===".bold().cyan());
    println!("Protocol: {}  Port pattern: '{}'", family.to_string().bold(), pattern);
    println!("Press Ctrl+C to exit\n");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let port = transport::connect_input(pattern, 0, tx).context("Failed to open sniffer input")?;

    println!("{} {}", "Monitoring".green(), port.name);
    println!("{}", "Format: [timestamp] HEX => PARSED => DECODED".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    let mut decoder = Decoder::new(family);
    loop {
        tokio::select! {
            Some((_, bytes)) = rx.recv() => {
                for event in decoder.feed(&bytes) {
                    print_event(&event);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\n{}", "Sniffer stopped".yellow());
    Ok(())
}

fn print_event(event: &SnifferEvent) {
    let timestamp = format!("{:08}", event.timestamp_ms);
    let hex = format_hex(&event.data);

    let hex_colored = match &event.message {
        Some(MidiMessage::NoteOn { .. }) => hex.bright_green(),
        Some(MidiMessage::NoteOff { .. }) => hex.bright_red(),
        Some(MidiMessage::ControlChange { .. }) => hex.bright_yellow(),
        Some(MidiMessage::PitchBend { .. }) => hex.bright_cyan(),
        Some(MidiMessage::SysEx { .. }) => hex.bright_magenta(),
        Some(_) => hex.normal(),
        None => hex.bright_black(),
    };

    let parsed = match &event.message {
        Some(message) => format!(" => {}", message.to_string().bright_blue()),
        None => String::new(),
    };

    let decoded = match &event.decoded {
        Ok(Decoded::Event(e)) => format!(" => {}", e.to_string().bold()),
        Ok(Decoded::Reply(reply)) => format!(" => {}", format!("{:?}", reply).cyan()),
        Ok(Decoded::Nothing) => String::new(),
        Err(e) => format!(" => {}", e.to_string().red()),
    };

    println!("[{}ms] {}{}{}", timestamp.dimmed(), hex_colored, parsed, decoded);
}

/// List all ports in a formatted way
pub fn list_ports_formatted() -> Result<()> {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    for (title, ports) in [
        ("Input Ports:", discovery::discover_input_ports()?),
        ("Output Ports:", discovery::discover_output_ports()?),
    ] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for port in ports {
            let tag = if port.is_virtual { " [virtual]".yellow() } else { "".normal() };
            println!("  {} {}{}", format!("[{}]", port.index).dimmed(), port.name, tag);
        }
    }
    println!();
    Ok(())
}
