//! Inbound byte-stream reassembly
//!
//! Transports hand over raw buffers with no guarantee that a buffer holds
//! exactly one message. `MidiStream` restores message boundaries:
//! running status, SysEx split across buffers and realtime bytes interleaved
//! inside other messages.

use tracing::{debug, warn};

use super::format_hex;

/// SysEx messages longer than this are dropped
pub const MAX_SYSEX_LEN: usize = 4096;

/// Stateful splitter turning raw buffers into complete MIDI messages
#[derive(Debug, Default)]
pub struct MidiStream {
    /// Status byte of the last channel message, for running status
    running_status: Option<u8>,
    /// Bytes of the message being assembled
    pending: Vec<u8>,
    /// True while inside F0 ... F7
    in_sysex: bool,
    /// Set once a SysEx exceeded `MAX_SYSEX_LEN`; the rest is skipped until F7
    overflowed: bool,
}

impl MidiStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any partial message (connection teardown)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed a raw buffer and collect every message it completes
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for &byte in bytes {
            self.push_byte(byte, &mut out);
        }
        out
    }

    fn push_byte(&mut self, byte: u8, out: &mut Vec<Vec<u8>>) {
        // Realtime bytes may appear anywhere, even inside SysEx
        if byte >= 0xF8 {
            out.push(vec![byte]);
            return;
        }

        if self.in_sysex {
            match byte {
                0xF7 => {
                    self.in_sysex = false;
                    if self.overflowed {
                        self.overflowed = false;
                        self.pending.clear();
                        return;
                    }
                    self.pending.push(0xF7);
                    out.push(std::mem::take(&mut self.pending));
                }
                0x00..=0x7F => {
                    if self.overflowed {
                        return;
                    }
                    if self.pending.len() >= MAX_SYSEX_LEN {
                        warn!("Dropping oversized SysEx (> {} bytes)", MAX_SYSEX_LEN);
                        self.overflowed = true;
                        return;
                    }
                    self.pending.push(byte);
                }
                _ => {
                    // A status byte aborts the unterminated SysEx
                    warn!(
                        "Discarding unterminated SysEx: {}",
                        format_hex(&self.pending[..self.pending.len().min(16)])
                    );
                    self.in_sysex = false;
                    self.overflowed = false;
                    self.pending.clear();
                    self.start_status(byte, out);
                }
            }
            return;
        }

        if byte >= 0x80 {
            if !self.pending.is_empty() {
                debug!("Discarding incomplete message: {}", format_hex(&self.pending));
                self.pending.clear();
            }
            self.start_status(byte, out);
            return;
        }

        // Data byte
        if self.pending.is_empty() {
            match self.running_status {
                Some(status) => self.pending.push(status),
                None => {
                    debug!("Dropping stray data byte {:02X}", byte);
                    return;
                }
            }
        }
        self.pending.push(byte);
        self.complete_if_ready(out);
    }

    fn start_status(&mut self, status: u8, out: &mut Vec<Vec<u8>>) {
        match status {
            0xF0 => {
                self.running_status = None;
                self.in_sysex = true;
                self.pending.push(0xF0);
            }
            0xF7 => {
                debug!("Dropping stray SysEx terminator");
            }
            0xF1..=0xF6 => {
                // System common cancels running status
                self.running_status = None;
                self.pending.push(status);
                self.complete_if_ready(out);
            }
            _ => {
                self.running_status = Some(status);
                self.pending.push(status);
            }
        }
    }

    fn complete_if_ready(&mut self, out: &mut Vec<Vec<u8>>) {
        let Some(&status) = self.pending.first() else {
            return;
        };
        if self.pending.len() == 1 + data_len(status) {
            out.push(std::mem::take(&mut self.pending));
        }
    }
}

/// Number of data bytes following a (non-SysEx) status byte
fn data_len(status: u8) -> usize {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => 2,
        0xC0..=0xDF => 1,
        0xF1 | 0xF3 => 1,
        0xF2 => 2,
        _ => 0,
    }
}
