//! Output state cache
//!
//! Holds, per address, the last *requested* state and the last state actually
//! put on the wire. The surface consults it before every write so that
//! identical requests and identical blink phases never produce traffic.

use std::collections::HashMap;

use super::address::{OutputAddress, OutputState, WireState};

/// Result of comparing a request against the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diff {
    /// Same as the cached request; nothing to do
    Unchanged,
    /// Cache updated; `previous` is the request it replaced
    Changed { previous: Option<OutputState> },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    desired: OutputState,
    sent: Option<WireState>,
}

/// Authoritative "last requested / last sent" store for one surface
#[derive(Debug, Default)]
pub struct OutputStateCache {
    entries: HashMap<OutputAddress, CacheEntry>,
}

impl OutputStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request; reports whether it differs from the cached one
    pub fn request(&mut self, address: OutputAddress, state: OutputState) -> Diff {
        match self.entries.get_mut(&address) {
            Some(entry) if entry.desired == state => Diff::Unchanged,
            Some(entry) => {
                let previous = std::mem::replace(&mut entry.desired, state);
                Diff::Changed { previous: Some(previous) }
            }
            None => {
                self.entries.insert(address, CacheEntry { desired: state, sent: None });
                Diff::Changed { previous: None }
            }
        }
    }

    pub fn desired(&self, address: &OutputAddress) -> Option<&OutputState> {
        self.entries.get(address).map(|e| &e.desired)
    }

    pub fn sent(&self, address: &OutputAddress) -> Option<&WireState> {
        self.entries.get(address).and_then(|e| e.sent.as_ref())
    }

    /// True when the cache still holds exactly `expected` for `address`
    pub fn is_current(&self, address: &OutputAddress, expected: &OutputState) -> bool {
        self.desired(address) == Some(expected)
    }

    /// True unless `wire` is what the device already shows
    pub fn needs_send(&self, address: &OutputAddress, wire: &WireState) -> bool {
        self.sent(address) != Some(wire)
    }

    pub fn mark_sent(&mut self, address: OutputAddress, wire: WireState) {
        if let Some(entry) = self.entries.get_mut(&address) {
            entry.sent = Some(wire);
        }
    }

    /// Forget what the device shows (failed write)
    pub fn mark_unsent(&mut self, address: &OutputAddress) {
        if let Some(entry) = self.entries.get_mut(address) {
            entry.sent = None;
        }
    }

    /// Forget what the device shows for every address (device reset, reconnect)
    pub fn forget_sent(&mut self) {
        self.entries.values_mut().for_each(|e| e.sent = None);
    }

    /// All cached addresses in a stable order
    pub fn addresses(&self) -> Vec<OutputAddress> {
        let mut addresses: Vec<_> = self.entries.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_is_a_change() {
        let mut cache = OutputStateCache::new();
        let addr = OutputAddress::button(1);
        assert_eq!(cache.request(addr, OutputState::steady(1)), Diff::Changed { previous: None });
        assert_eq!(cache.request(addr, OutputState::steady(1)), Diff::Unchanged);
        assert_eq!(
            cache.request(addr, OutputState::steady(0)),
            Diff::Changed { previous: Some(OutputState::steady(1)) }
        );
    }

    #[test]
    fn test_sent_tracking() {
        let mut cache = OutputStateCache::new();
        let addr = OutputAddress::fader(0);
        cache.request(addr, OutputState::steady(100));
        assert!(cache.needs_send(&addr, &WireState::steady(100)));
        cache.mark_sent(addr, WireState::steady(100));
        assert!(!cache.needs_send(&addr, &WireState::steady(100)));
        cache.mark_unsent(&addr);
        assert!(cache.needs_send(&addr, &WireState::steady(100)));
        // Requested state survives a failed write
        assert_eq!(cache.desired(&addr), Some(&OutputState::steady(100)));
    }

    #[test]
    fn test_mark_sent_ignores_unknown_address() {
        let mut cache = OutputStateCache::new();
        cache.mark_sent(OutputAddress::pad(3), WireState::steady(1));
        assert!(cache.is_empty());
    }
}
