//! Blink scheduler
//!
//! Tracks every output that blinks by timer and flips its phase on a single
//! global tick. The scheduler only decides *when* a phase flips; the surface
//! turns each flip into a write through the regular cache path.

use std::collections::BTreeMap;
use std::time::Duration;

use super::address::OutputAddress;

/// Blink speed requested for an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkRate {
    Fast,
    Slow,
}

impl BlinkRate {
    pub fn from_fast(fast: bool) -> Self {
        if fast { BlinkRate::Fast } else { BlinkRate::Slow }
    }
}

/// Tick period and per-rate tick counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkTiming {
    pub tick: Duration,
    pub fast_ticks: u32,
    pub slow_ticks: u32,
}

impl Default for BlinkTiming {
    fn default() -> Self {
        Self { tick: Duration::from_millis(250), fast_ticks: 1, slow_ticks: 2 }
    }
}

/// One blinking output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkTimerEntry {
    /// false shows the steady value, true the blink color
    pub phase: bool,
    pub rate: BlinkRate,
    countdown: u32,
}

#[derive(Debug)]
pub struct BlinkScheduler {
    entries: BTreeMap<OutputAddress, BlinkTimerEntry>,
    timing: BlinkTiming,
    /// Bumped whenever outstanding ticks must be ignored
    generation: u64,
    armed: bool,
}

impl BlinkScheduler {
    pub fn new(timing: BlinkTiming) -> Self {
        Self { entries: BTreeMap::new(), timing: sanitize(timing), generation: 0, armed: false }
    }

    pub fn timing(&self) -> BlinkTiming {
        self.timing
    }

    pub fn set_timing(&mut self, timing: BlinkTiming) {
        self.timing = sanitize(timing);
    }

    fn ticks_for(&self, rate: BlinkRate) -> u32 {
        match rate {
            BlinkRate::Fast => self.timing.fast_ticks,
            BlinkRate::Slow => self.timing.slow_ticks,
        }
    }

    /// Start blinking `address`, or change the rate of an existing entry.
    /// A new entry starts on the steady phase.
    pub fn start(&mut self, address: OutputAddress, rate: BlinkRate) {
        let countdown = self.ticks_for(rate);
        self.entries
            .entry(address)
            .and_modify(|e| {
                if e.rate != rate {
                    e.rate = rate;
                    e.countdown = countdown;
                }
            })
            .or_insert(BlinkTimerEntry { phase: false, rate, countdown });
    }

    /// Stop blinking `address`; returns whether it was blinking
    pub fn stop(&mut self, address: &OutputAddress) -> bool {
        self.entries.remove(address).is_some()
    }

    pub fn phase(&self, address: &OutputAddress) -> Option<bool> {
        self.entries.get(address).map(|e| e.phase)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Advance one tick; returns each address whose phase flipped with its new phase
    pub fn tick(&mut self) -> Vec<(OutputAddress, bool)> {
        let (fast, slow) = (self.timing.fast_ticks, self.timing.slow_ticks);
        let mut flipped = Vec::new();
        for (address, entry) in self.entries.iter_mut() {
            entry.countdown = entry.countdown.saturating_sub(1);
            if entry.countdown == 0 {
                entry.phase = !entry.phase;
                entry.countdown = match entry.rate {
                    BlinkRate::Fast => fast,
                    BlinkRate::Slow => slow,
                };
                flipped.push((*address, entry.phase));
            }
        }
        flipped
    }

    /// True when entries exist but no tick is outstanding
    pub fn needs_arm(&self) -> bool {
        !self.armed && !self.entries.is_empty()
    }

    /// Mark a tick as outstanding; returns the generation it must carry
    pub fn arm(&mut self) -> u64 {
        self.armed = true;
        self.generation
    }

    /// Accept a fired tick. Stale generations are rejected.
    pub fn accept_tick(&mut self, generation: u64) -> bool {
        if !self.armed || generation != self.generation {
            return false;
        }
        self.armed = false;
        true
    }

    /// Invalidate any outstanding tick (detach)
    pub fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.armed = false;
    }
}

fn sanitize(timing: BlinkTiming) -> BlinkTiming {
    BlinkTiming {
        tick: timing.tick.max(Duration::from_millis(1)),
        fast_ticks: timing.fast_ticks.max(1),
        slow_ticks: timing.slow_ticks.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_flips_every_tick_slow_every_other() {
        let mut blink = BlinkScheduler::new(BlinkTiming::default());
        blink.start(OutputAddress::button(1), BlinkRate::Fast);
        blink.start(OutputAddress::button(2), BlinkRate::Slow);

        assert_eq!(blink.tick(), vec![(OutputAddress::button(1), true)]);
        assert_eq!(
            blink.tick(),
            vec![(OutputAddress::button(1), false), (OutputAddress::button(2), true)]
        );
    }

    #[test]
    fn test_restart_keeps_phase() {
        let mut blink = BlinkScheduler::new(BlinkTiming::default());
        let addr = OutputAddress::pad(0);
        blink.start(addr, BlinkRate::Fast);
        blink.tick();
        blink.start(addr, BlinkRate::Fast);
        assert_eq!(blink.phase(&addr), Some(true));
    }

    #[test]
    fn test_stale_generation_rejected() {
        let mut blink = BlinkScheduler::new(BlinkTiming::default());
        blink.start(OutputAddress::button(0), BlinkRate::Fast);
        assert!(blink.needs_arm());
        let generation = blink.arm();
        assert!(!blink.needs_arm());
        blink.disarm();
        assert!(!blink.accept_tick(generation));
        let generation = blink.arm();
        assert!(blink.accept_tick(generation));
        // Only one acceptance per arm
        assert!(!blink.accept_tick(generation));
    }
}
