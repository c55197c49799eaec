//! Deferred work
//!
//! Everything a surface wants done later is posted as a plain
//! [`ScheduledTask`] value. The host hands the task back to
//! [`Surface::on_timer`](super::Surface::on_timer) when it fires; the surface
//! re-checks its own state at that point.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use super::address::{OutputAddress, OutputState};
use super::event::InputAddress;

/// Work a surface asked to run after a delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledTask {
    /// Resend `address` if the cache still holds `expected`
    Reconfirm { address: OutputAddress, expected: OutputState },
    /// Global blink tick
    BlinkTick { generation: u64 },
    /// Emit a long press if press number `press` is still held
    LongPress { address: InputAddress, press: u64 },
    /// Periodic keepalive for protocols that need one
    Keepalive,
}

/// Host facility running tasks once after a delay
pub trait Scheduler {
    fn schedule_once(&self, delay: Duration, task: ScheduledTask);
}

/// Scheduler backed by tokio timers.
///
/// Each task sleeps on the runtime and is then posted, tagged with the unit
/// number, to the event loop that owns the surfaces.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<(usize, ScheduledTask)>,
    unit: usize,
}

impl TokioScheduler {
    pub fn new(tx: mpsc::UnboundedSender<(usize, ScheduledTask)>, unit: usize) -> Self {
        Self { tx, unit }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: ScheduledTask) {
        let tx = self.tx.clone();
        let unit = self.unit;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the event loop shut down
            if tx.send((unit, task)).is_err() {
                trace!("Dropping timer task after shutdown");
            }
        });
    }
}

#[derive(Debug, Default)]
struct ManualQueue {
    now: Duration,
    seq: u64,
    pending: Vec<(Duration, u64, ScheduledTask)>,
}

/// Virtual-clock scheduler for tests and offline replays.
///
/// Clones share one queue, so a test keeps a handle while the surface owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    queue: Rc<RefCell<ManualQueue>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock and return every task now due, earliest first
    pub fn advance(&self, by: Duration) -> Vec<ScheduledTask> {
        let mut queue = self.queue.borrow_mut();
        queue.now += by;
        let now = queue.now;

        let mut due: Vec<_> = Vec::new();
        let mut rest = Vec::new();
        for item in queue.pending.drain(..) {
            if item.0 <= now {
                due.push(item);
            } else {
                rest.push(item);
            }
        }
        queue.pending = rest;
        due.sort_by_key(|(at, seq, _)| (*at, *seq));
        due.into_iter().map(|(_, _, task)| task).collect()
    }

    /// Tasks not yet due
    pub fn pending(&self) -> Vec<ScheduledTask> {
        let queue = self.queue.borrow();
        let mut pending: Vec<_> = queue.pending.iter().collect();
        pending.sort_by_key(|(at, seq, _)| (*at, *seq));
        pending.into_iter().map(|(_, _, task)| task.clone()).collect()
    }

    pub fn now(&self) -> Duration {
        self.queue.borrow().now
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: ScheduledTask) {
        let mut queue = self.queue.borrow_mut();
        let at = queue.now + delay;
        let seq = queue.seq;
        queue.seq += 1;
        queue.pending.push((at, seq, task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_scheduler_orders_by_due_time() {
        let scheduler = ManualScheduler::new();
        scheduler.schedule_once(Duration::from_millis(200), ScheduledTask::Keepalive);
        scheduler.schedule_once(Duration::from_millis(100), ScheduledTask::BlinkTick { generation: 0 });

        assert!(scheduler.advance(Duration::from_millis(50)).is_empty());
        assert_eq!(
            scheduler.advance(Duration::from_millis(200)),
            vec![ScheduledTask::BlinkTick { generation: 0 }, ScheduledTask::Keepalive]
        );
        assert!(scheduler.pending().is_empty());
        assert_eq!(scheduler.now(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_tokio_scheduler_posts_back_with_unit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(tx, 2);
        scheduler.schedule_once(Duration::from_millis(10), ScheduledTask::Keepalive);

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(fired, Some((2, ScheduledTask::Keepalive)));
    }
}
