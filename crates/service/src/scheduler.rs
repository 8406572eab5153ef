//! Per-volume poll scheduling
//!
//! One polling loop exists per tracked volume. The scheduler owns each
//! loop's `last_polled` timestamp and phase, and answers two questions:
//! which loops should poll now, and in what order. Own volumes and
//! actively-used shared volumes poll at high priority; other shared
//! volumes queue behind them, most overdue first.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use common::node::VolumeId;

/// Relative urgency of a due loop
///
/// `High` loops always sort before `Low` ones. Among `Low` loops a
/// larger rank means more overdue and is serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPriority {
    High,
    Low(i64),
}

impl Ord for PollPriority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering::*;
        match (self, other) {
            (PollPriority::High, PollPriority::High) => Equal,
            (PollPriority::High, PollPriority::Low(_)) => Greater,
            (PollPriority::Low(_), PollPriority::High) => Less,
            (PollPriority::Low(a), PollPriority::Low(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for PollPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Scheduling class of a volume
///
/// Activity only matters for shared volumes; own volumes poll eagerly
/// regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeClass {
    Own,
    SharedActive,
    SharedInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopPhase {
    Idle,
    Polling,
}

#[derive(Debug, Clone)]
struct EventLoopState {
    last_polled: DateTime<Utc>,
    class: VolumeClass,
    phase: LoopPhase,
    forced: bool,
}

/// Minimum intervals between polls, per class and app state
#[derive(Debug, Clone, Copy)]
pub struct PollThresholds {
    pub own_foreground: Duration,
    pub own_background: Duration,
    pub shared_active_foreground: Duration,
    pub shared_inactive_foreground: Duration,
    pub shared_background: Duration,
}

impl PollThresholds {
    pub fn production() -> Self {
        PollThresholds {
            own_foreground: Duration::seconds(30),
            own_background: Duration::minutes(30),
            shared_active_foreground: Duration::seconds(30),
            shared_inactive_foreground: Duration::minutes(10),
            shared_background: Duration::hours(24),
        }
    }

    /// Shorter intervals for development builds
    pub fn debug() -> Self {
        PollThresholds {
            own_foreground: Duration::seconds(10),
            own_background: Duration::minutes(10),
            shared_active_foreground: Duration::seconds(10),
            shared_inactive_foreground: Duration::seconds(200),
            shared_background: Duration::hours(8),
        }
    }

    fn for_loop(&self, class: VolumeClass, background: bool) -> Duration {
        match (class, background) {
            (VolumeClass::Own, false) => self.own_foreground,
            (VolumeClass::Own, true) => self.own_background,
            (VolumeClass::SharedActive, false) => self.shared_active_foreground,
            (VolumeClass::SharedInactive, false) => self.shared_inactive_foreground,
            (_, true) => self.shared_background,
        }
    }
}

/// Decides which volume polling loops are due, and in what order
pub struct VolumePriorityScheduler {
    thresholds: PollThresholds,
    inner: Mutex<Inner>,
}

struct Inner {
    background: bool,
    loops: HashMap<VolumeId, EventLoopState>,
}

impl VolumePriorityScheduler {
    pub fn new(thresholds: PollThresholds) -> Self {
        VolumePriorityScheduler {
            thresholds,
            inner: Mutex::new(Inner {
                background: false,
                loops: HashMap::new(),
            }),
        }
    }

    /// Start tracking a volume's loop; the first poll is immediate
    pub fn track(&self, volume: VolumeId, class: VolumeClass) {
        let mut inner = self.inner.lock();
        inner.loops.entry(volume).or_insert(EventLoopState {
            last_polled: Utc::now(),
            class,
            phase: LoopPhase::Idle,
            forced: true,
        });
    }

    pub fn untrack(&self, volume: &VolumeId) {
        self.inner.lock().loops.remove(volume);
    }

    pub fn set_background(&self, background: bool) {
        self.inner.lock().background = background;
    }

    pub fn set_class(&self, volume: &VolumeId, class: VolumeClass) {
        if let Some(state) = self.inner.lock().loops.get_mut(volume) {
            state.class = class;
        }
    }

    /// Mark a volume due regardless of its threshold
    pub fn force_due(&self, volume: &VolumeId) {
        if let Some(state) = self.inner.lock().loops.get_mut(volume) {
            state.forced = true;
        }
    }

    /// Idle loops that are due at `now`, most urgent first
    pub fn due_loops(&self, now: DateTime<Utc>) -> Vec<(VolumeId, PollPriority)> {
        let inner = self.inner.lock();
        let mut due: Vec<_> = inner
            .loops
            .iter()
            .filter(|(_, state)| state.phase == LoopPhase::Idle)
            .filter_map(|(volume, state)| {
                self.priority(state, inner.background, now)
                    .map(|priority| (*volume, priority))
            })
            .collect();
        due.sort_by(|a, b| b.1.cmp(&a.1));
        due
    }

    /// Transition a loop to polling; returns false if it was not idle
    pub fn begin_poll(&self, volume: &VolumeId) -> bool {
        let mut inner = self.inner.lock();
        match inner.loops.get_mut(volume) {
            Some(state) if state.phase == LoopPhase::Idle => {
                state.phase = LoopPhase::Polling;
                true
            }
            _ => false,
        }
    }

    /// Record a poll attempt finishing, successful or not
    pub fn finish_poll(&self, volume: &VolumeId, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.loops.get_mut(volume) {
            state.phase = LoopPhase::Idle;
            state.last_polled = now;
            state.forced = false;
        }
    }

    fn priority(
        &self,
        state: &EventLoopState,
        background: bool,
        now: DateTime<Utc>,
    ) -> Option<PollPriority> {
        if state.forced {
            return Some(PollPriority::High);
        }
        let threshold = self.thresholds.for_loop(state.class, background);
        let overdue = seconds_since_threshold(now - state.last_polled, threshold)?;
        let priority = match (state.class, background) {
            (VolumeClass::Own, _) => PollPriority::High,
            (VolumeClass::SharedActive, false) => PollPriority::High,
            _ => PollPriority::Low(overdue),
        };
        Some(priority)
    }
}

/// Whole seconds elapsed past the threshold, `None` if not yet due
///
/// Rounded before the comparison so sub-second clock skew cannot flap
/// a loop between due and not due at the boundary.
fn seconds_since_threshold(elapsed: Duration, threshold: Duration) -> Option<i64> {
    let over_ms = (elapsed - threshold).num_milliseconds();
    let rounded = if over_ms >= 0 {
        (over_ms + 500) / 1000
    } else {
        -((-over_ms + 500) / 1000)
    };
    (rounded >= 0).then_some(rounded)
}
