//! Idle and timer event storage. Both embed an [`EventBase`]; the loop
//! drives them through its own slabs plus [`crate::collections::TimerHeap`]
//! for timers.

use crate::event::{EventBase, EventKind};
use crate::evloop::Loop;

pub type IdleCb = Box<dyn FnMut(&mut Loop, u64)>;
pub type TimerCb = Box<dyn FnMut(&mut Loop, u64)>;

pub struct Idle {
    pub base: EventBase,
    /// `None` only while the callback is being run — see
    /// `Loop::run_idles`, which takes it out to avoid aliasing the
    /// slab with the `&mut Loop` the callback itself needs.
    pub cb: Option<IdleCb>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSpec {
    /// Fires `repeat` times (0 = forever) every `interval_us`.
    Interval { interval_us: u64, repeat: u32 },
    /// Fires at the next `cron_next(minute, hour, day, week, month)`
    /// occurrence, then reschedules itself the same way.
    Period {
        minute: i32,
        hour: i32,
        day: i32,
        week: i32,
        month: i32,
        repeat: u32,
    },
}

pub struct Timer {
    pub base: EventBase,
    pub spec: TimerSpec,
    pub next_timeout_us: u64,
    pub fired: u32,
    pub cb: Option<TimerCb>,
}

impl Timer {
    pub fn kind(&self) -> EventKind {
        match self.spec {
            TimerSpec::Interval { .. } => EventKind::Timeout,
            TimerSpec::Period { .. } => EventKind::Period,
        }
    }

    pub fn should_reschedule(&self) -> bool {
        match self.spec {
            TimerSpec::Interval { repeat, .. } | TimerSpec::Period { repeat, .. } => {
                repeat == 0 || self.fired < repeat
            }
        }
    }

    /// Computes the next firing time in loop-monotonic microseconds,
    /// given the current monotonic clock reading `now_us`.
    pub fn compute_next(&self, now_us: u64) -> u64 {
        match self.spec {
            TimerSpec::Interval { interval_us, .. } => now_us + interval_us,
            TimerSpec::Period { minute, hour, day, week, month, .. } => {
                let unix_secs = crate::time::cron_next(minute, hour, day, week, month);
                let wall_now_ms = crate::time::wall_ms();
                let delay_ms = (unix_secs as i64 * 1000) - wall_now_ms as i64;
                now_us + (delay_ms.max(0) as u64) * 1_000
            }
        }
    }
}
