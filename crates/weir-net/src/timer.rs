use weir_timing::{Duration, Instant};

/// Opaque handle returned by [`crate::reactor::EventLoop::delay`] /
/// [`repeat`](crate::reactor::EventLoop::repeat); pass to `off_timer` to
/// cancel (§4.1, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recurrence {
    Once,
    /// Re-arms with the same interval relative to the firing instant, not
    /// the originally scheduled instant (§4.2: drift is not corrected).
    Persistent(Duration),
}

pub(crate) struct ScheduledTimer {
    pub id: TimerId,
    pub fire_at: Instant,
    pub recurrence: Recurrence,
    pub cancelled: bool,
}

/// Min-heap-by-fire-time timer wheel. Deliberately a sorted `Vec` rather
/// than a `BinaryHeap`: the loop needs "all timers due by now, in
/// registration order for ties" (§5 "Timers with the same fire time fire in
/// registration order"), which a heap would not give for free.
#[derive(Default)]
pub(crate) struct TimerWheel {
    timers: Vec<ScheduledTimer>,
    next_id: u64,
}

impl TimerWheel {
    pub fn schedule(&mut self, delay: Duration, recurrence: Recurrence) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let fire_at = Instant::now() + delay;
        self.insert_sorted(ScheduledTimer { id, fire_at, recurrence, cancelled: false });
        id
    }

    fn insert_sorted(&mut self, timer: ScheduledTimer) {
        let pos = self.timers.partition_point(|t| t.fire_at <= timer.fire_at);
        self.timers.insert(pos, timer);
    }

    pub fn cancel(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.iter_mut().find(|t| t.id == id) {
            timer.cancelled = true;
        }
    }

    /// Returns the duration until the next live timer fires, or `None` if
    /// there are none (used to bound the poll timeout).
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.timers.iter().find(|t| !t.cancelled).map(|t| t.fire_at.saturating_sub(now))
    }

    /// Removes and returns every timer due at or before `now`, in
    /// fire-time/registration order, re-arming persistent ones.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerId> {
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(self.timers.len());
        for timer in self.timers.drain(..) {
            if timer.cancelled {
                continue;
            }
            if timer.fire_at <= now {
                due.push(timer.id);
                if let Recurrence::Persistent(interval) = timer.recurrence {
                    remaining.push(ScheduledTimer {
                        id: timer.id,
                        fire_at: now + interval,
                        recurrence: timer.recurrence,
                        cancelled: false,
                    });
                }
            } else {
                remaining.push(timer);
            }
        }
        remaining.sort_by_key(|t| t.fire_at);
        self.timers = remaining;
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_timers_fire_in_registration_order() {
        let mut wheel = TimerWheel::default();
        let now = Instant::now();
        let a = wheel.schedule(Duration::ZERO, Recurrence::Once);
        let b = wheel.schedule(Duration::ZERO, Recurrence::Once);
        let due = wheel.take_due(now + Duration::from_millis(1));
        assert_eq!(due, vec![a, b]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut wheel = TimerWheel::default();
        let id = wheel.schedule(Duration::ZERO, Recurrence::Once);
        wheel.cancel(id);
        let due = wheel.take_due(Instant::now() + Duration::from_millis(1));
        assert!(due.is_empty());
    }

    #[test]
    fn persistent_timer_rearms_relative_to_fire_time() {
        let mut wheel = TimerWheel::default();
        let now = Instant::now();
        wheel.schedule(Duration::ZERO, Recurrence::Persistent(Duration::from_millis(50)));
        let due = wheel.take_due(now + Duration::from_millis(1));
        assert_eq!(due.len(), 1);
        assert!(wheel.next_deadline(now).is_some());
    }
}
