use std::ops::{Add, AddAssign, Sub};

use crate::Duration;

/// A monotonic point in time, backed by `std::time::Instant`.
///
/// `now()` never goes backwards (event loop clock invariant, §4.1).
#[derive(Copy, Clone, Debug)]
pub struct Instant(std::time::Instant);

impl Instant {
    #[inline]
    pub fn now() -> Self {
        Self(std::time::Instant::now())
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        Duration::from(self.0.elapsed())
    }

    #[inline]
    pub fn elapsed_since(&self, since: Instant) -> Duration {
        self.saturating_sub(since)
    }

    #[inline]
    pub fn saturating_sub(&self, other: Instant) -> Duration {
        Duration::from(self.0.saturating_duration_since(other.0))
    }
}

impl Default for Instant {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialEq for Instant {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Instant {}

impl PartialOrd for Instant {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Instant {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sub for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        self.saturating_sub(rhs)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + std::time::Duration::from(rhs))
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;
    fn sub(self, rhs: Duration) -> Instant {
        Instant(self.0.checked_sub(std::time::Duration::from(rhs)).unwrap_or(self.0))
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}
