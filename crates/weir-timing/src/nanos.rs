use std::{
    ops::{Add, AddAssign, Sub, SubAssign},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::Duration;

/// Nanoseconds since the Unix epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct Nanos(pub u64);

impl Nanos {
    pub const ZERO: Nanos = Nanos(0);

    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Nanos(s * 1_000_000_000)
    }

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Nanos(ms * 1_000_000)
    }

    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Nanos(us * 1_000)
    }

    #[inline]
    pub const fn from_mins(m: u64) -> Self {
        Self::from_secs(m * 60)
    }

    #[inline]
    pub const fn from_hours(h: u64) -> Self {
        Self::from_mins(h * 60)
    }

    #[inline]
    pub fn now() -> Self {
        let since_epoch =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(std::time::Duration::ZERO);
        Nanos(since_epoch.as_nanos().min(u128::from(u64::MAX)) as u64)
    }

    #[inline]
    pub fn as_secs(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    #[inline]
    pub fn as_millis(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Nanos) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn elapsed_since(&self, since: Self) -> Self {
        Nanos(self.0.saturating_sub(since.0))
    }

    /// RFC 1123 timestamp, as used by `Last-Modified` headers.
    pub fn to_rfc1123(&self) -> String {
        let t = UNIX_EPOCH + std::time::Duration::from_nanos(self.0);
        httpdate::fmt_http_date(t)
    }
}

impl std::fmt::Display for Nanos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self < Nanos::from_micros(1) {
            write!(f, "{}ns", self.0)
        } else if *self < Nanos::from_millis(1) {
            write!(f, "{:.1}us", self.0 as f64 / 1_000.0)
        } else if *self < Nanos::from_secs(1) {
            write!(f, "{:.1}ms", self.0 as f64 / 1_000_000.0)
        } else {
            write!(f, "{:.3}s", self.as_secs())
        }
    }
}

impl From<Nanos> for u64 {
    #[inline]
    fn from(value: Nanos) -> Self {
        value.0
    }
}

impl From<u64> for Nanos {
    #[inline]
    fn from(value: u64) -> Self {
        Nanos(value)
    }
}

impl Add for Nanos {
    type Output = Nanos;
    #[inline]
    fn add(self, rhs: Nanos) -> Nanos {
        Nanos(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Nanos {
    #[inline]
    fn add_assign(&mut self, rhs: Nanos) {
        *self = *self + rhs;
    }
}

impl Sub for Nanos {
    type Output = Nanos;
    #[inline]
    fn sub(self, rhs: Nanos) -> Nanos {
        Nanos(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Nanos {
    #[inline]
    fn sub_assign(&mut self, rhs: Nanos) {
        *self = *self - rhs;
    }
}

impl From<Nanos> for Duration {
    #[inline]
    fn from(value: Nanos) -> Self {
        Duration(value.0)
    }
}

impl From<Duration> for Nanos {
    #[inline]
    fn from(value: Duration) -> Self {
        Nanos(value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1123_matches_known_instant() {
        // 2026-01-01T00:00:00Z
        let nanos = Nanos::from_secs(1_767_225_600);
        assert_eq!(nanos.to_rfc1123(), "Thu, 01 Jan 2026 00:00:00 GMT");
    }

    #[test]
    fn display_scales_unit() {
        assert_eq!(Nanos(500).to_string(), "500ns");
        assert!(Nanos::from_millis(2).to_string().ends_with("ms"));
        assert!(Nanos::from_secs(2).to_string().ends_with('s'));
    }
}
