//! Monotonic clock primitives shared by the event loop's timer service and
//! the connection layer's latency bookkeeping.
//!
//! Mirrors the shape of a hand-rolled timing crate (newtype `Duration` /
//! `Instant` / `Nanos`, a `Repeater` helper for "fire every N" loops) but
//! backed by `std::time` rather than a calibrated TSC, since nothing in this
//! codebase needs sub-nanosecond precision across sockets.

mod duration;
mod instant;
mod nanos;
mod repeater;

pub use duration::Duration;
pub use instant::Instant;
pub use nanos::Nanos;
pub use repeater::Repeater;
