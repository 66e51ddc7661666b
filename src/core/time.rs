//! Time representation for the playback clock.
//! Stream time is measured in milliseconds, matching the container's
//! tag timestamps.

use std::time::Duration;

/// Stream time in milliseconds since playback start.
pub type Time = u64;

/// Frame rate used when neither the container metadata nor the codec
/// provides one.
pub const FALLBACK_FRAME_RATE: f64 = 24.0;

/// Milliseconds advanced per tick at the given frame rate.
#[inline]
pub fn tick_step(frame_rate: f64) -> Time {
    debug_assert!(frame_rate > 0.0);
    (1000.0 / frame_rate) as Time
}

/// Tick cadence for a frame rate, as a wall-clock interval.
#[inline]
pub fn tick_interval(frame_rate: f64) -> Duration {
    debug_assert!(frame_rate > 0.0);
    Duration::from_secs_f64(1.0 / frame_rate)
}

/// Convert stream time to seconds.
#[inline]
pub fn to_seconds(millis: Time) -> f64 {
    millis as f64 / 1000.0
}
