//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Shared primitives and utilities for the tick engine."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::time::Duration;

/// Convert a duration into microseconds, saturating at `u64::MAX`.
pub fn duration_to_micros(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_mul(1_000_000)
        .saturating_add(u64::from(duration.subsec_micros()))
}

/// Duration of one period at `hz`, or `None` for a non-positive rate.
pub fn period_from_hz(hz: f64) -> Option<Duration> {
    if hz.is_finite() && hz > 0.0 {
        Duration::try_from_secs_f64(1.0 / hz).ok()
    } else {
        None
    }
}

/// Per-second rate of `count` events observed over `elapsed`.
pub fn rate_per_second(count: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    count as f64 / seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_and_periods() {
        assert_eq!(duration_to_micros(Duration::from_millis(5)), 5_000);
        assert_eq!(period_from_hz(4.0), Some(Duration::from_millis(250)));
        assert_eq!(period_from_hz(0.0), None);
        assert_eq!(rate_per_second(10, Duration::from_millis(500)), 20.0);
        assert_eq!(rate_per_second(10, Duration::ZERO), 0.0);
    }
}
