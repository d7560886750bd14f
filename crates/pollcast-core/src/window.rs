// Client-local answer window.
//
// Each participant's window starts when that participant observes the poll
// and lasts `duration_seconds`. The server never models it; clients recompute
// the remaining time from scratch on every tick.

use std::time::{Duration, Instant};

/// Time left in a window of `duration_seconds` opened at `observed_at`.
/// Saturates at zero once the window has elapsed.
pub fn remaining(duration_seconds: u32, observed_at: Instant, now: Instant) -> Duration {
    let window = Duration::from_secs(u64::from(duration_seconds));
    let elapsed = now.saturating_duration_since(observed_at);
    window.saturating_sub(elapsed)
}

/// Whether the window is still open at `now`.
pub fn is_open(duration_seconds: u32, observed_at: Instant, now: Instant) -> bool {
    !remaining(duration_seconds, observed_at, now).is_zero()
}

/// Render remaining time the way the participant view shows it: `SSs` under a
/// minute, `MM:SS` otherwise. Sub-second remainders are truncated.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs();
    let minutes = total / 60;
    let seconds = total % 60;
    if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds:02}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_window_at_observation() {
        let t0 = Instant::now();
        assert_eq!(remaining(30, t0, t0), Duration::from_secs(30));
        assert!(is_open(30, t0, t0));
    }

    #[test]
    fn counts_down_with_elapsed_time() {
        let t0 = Instant::now();
        let later = t0 + Duration::from_millis(12_500);
        assert_eq!(remaining(30, t0, later), Duration::from_millis(17_500));
    }

    #[test]
    fn saturates_at_zero_when_expired() {
        let t0 = Instant::now();
        assert_eq!(remaining(10, t0, t0 + Duration::from_secs(10)), Duration::ZERO);
        assert_eq!(remaining(10, t0, t0 + Duration::from_secs(3600)), Duration::ZERO);
        assert!(!is_open(10, t0, t0 + Duration::from_secs(11)));
    }

    #[test]
    fn clock_before_observation_gives_full_window() {
        let t0 = Instant::now() + Duration::from_secs(5);
        let now = t0 - Duration::from_secs(5);
        assert_eq!(remaining(20, t0, now), Duration::from_secs(20));
    }

    #[test]
    fn independent_windows_per_observer() {
        let alice_saw = Instant::now();
        let bob_saw = alice_saw + Duration::from_secs(20);
        let now = alice_saw + Duration::from_secs(35);
        assert!(!is_open(30, alice_saw, now));
        assert_eq!(remaining(30, bob_saw, now), Duration::from_secs(15));
    }

    #[test]
    fn formats_seconds_and_minutes() {
        assert_eq!(format_remaining(Duration::ZERO), "00s");
        assert_eq!(format_remaining(Duration::from_millis(9_900)), "09s");
        assert_eq!(format_remaining(Duration::from_secs(59)), "59s");
        assert_eq!(format_remaining(Duration::from_secs(60)), "01:00");
        assert_eq!(format_remaining(Duration::from_secs(125)), "02:05");
    }
}
