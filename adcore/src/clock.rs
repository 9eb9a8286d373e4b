//! Wall-clock abstraction.
//!
//! Load timestamps and the persisted last-ad-shown time are wall-clock values
//! (they survive restarts), so they go through a [`Clock`] that tests can
//! replace. Deadlines and grace windows use `tokio::time` instead.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time elapsed from `earlier` to `now`, saturating at zero when the clock
/// moved backwards.
pub fn elapsed_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_saturates_when_clock_goes_backwards() {
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(5);

        assert_eq!(elapsed_between(later, now), Duration::ZERO);
        assert_eq!(elapsed_between(now, later), Duration::from_secs(5));
    }
}
