use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use hermes_ports::Clock;

/// Settable clock for deterministic tests
///
/// Time stands still until [`FixedClock::set`] or [`FixedClock::advance`]
/// moves it.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moment() -> DateTime<Utc> {
        "2024-03-14T12:00:00Z".parse().expect("valid timestamp")
    }

    #[test]
    fn test_fixed_clock_stands_still() {
        let clock = FixedClock::new(moment());
        assert_eq!(clock.now(), moment());
        assert_eq!(clock.now(), moment());
    }

    #[test]
    fn test_fixed_clock_advances_on_demand() {
        let clock = FixedClock::new(moment());
        clock.advance(Duration::days(1));
        assert_eq!(clock.now(), moment() + Duration::days(1));

        clock.set(moment());
        assert_eq!(clock.now(), moment());
    }
}
