use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use hermes_bus::{EventPublisher, EventSink};
use hermes_core::{Day, Event, Revision, START_DAY};
use hermes_ports::Clock;
use serde::{Deserialize, Serialize};

/// Exchange timezone - UTC+3, no daylight saving
const EXCHANGE_TZ_SECS: i32 = 3 * 3600;

/// Trading closes at midnight but the data is published at 00:45 local
const END_HOUR: u32 = 0;
const END_MINUTE: u32 = 45;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// A new trading day's data became available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayStarted {
    pub day: Day,
}

impl Event for DayStarted {
    fn name() -> &'static str {
        "DayStarted"
    }
}

/// Singleton entity tracking the last trading day already processed
#[derive(Debug, Serialize, Deserialize)]
pub struct TradingDay {
    rev: Revision,
    pub day: Day,
    #[serde(default = "start_day")]
    pub last: Day,
}

impl hermes_core::Entity for TradingDay {
    fn kind() -> &'static str {
        "trading_day"
    }

    fn revision(&self) -> &Revision {
        &self.rev
    }

    fn revision_mut(&mut self) -> &mut Revision {
        &mut self.rev
    }
}

fn start_day() -> Day {
    START_DAY
}

fn exchange_tz() -> FixedOffset {
    FixedOffset::east_opt(EXCHANGE_TZ_SECS).unwrap_or_else(|| Utc.fix())
}

/// Last trading day whose data is already published.
///
/// Before the 00:45 local cutoff the previous day's data is still pending,
/// so the last completed day lies one further back.
fn last_completed_day(now: DateTime<Utc>) -> Day {
    let local = now.with_timezone(&exchange_tz());
    let past_cutoff = (local.hour(), local.minute()) >= (END_HOUR, END_MINUTE);
    let delta = if past_cutoff { 1 } else { 2 };

    local.date_naive() - chrono::Duration::days(delta)
}

/// Long-running event source that emits [`DayStarted`] once at startup and
/// then again every time the clock crosses into a new trading day.
pub struct DayStartedPublisher<C> {
    clock: Arc<C>,
    check_interval: Duration,
}

impl<C: Clock> DayStartedPublisher<C> {
    pub fn new(clock: Arc<C>) -> Self {
        Self {
            clock,
            check_interval: CHECK_INTERVAL,
        }
    }

    /// Override the poll interval (tests)
    pub fn with_check_interval(clock: Arc<C>, check_interval: Duration) -> Self {
        Self {
            clock,
            check_interval,
        }
    }
}

#[async_trait]
impl<C: Clock + 'static> EventPublisher for DayStartedPublisher<C> {
    async fn run(&self, sink: EventSink) {
        let mut day = last_completed_day(self.clock.now());
        sink.publish(DayStarted { day });

        loop {
            tokio::time::sleep(self.check_interval).await;

            let new_day = last_completed_day(self.clock.now());
            if day < new_day {
                day = new_day;
                sink.publish(DayStarted { day });
            }
        }
    }
}
