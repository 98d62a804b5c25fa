//! Hermes Clock
//!
//! Time infrastructure for the Hermes messaging core:
//!
//! - [`SystemClock`] - real wall-clock time for production
//! - [`FixedClock`] - settable time for deterministic tests
//! - [`DayStartedPublisher`] - long-running event source that detects the
//!   start of a new trading day and feeds the bus

mod day_started;
mod fixed;
mod system;

pub use day_started::{DayStarted, DayStartedPublisher, TradingDay};
pub use fixed::FixedClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use hermes_ports::Clock;
