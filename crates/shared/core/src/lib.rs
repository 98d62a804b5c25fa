//! Hermes Core Domain
//!
//! Pure domain types for the Hermes messaging core.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod domain;
pub mod error;
pub mod message;

// Re-export commonly used types at crate root
pub use domain::{Day, Entity, Revision, START_DAY, Subdomain, Uid, Version};
pub use error::{HermesError, Result};
pub use message::{Event, Request};
