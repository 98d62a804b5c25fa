//! Hermes Ports
//!
//! Port definitions (traits) for the Hermes messaging core.
//! These define the boundaries between domain logic and infrastructure.

mod clock;
mod store;

pub use clock::Clock;
pub use store::{CondUpdate, DocStore, Document, FIELD_ID, FIELD_VER, StoreError};
