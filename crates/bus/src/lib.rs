//! Hermes Bus
//!
//! The concurrency and consistency core: a message bus dispatching domain
//! events to zero-or-more handlers and domain requests to exactly one
//! handler, each dispatch running inside its own transactional scope (unit
//! of work over an identity map), with pluggable retry policies deciding
//! what happens to failed event handlers.

mod bus;
mod retry;
mod uow;

pub use bus::{Bus, EventHandler, EventPublisher, EventSink, RequestHandler};
pub use retry::{IndefiniteRetry, NeverRetry, Policy, PolicyFactory};
pub use uow::UnitOfWork;
