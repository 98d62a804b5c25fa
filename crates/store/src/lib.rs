//! Hermes Store
//!
//! Persistence adapter for the Hermes messaging core: an entity repository
//! with optimistic concurrency over any [`hermes_ports::DocStore`], plus an
//! in-process store implementation for tests and single-process deployments.

mod mem;
mod repo;

pub use mem::MemStore;
pub use repo::{Repo, doc_update};
