//! A lightweight Entity-Component-System runtime.
//!
//! The crate is built around three tightly coupled pieces:
//!
//! - [`ecs::store`] — the entity table, component store, and the indices that keep
//!   `has(entity, component)` cheap in every direction.
//! - [`ecs::cache`] and [`ecs::query`] — a reactive, incrementally maintained query cache
//!   plus an immediate-mode query builder on top of it.
//! - [`ecs::schedule`] — a dependency- and conflict-aware scheduler that turns a set of
//!   declared systems into layered batches that can run across a worker pool without
//!   data races.
//!
//! Structural changes made while systems run in parallel are never applied directly;
//! they go through a [`ecs::command::CommandBuffer`] and are replayed on a single thread
//! at the end of the tick. See [`ecs::schedule::scheduler::Scheduler`] for the entry point
//! most applications will use.

pub mod core;
pub mod ecs;

pub use ecs::command::CommandBuffer;
pub use ecs::component::Component;
pub use ecs::entity::{Entity, EntityId};
pub use ecs::error::{CommandError, ScheduleError};
pub use ecs::query::{Query, ViewRecord};
pub use ecs::schedule::scheduler::Scheduler;
pub use ecs::store::Store;
pub use ecs::system::{Access, SystemDescriptor};
