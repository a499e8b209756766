//! The crate's non-programming-error taxonomy.
//!
//! Programming errors (attaching an already-attached component, an out-of-range
//! entity id, building a scheduler with no descriptors) are asserted against, the
//! same way the rest of the engine panics on contract violations in development
//! builds. Everything here is instead *non-fatal*: conditions the scheduler or the
//! command buffer can recover from by logging and skipping, or by handing back a
//! partial result for the caller to inspect.

use thiserror::Error;

/// Diagnostics produced by [`crate::ecs::schedule::builder::build`].
///
/// Both variants leave the builder with a partial schedule; they are logged and
/// returned to the caller rather than treated as unwinding failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The dependency graph contains a cycle; these system names could not be
    /// placed into any batch because the ready queue ran dry before they did.
    #[error("dependency graph has a cycle involving: {0:?}")]
    Cycle(Vec<String>),

    /// Every system still waiting to be scheduled conflicts with every other one,
    /// so no batch could be formed from the remaining candidates.
    #[error("scheduler deadlock: no candidate among {0:?} could be admitted to a batch")]
    Deadlock(Vec<String>),
}

/// Non-fatal command buffer conditions. These are logged at `warn` level and the
/// offending opcode is skipped; they are collected for introspection in tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// `ADD_TO_NEW` appeared with no preceding `SPAWN` in the same stream.
    #[error("ADD_TO_NEW with no preceding SPAWN")]
    NoCurrentSpawn,

    /// A command targeted an entity id the store no longer considers live.
    #[error("command targeted vanished entity {0}")]
    VanishedEntity(u32),

    /// An `ADD_TO_NEW`/`ADD_COMP` opcode had no explicit name and the component's
    /// type was never registered with the store, so no name could be deduced.
    #[error("no component name given and none could be deduced for this type")]
    UnresolvedComponentName,
}
