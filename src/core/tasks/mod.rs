mod executor;

pub use executor::{Executor, ExecutorHandle, Scope, TaskError, TaskFuture};
