//! A simple fork-join thread pool used to fan work out across workers.
//!
//! This is the worker pool behind the scheduler's batch execution: each batch is a
//! scatter of independent system bodies followed by a join, and within a parallel
//! system, each view record is itself one more scatter/join step. Neither level needs
//! work-stealing or async scheduling, just a bounded set of OS threads and a way to
//! block until a group of tasks has finished.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::marker::PhantomData;
use std::thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A thread pool that tasks can be submitted to from any thread.
pub struct Executor {
    sender: Sender<Message>,
    workers: Vec<Worker>,
}

enum Message {
    Task(Task),
    Shutdown,
}

struct Worker {
    handle: Option<thread::JoinHandle<()>>,
}

impl Executor {
    /// Creates a new executor with the specified number of worker threads.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "thread pool size must be greater than 0");

        let (sender, receiver) = unbounded();
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            workers.push(Worker::new(receiver.clone()));
        }

        Executor { sender, workers }
    }

    /// Creates a single-threaded executor. Useful for deterministic tests.
    pub fn single_threaded() -> Self {
        Self::new(1)
    }

    /// Returns the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Executes a task on the thread pool without waiting for it.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.sender.send(Message::Task(Box::new(f)));
    }

    /// Returns a cloneable handle that can submit tasks from other threads.
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            sender: self.sender.clone(),
        }
    }

    /// Creates a scope for spawning tasks that may borrow non-`'static` data.
    /// All tasks spawned through the scope are guaranteed to have completed before
    /// this call returns: this is the fork-join primitive every batch uses.
    pub fn scope<'env, F, R>(&'env self, f: F) -> R
    where
        F: FnOnce(&Scope<'env>) -> R,
    {
        let scope = Scope {
            executor: self,
            _marker: PhantomData,
        };
        f(&scope)
    }

    /// Runs `body(index)` for every `index` in `0..size` across the pool and blocks
    /// the caller until all invocations finish. This is the `group_task` primitive a
    /// batch uses to scatter a set of systems, and a parallel system uses to scatter
    /// its matched view records.
    pub fn group_task<F>(&self, size: usize, body: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        self.scope(|scope| {
            for index in 0..size {
                let body = &body;
                scope.spawn(move || body(index));
            }
        });
    }
}

/// A scope bound to an [`Executor`]; tasks spawned on it may borrow data from the
/// enclosing stack frame because the scope's [`Drop`] blocks until every task spawned
/// through it has completed.
pub struct Scope<'env> {
    executor: &'env Executor,
    _marker: PhantomData<std::cell::Cell<&'env ()>>,
}

impl<'env> Scope<'env> {
    /// Spawns a scoped task. The task is guaranteed to complete before the scope ends.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(f);
        // Safety: the Scope's Drop blocks until every worker has processed a marker
        // task sent after this one, so `'env` data referenced by `task` outlives its
        // execution despite the 'static bound required to store it in the channel.
        let task: Box<dyn FnOnce() + Send + 'static> = unsafe { std::mem::transmute(task) };
        let _ = self.executor.sender.send(Message::Task(task));
    }

    /// Spawns a scoped task and returns a future for its result.
    pub fn spawn_with_result<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'env,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            let _ = tx.send(f());
        });
        let task: Box<dyn FnOnce() + Send + 'static> = unsafe { std::mem::transmute(task) };
        let _ = self.executor.sender.send(Message::Task(task));
        TaskFuture { receiver: rx }
    }
}

impl<'env> Drop for Scope<'env> {
    fn drop(&mut self) {
        let (tx, rx) = crossbeam::channel::bounded::<()>(1);
        for _ in 0..self.executor.workers.len().max(1) {
            let tx = tx.clone();
            let marker: Task = Box::new(move || {
                let _ = tx.send(());
            });
            let _ = self.executor.sender.send(Message::Task(marker));
        }
        for _ in 0..self.executor.workers.len().max(1) {
            let _ = rx.recv();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Worker {
    fn new(receiver: Receiver<Message>) -> Self {
        let handle = thread::spawn(move || loop {
            match receiver.recv() {
                Ok(Message::Task(task)) => task(),
                Ok(Message::Shutdown) | Err(_) => break,
            }
        });
        Worker {
            handle: Some(handle),
        }
    }
}

/// A handle that can submit tasks to an [`Executor`] from another thread.
#[derive(Clone)]
pub struct ExecutorHandle {
    sender: Sender<Message>,
}

impl ExecutorHandle {
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.sender.send(Message::Task(Box::new(f)));
    }
}

/// The result of a spawned task, fetched with [`TaskFuture::wait`].
pub struct TaskFuture<T> {
    receiver: Receiver<T>,
}

impl<T> TaskFuture<T> {
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().map_err(|_| TaskError::TaskFailed)
    }
}

/// Error type for task execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// The task failed to produce a result (the executor was dropped, or it panicked).
    TaskFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn execute_runs_tasks() {
        let executor = Executor::new(4);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            executor.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(executor);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn scope_waits_for_borrowed_tasks() {
        let executor = Executor::new(4);
        let mut data = vec![1, 2, 3, 4];
        executor.scope(|s| {
            for item in &mut data {
                s.spawn(|| *item *= 2);
            }
        });
        assert_eq!(data, vec![2, 4, 6, 8]);
    }

    #[test]
    fn group_task_invokes_every_index() {
        let executor = Executor::new(4);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        executor.group_task(5, |index| {
            seen.lock().unwrap().push(index);
        });
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn spawn_with_result_collects_values() {
        let executor = Executor::new(2);
        let sum = executor.scope(|s| {
            let futures: Vec<_> = (0..5).map(|i| s.spawn_with_result(move || i * 2)).collect();
            futures.into_iter().map(|f| f.wait().unwrap()).sum::<i32>()
        });
        assert_eq!(sum, 0 + 2 + 4 + 6 + 8);
    }

    #[test]
    fn single_threaded_executor_still_runs_tasks() {
        let executor = Executor::single_threaded();
        assert_eq!(executor.size(), 1);
        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = Arc::clone(&ran);
        executor.scope(|s| s.spawn(move || ran_clone.fetch_add(1, Ordering::SeqCst)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
