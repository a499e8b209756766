//! The scheduler (§4.7): owns descriptors and the last build's batch plan, and
//! drives one tick by scattering each batch across the worker pool before flushing
//! every descriptor's command buffers at end-of-tick (§5's chosen flush point).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::core::tasks::Executor;
use crate::ecs::component::ComponentTypeName;
use crate::ecs::error::{CommandError, ScheduleError};
use crate::ecs::store::Store;
use crate::ecs::system::{Access, DependencyInfo, SystemDescriptor};

use super::builder;

/// Owns a set of named systems, the batch plan built from their declared
/// dependencies and access tables, and the worker pool that executes them.
pub struct Scheduler {
    descriptors: HashMap<String, Mutex<SystemDescriptor>>,
    order: Vec<String>,
    batches: Vec<Vec<String>>,
    executor: Executor,
}

impl Scheduler {
    /// Builds a scheduler backed by a worker pool of `pool_size` threads.
    pub fn new(pool_size: usize) -> Self {
        Self::with_executor(Executor::new(pool_size))
    }

    pub fn with_executor(executor: Executor) -> Self {
        Self {
            descriptors: HashMap::new(),
            order: Vec::new(),
            batches: Vec::new(),
            executor,
        }
    }

    /// Registers descriptors. Each must declare a non-empty access table; an
    /// empty one is a programming error and panics, per §7.
    pub fn add_systems(&mut self, systems: Vec<SystemDescriptor>) {
        for system in systems {
            assert!(
                !system.access().is_empty(),
                "system '{}' declares an empty access table",
                system.name()
            );
            let name = system.name().to_string();
            self.order.push(name.clone());
            self.descriptors.insert(name, Mutex::new(system));
        }
    }

    /// Runs the dependency builder and stores the resulting batch plan. A single
    /// registered descriptor short-circuits to a single-element single-batch plan.
    /// Idempotent: each call recomputes from scratch.
    pub fn build(&mut self) -> Vec<ScheduleError> {
        if self.order.len() == 1 {
            self.batches = vec![self.order.clone()];
            return Vec::new();
        }

        let snapshot: HashMap<String, SystemDescriptorView> = self
            .descriptors
            .iter()
            .map(|(name, lock)| (name.clone(), SystemDescriptorView::from(&*lock.lock().unwrap())))
            .collect();

        let (batches, errors) = builder::build(&snapshot, &self.order);
        for error in &errors {
            warn!("scheduler build: {error}");
        }
        self.batches = batches;
        errors
    }

    /// For each batch in order: scatter its systems across the worker pool and
    /// join; once every batch has run, flush every descriptor's command buffers
    /// against `store`. `delta` is accepted for parity with the tick contract but
    /// not otherwise interpreted by the core.
    pub fn run(&mut self, store: &Arc<Store>, delta: f64) -> Vec<CommandError> {
        let _ = delta;
        let executor = &self.executor;
        let descriptors = &self.descriptors;

        for batch in &self.batches {
            executor.group_task(batch.len(), |index| {
                let name = &batch[index];
                if let Some(lock) = descriptors.get(name) {
                    lock.lock().unwrap().run_tick(store, executor);
                }
            });
        }

        let mut errors = Vec::new();
        for name in &self.order {
            if let Some(lock) = self.descriptors.get(name) {
                errors.extend(lock.lock().unwrap().flush(store));
            }
        }
        errors
    }

    /// Drops every descriptor, the batch plan, and any dependency/conflict state.
    pub fn clear(&mut self) {
        self.descriptors.clear();
        self.order.clear();
        self.batches.clear();
    }

    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }
}

/// A read-only snapshot of the fields [`builder::build`] needs, taken once under
/// lock so the builder itself never has to touch the descriptor mutexes.
pub(crate) struct SystemDescriptorView {
    access: HashMap<ComponentTypeName, Access>,
    before: Vec<String>,
    after: Vec<String>,
    group: i32,
}

impl From<&SystemDescriptor> for SystemDescriptorView {
    fn from(descriptor: &SystemDescriptor) -> Self {
        Self {
            access: descriptor.access().clone(),
            before: descriptor.before_edges().to_vec(),
            after: descriptor.after_edges().to_vec(),
            group: descriptor.group_id(),
        }
    }
}

impl DependencyInfo for SystemDescriptorView {
    fn access(&self) -> &HashMap<ComponentTypeName, Access> {
        &self.access
    }
    fn before_edges(&self) -> &[String] {
        &self.before
    }
    fn after_edges(&self) -> &[String] {
        &self.after
    }
    fn group_id(&self) -> i32 {
        self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::Instance;

    struct Val {
        data: i32,
    }

    // S5 - scheduler dependency order
    #[test]
    fn consumer_after_producer_sees_incremented_values_each_frame() {
        let store = Store::new();
        for _ in 0..10 {
            let e = store.create_entity(None);
            store.add_component(e.id(), Instance::new("Val", Val { data: 0 }));
        }

        let sum = Arc::new(std::sync::atomic::AtomicI32::new(0));
        let sum_clone = Arc::clone(&sum);

        let mut scheduler = Scheduler::new(4);
        scheduler.add_systems(vec![
            SystemDescriptor::new("Producer", |view, _cmds| {
                view.get_mut::<Val>(&"Val".into()).unwrap().data += 1;
            })
            .writes("Val"),
            SystemDescriptor::new("Consumer", move |view, _cmds| {
                sum_clone.fetch_add(
                    view.get::<Val>(&"Val".into()).unwrap().data,
                    std::sync::atomic::Ordering::SeqCst,
                );
            })
            .reads("Val")
            .after("Producer"),
        ]);
        scheduler.build();

        sum.store(0, std::sync::atomic::Ordering::SeqCst);
        scheduler.run(&store, 1.0 / 60.0);
        assert_eq!(sum.load(std::sync::atomic::Ordering::SeqCst), 10);

        sum.store(0, std::sync::atomic::Ordering::SeqCst);
        scheduler.run(&store, 1.0 / 60.0);
        assert_eq!(sum.load(std::sync::atomic::Ordering::SeqCst), 20);
    }

    #[test]
    fn single_descriptor_short_circuits_to_one_batch() {
        let mut scheduler = Scheduler::new(2);
        scheduler.add_systems(vec![SystemDescriptor::new("Solo", |_, _| {}).writes("X")]);
        scheduler.build();
        assert_eq!(scheduler.batches(), &[vec!["Solo".to_string()]]);
    }

    #[test]
    fn clear_drops_descriptors_and_batches() {
        let mut scheduler = Scheduler::new(2);
        scheduler.add_systems(vec![SystemDescriptor::new("Solo", |_, _| {}).writes("X")]);
        scheduler.build();
        scheduler.clear();
        assert!(scheduler.batches().is_empty());
    }

    #[test]
    #[should_panic(expected = "empty access table")]
    fn system_with_empty_access_table_panics() {
        let mut scheduler = Scheduler::new(1);
        scheduler.add_systems(vec![SystemDescriptor::new("Bare", |_, _| {})]);
    }
}
