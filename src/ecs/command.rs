//! The deferred command buffer (§4.4): the only conduit for structural mutation
//! during a parallel batch. Builders only ever touch the buffer's own stream; the
//! store is not consulted until [`CommandBuffer::flush`] replays it on one thread.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::ecs::component::{Component, ComponentTypeName, Instance};
use crate::ecs::entity::EntityId;
use crate::ecs::error::CommandError;
use crate::ecs::store::Store;

/// A component value queued for attachment, with its name resolution deferred to
/// flush time so an `ADD_TO_NEW`/`ADD_COMP` caller can omit it when the type was
/// registered with [`Store::register`].
struct PendingComponent {
    type_id: TypeId,
    name: Option<ComponentTypeName>,
    data: Box<dyn Any + Send + Sync>,
}

impl PendingComponent {
    fn new<T: Component>(name: Option<ComponentTypeName>, data: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name,
            data: Box::new(data),
        }
    }
}

enum Op {
    Spawn {
        token: usize,
        explicit_id: Option<EntityId>,
    },
    AddToNew {
        token: usize,
        component: PendingComponent,
    },
    AddComp {
        entity: EntityId,
        component: PendingComponent,
    },
    RmComp {
        entity: EntityId,
        name: ComponentTypeName,
    },
    RmAll {
        entity: EntityId,
    },
    Destroy {
        entity: EntityId,
    },
    Defer(Box<dyn FnOnce(&Arc<Store>) + Send>),
    Emit {
        name: String,
        payload: Box<dyn Any + Send + Sync>,
    },
}

/// An append-only log of deferred mutations, mergeable across threads and replayed
/// sequentially at flush time.
#[derive(Default)]
pub struct CommandBuffer {
    ops: Vec<Op>,
    next_token: usize,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.next_token = 0;
    }

    /// Queues a `SPAWN` and returns a fluent builder for attaching components to it.
    pub fn spawn(&mut self) -> SpawnBuilder<'_> {
        self.spawn_with_id(None)
    }

    /// `SPAWN` with an explicit id, destroying whatever currently lives there.
    pub fn spawn_with_id(&mut self, id: EntityId) -> SpawnBuilder<'_> {
        self.spawn_with_id_opt(Some(id))
    }

    fn spawn_with_id_opt(&mut self, explicit_id: Option<EntityId>) -> SpawnBuilder<'_> {
        let token = self.next_token;
        self.next_token += 1;
        self.ops.push(Op::Spawn { token, explicit_id });
        SpawnBuilder { buffer: self, token }
    }

    /// A fluent builder targeting an existing entity by id.
    pub fn entity(&mut self, id: EntityId) -> EntityCommands<'_> {
        EntityCommands { buffer: self, entity: id }
    }

    pub fn destroy(&mut self, id: EntityId) {
        self.ops.push(Op::Destroy { entity: id });
    }

    /// Queues a callable to run on the flush thread, after every op enqueued before
    /// it in this stream and before every op enqueued after.
    pub fn defer<F>(&mut self, callback: F)
    where
        F: FnOnce(&Arc<Store>) + Send + 'static,
    {
        self.ops.push(Op::Defer(Box::new(callback)));
    }

    /// Queues an event payload under `name`, batched with any others under the same
    /// name from this buffer or one merged into it.
    pub fn emit<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, payload: T) {
        self.ops.push(Op::Emit {
            name: name.into(),
            payload: Box::new(payload),
        });
    }

    /// Appends `other`'s stream after this buffer's, renumbering its spawn tokens so
    /// they remain distinct. Per §4.4, this is equivalent to running this buffer's
    /// stream then `other`'s.
    pub fn merge(&mut self, other: CommandBuffer) {
        let offset = self.next_token;
        self.next_token += other.next_token;
        for op in other.ops {
            let op = match op {
                Op::Spawn { token, explicit_id } => Op::Spawn {
                    token: token + offset,
                    explicit_id,
                },
                Op::AddToNew { token, component } => Op::AddToNew {
                    token: token + offset,
                    component,
                },
                other => other,
            };
            self.ops.push(op);
        }
    }

    /// Replays the stream in order against `store`, then dispatches each event
    /// name's batched payloads with a single listener lookup. Clears the stream.
    /// Returns the non-fatal conditions encountered (missing spawn, vanished
    /// entity, unresolved component name) for callers that want to inspect them.
    pub fn flush(&mut self, store: &Arc<Store>) -> Vec<CommandError> {
        let ops = std::mem::take(&mut self.ops);
        self.next_token = 0;

        let mut errors = Vec::new();
        let mut tokens: HashMap<usize, EntityId> = HashMap::new();
        let mut events: HashMap<String, Vec<Box<dyn Any + Send + Sync>>> = HashMap::new();

        for op in ops {
            match op {
                Op::Spawn { token, explicit_id } => {
                    let entity = store.create_entity(explicit_id);
                    tokens.insert(token, entity.id());
                }
                Op::AddToNew { token, component } => {
                    let Some(&id) = tokens.get(&token) else {
                        warn!("ADD_TO_NEW with no preceding SPAWN in this stream");
                        errors.push(CommandError::NoCurrentSpawn);
                        continue;
                    };
                    apply_add(store, id, component, &mut errors);
                }
                Op::AddComp { entity, component } => {
                    if !store.has_entity(entity) {
                        warn!("command targeted vanished entity {entity}");
                        errors.push(CommandError::VanishedEntity(entity));
                        continue;
                    }
                    apply_add(store, entity, component, &mut errors);
                }
                Op::RmComp { entity, name } => {
                    if !store.remove_component(entity, &name) {
                        debug!("remove_component: {name} was not attached to {entity}");
                    }
                }
                Op::RmAll { entity } => {
                    store.remove_all_components(entity);
                }
                Op::Destroy { entity } => {
                    store.remove_entity(entity);
                }
                Op::Defer(callback) => callback(store),
                Op::Emit { name, payload } => events.entry(name).or_default().push(payload),
            }
        }

        for (name, payloads) in &events {
            store.events().dispatch_batch(name, payloads);
        }

        errors
    }
}

fn apply_add(
    store: &Arc<Store>,
    id: EntityId,
    component: PendingComponent,
    errors: &mut Vec<CommandError>,
) {
    let Some(name) = component
        .name
        .clone()
        .or_else(|| store.name_for_type(component.type_id))
    else {
        warn!("no component name given and none could be deduced for this type");
        errors.push(CommandError::UnresolvedComponentName);
        return;
    };
    store.add_component(id, Instance::from_boxed(name, component.data));
}

/// A fluent sub-scope for attaching components to the entity a `SPAWN` will create.
/// Never touches the store itself; it only appends to the owning buffer's stream.
pub struct SpawnBuilder<'a> {
    buffer: &'a mut CommandBuffer,
    token: usize,
}

impl<'a> SpawnBuilder<'a> {
    /// Queues an `ADD_TO_NEW` with an explicit name.
    pub fn with<T: Component>(self, name: impl Into<ComponentTypeName>, data: T) -> Self {
        self.buffer.ops.push(Op::AddToNew {
            token: self.token,
            component: PendingComponent::new(Some(name.into()), data),
        });
        self
    }

    /// Queues an `ADD_TO_NEW` with no explicit name; resolved at flush time from
    /// the store's type registry.
    pub fn with_registered<T: Component>(self, data: T) -> Self {
        self.buffer.ops.push(Op::AddToNew {
            token: self.token,
            component: PendingComponent::new(None, data),
        });
        self
    }
}

/// A fluent sub-scope for queuing operations against one explicit entity id.
pub struct EntityCommands<'a> {
    buffer: &'a mut CommandBuffer,
    entity: EntityId,
}

impl<'a> EntityCommands<'a> {
    pub fn add<T: Component>(self, name: impl Into<ComponentTypeName>, data: T) -> Self {
        self.buffer.ops.push(Op::AddComp {
            entity: self.entity,
            component: PendingComponent::new(Some(name.into()), data),
        });
        self
    }

    pub fn add_registered<T: Component>(self, data: T) -> Self {
        self.buffer.ops.push(Op::AddComp {
            entity: self.entity,
            component: PendingComponent::new(None, data),
        });
        self
    }

    pub fn remove(self, name: impl Into<ComponentTypeName>) -> Self {
        self.buffer.ops.push(Op::RmComp {
            entity: self.entity,
            name: name.into(),
        });
        self
    }

    pub fn remove_all(self) -> Self {
        self.buffer.ops.push(Op::RmAll { entity: self.entity });
        self
    }

    pub fn destroy(self) {
        self.buffer.ops.push(Op::Destroy { entity: self.entity });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Health {
        value: i32,
    }

    // S4 - sequential consistency
    #[test]
    fn defer_observes_prior_ops_in_the_same_stream() {
        let store = Store::new();
        let e = store.create_entity(None);
        let observed = Arc::new(AtomicBool::new(true));

        let mut cmds = CommandBuffer::new();
        cmds.destroy(e.id());
        let flag = Arc::clone(&observed);
        let id = e.id();
        cmds.defer(move |store| {
            flag.store(store.has_entity(id), Ordering::SeqCst);
        });

        assert!(store.has_entity(e.id()));
        let errors = cmds.flush(&store);
        assert!(errors.is_empty());
        assert!(!store.has_entity(e.id()));
        assert!(!observed.load(Ordering::SeqCst));
    }

    #[test]
    fn spawn_builder_attaches_components_to_the_new_entity() {
        let store = Store::new();
        let mut cmds = CommandBuffer::new();
        cmds.spawn().with("Health", Health { value: 10 });
        cmds.flush(&store);

        let ids = store.view(&"Health".into());
        assert_eq!(ids.len(), 1);
        assert_eq!(
            store
                .get_component(ids[0], &"Health".into())
                .unwrap()
                .downcast_ref::<Health>()
                .unwrap()
                .value,
            10
        );
    }

    #[test]
    fn add_to_new_without_a_spawn_is_non_fatal() {
        let store = Store::new();
        let mut cmds = CommandBuffer::new();
        cmds.ops.push(Op::AddToNew {
            token: 999,
            component: PendingComponent::new(Some("Health".into()), Health { value: 1 }),
        });
        let errors = cmds.flush(&store);
        assert_eq!(errors, vec![CommandError::NoCurrentSpawn]);
    }

    #[test]
    fn add_comp_targeting_a_destroyed_entity_is_non_fatal() {
        let store = Store::new();
        let e = store.create_entity(None);
        store.remove_entity(e.id());

        let mut cmds = CommandBuffer::new();
        cmds.entity(e.id()).add("Health", Health { value: 1 });
        let errors = cmds.flush(&store);
        assert_eq!(errors, vec![CommandError::VanishedEntity(e.id())]);
    }

    #[test]
    fn merge_runs_as_if_sequenced_after() {
        let store = Store::new();
        let mut a = CommandBuffer::new();
        let mut b = CommandBuffer::new();

        a.spawn().with("Health", Health { value: 1 });
        b.spawn().with("Health", Health { value: 2 });
        a.merge(b);
        a.flush(&store);

        let mut values: Vec<i32> = store
            .view(&"Health".into())
            .into_iter()
            .map(|id| {
                store
                    .get_component(id, &"Health".into())
                    .unwrap()
                    .downcast_ref::<Health>()
                    .unwrap()
                    .value
            })
            .collect();
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn event_batch_preserves_insertion_order_within_a_name() {
        let store = Store::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        store.events().add_listener("score", move |payload| {
            s.lock().unwrap().push(*payload.downcast_ref::<i32>().unwrap());
        });

        let mut cmds = CommandBuffer::new();
        cmds.emit("score", 1i32);
        cmds.emit("score", 2i32);
        cmds.emit("score", 3i32);
        cmds.flush(&store);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn clear_drops_queued_ops_without_running_them() {
        let store = Store::new();
        let mut cmds = CommandBuffer::new();
        cmds.spawn().with("Health", Health { value: 1 });
        cmds.clear();
        assert!(cmds.is_empty());
        cmds.flush(&store);
        assert!(store.view(&"Health".into()).is_empty());
    }
}
