//! The entity table, component store, and the three indices the spec requires to
//! always agree with each other: `has(e, n) <=> n in entity_index[e] <=> e in
//! component_store[n]`.
//!
//! Structural mutation (`add_component`, `remove_component`, entity creation and
//! destruction) is meant to run on a single thread at a time — either a test calling
//! the store directly, or the scheduler's end-of-tick command flush. During a
//! parallel batch the store is only ever read, which is why every map here is a
//! `DashMap`: cheap concurrent reads with sharded locking, and no contention at all
//! once a batch has started since nothing is structurally changing.

use std::any::TypeId;
use std::sync::{Arc, RwLock};

use dashmap::{DashMap, DashSet};
use log::{debug, warn};

use crate::ecs::cache::CacheRegistry;
use crate::ecs::component::{Component, ComponentTypeName, Instance, NameRegistry};
use crate::ecs::entity::{Allocator, Entity, EntityId, INVALID};
use crate::ecs::event::EventDispatcher;

/// A reference to an attached component, borrowed directly out of the store.
pub type ComponentRef<'a> = dashmap::mapref::one::Ref<'a, (ComponentTypeName, EntityId), Instance>;
/// A mutable reference to an attached component, borrowed directly out of the store.
pub type ComponentRefMut<'a> =
    dashmap::mapref::one::RefMut<'a, (ComponentTypeName, EntityId), Instance>;

/// Observes structural changes to components. Registered via [`Store::add_observer`].
/// The reactive query cache is wired in separately (it needs to run before any other
/// observer sees a half-updated index); this trait is for everything else the design
/// notes call out (diagnostics, a snapshot layer wanting to invalidate a dirty flag).
pub trait StoreObserver: Send + Sync {
    fn on_component_added(&self, _entity: EntityId, _name: &ComponentTypeName) {}
    fn on_component_removed(&self, _entity: EntityId, _name: &ComponentTypeName) {}
}

/// The ECS data store: entities, components, and their indices.
pub struct Store {
    entities: RwLock<EntityTable>,
    components: DashMap<(ComponentTypeName, EntityId), Instance>,
    type_index: DashMap<ComponentTypeName, DashSet<EntityId>>,
    entity_index: DashMap<EntityId, DashSet<ComponentTypeName>>,
    caches: RwLock<CacheRegistry>,
    names: RwLock<NameRegistry>,
    observers: RwLock<Vec<Arc<dyn StoreObserver>>>,
    events: EventDispatcher,
}

struct EntityTable {
    allocator: Allocator,
    live: std::collections::HashSet<EntityId>,
}

impl Store {
    /// Constructs a new, empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entities: RwLock::new(EntityTable {
                allocator: Allocator::new(),
                live: std::collections::HashSet::new(),
            }),
            components: DashMap::new(),
            type_index: DashMap::new(),
            entity_index: DashMap::new(),
            caches: RwLock::new(CacheRegistry::default()),
            names: RwLock::new(NameRegistry::default()),
            observers: RwLock::new(Vec::new()),
            events: EventDispatcher::default(),
        })
    }

    /// Registers `T`'s display name so commands that omit an explicit component name
    /// can deduce it from the instance's type (see [`crate::ecs::command`]).
    pub fn register<T: Component>(&self, name: impl Into<ComponentTypeName>) {
        self.names.write().unwrap().register::<T>(name);
    }

    pub(crate) fn name_for_type(&self, type_id: TypeId) -> Option<ComponentTypeName> {
        self.names.read().unwrap().name_for(type_id)
    }

    pub fn add_observer(&self, observer: Arc<dyn StoreObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    // ---- entity table ----------------------------------------------------

    /// Creates a new entity. If `id` is `None` (or `Some(0)`), the next id is taken
    /// from the internal counter; otherwise the supplied id is used, destroying
    /// whatever was already living there first.
    ///
    /// Panics if an explicit id is `0` is passed as `Some(0)` — treated the same as
    /// `None` per spec, so this never actually panics; ids are validated only in
    /// that `u32` already bounds the range.
    pub fn create_entity(self: &Arc<Self>, id: Option<EntityId>) -> Entity {
        let requested = id.unwrap_or(INVALID);
        if requested != INVALID && self.has_entity(requested) {
            self.remove_entity(requested);
        }

        let mut table = self.entities.write().unwrap();
        let id = if requested == INVALID {
            table.allocator.alloc()
        } else {
            table.allocator.observe(requested);
            requested
        };
        table.live.insert(id);
        drop(table);

        Entity::new(id, self)
    }

    /// Removes all of the entity's components (firing remove notifications), then
    /// deletes the entity row. Returns whether the entity existed.
    pub fn remove_entity(&self, id: EntityId) -> bool {
        if !self.has_entity(id) {
            return false;
        }
        self.remove_all_components(id);
        self.entities.write().unwrap().live.remove(&id);
        true
    }

    pub fn get_entity(self: &Arc<Self>, id: EntityId) -> Option<Entity> {
        self.has_entity(id).then(|| Entity::new(id, self))
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        id != INVALID && self.entities.read().unwrap().live.contains(&id)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.read().unwrap().live.iter().copied().collect()
    }

    /// The highest id the allocator has ever handed out or observed. Snapshot
    /// collaborators restore this watermark so id allocation resumes correctly.
    pub fn watermark(&self) -> EntityId {
        self.entities.read().unwrap().allocator.watermark()
    }

    /// Restores the allocator's watermark, e.g. after loading a snapshot.
    pub fn set_watermark(&self, id: EntityId) {
        self.entities.write().unwrap().allocator.observe(id);
    }

    // ---- components --------------------------------------------------------

    /// Attaches `instance` to `id`. Fails (returns `false`, no panic) if `id` is not
    /// live. Attaching an instance that is already attached to something is a
    /// programming error and panics (see [`Instance::attach`]).
    pub fn add_component(&self, id: EntityId, instance: Instance) -> bool {
        if !self.has_entity(id) {
            warn!("add_component: entity {id} is not live");
            return false;
        }
        let name = instance.name().clone();
        instance.attach(id);

        self.components.insert((name.clone(), id), instance);
        self.entity_index
            .entry(id)
            .or_default()
            .insert(name.clone());
        self.type_index
            .entry(name.clone())
            .or_default()
            .insert(id);

        for observer in self.observers.read().unwrap().iter() {
            observer.on_component_added(id, &name);
        }
        self.caches.write().unwrap().on_component_changed(self, id, &name, true);
        debug!("attached {name} to entity {id}");
        true
    }

    /// Detaches `name` from `id`. Returns whether it was attached.
    pub fn remove_component(&self, id: EntityId, name: &ComponentTypeName) -> bool {
        let removed = self.components.remove(&(name.clone(), id)).is_some();
        if !removed {
            return false;
        }
        if let Some(names) = self.entity_index.get(&id) {
            names.remove(name);
        }
        if let Some(ids) = self.type_index.get(name) {
            ids.remove(&id);
        }

        for observer in self.observers.read().unwrap().iter() {
            observer.on_component_removed(id, name);
        }
        self.caches.write().unwrap().on_component_changed(self, id, name, false);
        debug!("detached {name} from entity {id}");
        true
    }

    /// Detaches every component currently on `id`. Iterates over a snapshot of the
    /// entity's component-name set so the live map is never mutated mid-iteration.
    pub fn remove_all_components(&self, id: EntityId) -> bool {
        let Some(names) = self.entity_index.get(&id) else {
            return false;
        };
        let snapshot: Vec<ComponentTypeName> = names.iter().map(|n| n.clone()).collect();
        drop(names);
        for name in snapshot {
            self.remove_component(id, &name);
        }
        self.entity_index.remove(&id);
        true
    }

    pub fn get_component<'a>(
        &'a self,
        id: EntityId,
        name: &ComponentTypeName,
    ) -> Option<ComponentRef<'a>> {
        self.components.get(&(name.clone(), id))
    }

    pub fn get_component_mut<'a>(
        &'a self,
        id: EntityId,
        name: &ComponentTypeName,
    ) -> Option<ComponentRefMut<'a>> {
        self.components.get_mut(&(name.clone(), id))
    }

    pub fn has_component(&self, id: EntityId, name: &ComponentTypeName) -> bool {
        self.entity_index
            .get(&id)
            .is_some_and(|names| names.contains(name))
    }

    /// The set of component names currently attached to `id`.
    pub fn components_of(&self, id: EntityId) -> Vec<ComponentTypeName> {
        self.entity_index
            .get(&id)
            .map(|names| names.iter().map(|n| n.clone()).collect())
            .unwrap_or_default()
    }

    /// A linear scan of every entity carrying `name`, no filtering, no cache.
    pub fn view(&self, name: &ComponentTypeName) -> Vec<EntityId> {
        self.type_index
            .get(name)
            .map(|ids| ids.iter().map(|id| *id).collect())
            .unwrap_or_default()
    }

    /// The smallest-by-cardinality of the given component types, used by cache
    /// construction to minimise admission checks.
    pub(crate) fn smallest_type(&self, names: &[ComponentTypeName]) -> Option<ComponentTypeName> {
        names
            .iter()
            .min_by_key(|name| {
                self.type_index
                    .get(*name)
                    .map(|ids| ids.len())
                    .unwrap_or(0)
            })
            .cloned()
    }

    /// Returns the materialised, reactively maintained view for the normalised
    /// signature `names`. The handle's identity is stable: later mutations are
    /// reflected in place for anyone still holding it.
    ///
    /// `names` must be non-empty. A cache keyed by the empty signature would, per
    /// its own definition (every live entity is a superset of the empty set), have
    /// to track every entity regardless of its components — including ones with no
    /// components at all — which would mean wiring cache maintenance into entity
    /// creation and destruction, not just component add/remove. No caller needs
    /// that, so it is rejected here instead of silently building a cache that can
    /// only ever observe entities through component-change notifications.
    pub fn multi_view(self: &Arc<Self>, names: &[ComponentTypeName]) -> crate::ecs::cache::View {
        assert!(!names.is_empty(), "multi_view requires a non-empty signature");
        let mut signature: Vec<ComponentTypeName> = names.to_vec();
        signature.sort();
        signature.dedup();

        let cache = {
            let mut caches = self.caches.write().unwrap();
            caches.get_or_build(self, signature)
        };
        crate::ecs::cache::View::new(cache, Arc::clone(self))
    }

    /// A query builder bound to this store. See [`crate::ecs::query::Query`].
    pub fn query(self: &Arc<Self>) -> crate::ecs::query::Query {
        crate::ecs::query::Query::new(Arc::clone(self))
    }

    /// Drops every entity and component, returning the store to the state
    /// [`Store::new`] produces (the name registry, observers, and allocator
    /// watermark are left alone; they describe the store's shape, not its data).
    ///
    /// Goes through [`Store::remove_entity`] for each live entity rather than
    /// clearing the maps directly, so every cache and observer still holding a
    /// handle sees the same per-component removal notifications it would see from
    /// any other teardown — a `View` taken before `clear()` reflects the clear
    /// exactly as it would a manual destroy of every entity. The now-empty cache
    /// registrations are dropped afterward since nothing will rebuild them until a
    /// fresh `multi_view` call asks.
    pub fn clear(&self) {
        for id in self.entity_ids() {
            self.remove_entity(id);
        }
        self.caches.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Health {
        value: i32,
    }
    struct Pos;
    struct Mana;

    fn health(name: &str, v: i32) -> Instance {
        Instance::new(name, Health { value: v })
    }

    // S1 - CRUD
    #[test]
    fn crud_lifecycle() {
        let store = Store::new();
        let e = store.create_entity(None);

        assert!(store.add_component(e.id(), health("Health", 100)));
        assert!(store.has_component(e.id(), &"Health".into()));
        assert!(!store.has_component(e.id(), &"Mana".into()));
        assert_eq!(
            store
                .get_component(e.id(), &"Health".into())
                .unwrap()
                .downcast_ref::<Health>()
                .unwrap()
                .value,
            100
        );

        {
            let mut comp = store.get_component_mut(e.id(), &"Health".into()).unwrap();
            comp.downcast_mut::<Health>().unwrap().value = 50;
        }
        assert_eq!(
            store
                .get_component(e.id(), &"Health".into())
                .unwrap()
                .downcast_ref::<Health>()
                .unwrap()
                .value,
            50
        );

        assert!(store.remove_component(e.id(), &"Health".into()));
        assert!(!store.has_component(e.id(), &"Health".into()));

        let mut handle = e.clone();
        assert!(handle.destroy());
        assert!(!handle.valid());
    }

    #[test]
    fn three_indices_always_agree() {
        let store = Store::new();
        let e = store.create_entity(None);
        assert!(store.add_component(e.id(), health("Health", 1)));

        assert!(store.has_component(e.id(), &"Health".into()));
        assert!(store.components_of(e.id()).contains(&"Health".into()));
        assert!(store.view(&"Health".into()).contains(&e.id()));

        store.remove_component(e.id(), &"Health".into());
        assert!(!store.has_component(e.id(), &"Health".into()));
        assert!(!store.components_of(e.id()).contains(&"Health".into()));
        assert!(!store.view(&"Health".into()).contains(&e.id()));
    }

    #[test]
    fn create_entity_with_explicit_id_destroys_existing() {
        let store = Store::new();
        let e = store.create_entity(Some(42));
        store.add_component(e.id(), health("Health", 5));

        let e2 = store.create_entity(Some(42));
        assert_eq!(e2.id(), 42);
        assert!(!store.has_component(42, &"Health".into()));
    }

    #[test]
    fn remove_entity_cascades_components() {
        let store = Store::new();
        let e = store.create_entity(None);
        store.add_component(e.id(), health("Health", 1));
        store.add_component(e.id(), Instance::new("Pos", Pos));

        assert!(store.remove_entity(e.id()));
        assert!(!store.has_component(e.id(), &"Health".into()));
        assert!(!store.has_component(e.id(), &"Pos".into()));
        assert!(!store.has_entity(e.id()));
    }

    #[test]
    #[should_panic(expected = "already attached")]
    fn attaching_attached_instance_panics() {
        let store = Store::new();
        let e1 = store.create_entity(None);
        let e2 = store.create_entity(None);
        let inst = health("Health", 1);
        inst.attach(e1.id());
        store.add_component(e2.id(), inst);
    }

    #[test]
    fn add_component_to_dead_entity_fails_without_panic() {
        let store = Store::new();
        assert!(!store.add_component(999, health("Health", 1)));
    }

    #[test]
    fn watermark_advances_with_explicit_ids() {
        let store = Store::new();
        store.create_entity(Some(100));
        let next = store.create_entity(None);
        assert!(next.id() > 100);
    }

    #[test]
    fn clear_drops_entities_components_and_caches_but_keeps_the_allocator_watermark() {
        let store = Store::new();
        let e = store.create_entity(None);
        store.add_component(e.id(), health("Health", 1));
        let view = store.multi_view(&["Health".into()]);
        assert_eq!(view.len(), 1);

        let watermark_before = store.watermark();
        store.clear();

        assert!(!store.has_entity(e.id()));
        assert!(store.entity_ids().is_empty());
        assert!(store.view(&"Health".into()).is_empty());
        assert_eq!(view.len(), 0);
        assert_eq!(store.watermark(), watermark_before);

        let fresh = store.create_entity(None);
        assert!(fresh.id() > e.id());
    }

    #[test]
    fn mana_is_never_confused_with_health() {
        let store = Store::new();
        let e = store.create_entity(None);
        store.add_component(e.id(), health("Health", 1));
        store.add_component(e.id(), Instance::new("Mana", Mana));
        assert_eq!(store.components_of(e.id()).len(), 2);
    }
}
