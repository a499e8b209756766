//! The reactive, incrementally maintained query cache.
//!
//! A cache is keyed by a normalised (sorted, deduplicated) signature of component
//! names. Its `results` are exactly the live entities whose component set is a
//! superset of the signature, kept correct in place as components are added and
//! removed rather than recomputed from scratch on every query.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ecs::component::ComponentTypeName;
use crate::ecs::entity::{Entity, EntityId};
use crate::ecs::store::Store;

/// The normalised signature that keys a cache: sorted, deduplicated component names.
pub type Signature = Vec<ComponentTypeName>;

/// A single materialised cache for one signature.
#[derive(Default)]
pub struct Cache {
    signature: Signature,
    results: Vec<EntityId>,
    index: HashMap<EntityId, usize>,
}

impl Cache {
    fn build(store: &Store, signature: Signature) -> Self {
        assert!(!signature.is_empty(), "Cache requires a non-empty signature");
        let mut cache = Cache {
            signature,
            results: Vec::new(),
            index: HashMap::new(),
        };

        // Enumerate the smallest component type's entities and check the rest.
        let anchor = store
            .smallest_type(&cache.signature)
            .expect("non-empty signature");
        for id in store.view(&anchor) {
            if cache
                .signature
                .iter()
                .all(|name| store.has_component(id, name))
            {
                cache.admit(id);
            }
        }
        cache
    }

    fn admit(&mut self, id: EntityId) {
        if self.index.contains_key(&id) {
            return;
        }
        self.index.insert(id, self.results.len());
        self.results.push(id);
    }

    /// Evicts `id` via swap-with-last-then-pop, keeping eviction O(1).
    fn evict(&mut self, id: EntityId) {
        let Some(&idx) = self.index.get(&id) else {
            return;
        };
        let last = self.results.len() - 1;
        self.results.swap(idx, last);
        self.results.pop();
        self.index.remove(&id);
        if idx < self.results.len() {
            self.index.insert(self.results[idx], idx);
        }
    }

    /// Called for every structural component change. Ignores names outside this
    /// cache's signature (normal control flow per the error taxonomy).
    fn on_component_changed(&mut self, store: &Store, entity: EntityId, name: &ComponentTypeName, added: bool) {
        if !self.signature.contains(name) {
            return;
        }
        if added {
            if !self.index.contains_key(&entity)
                && self
                    .signature
                    .iter()
                    .all(|n| store.has_component(entity, n))
            {
                self.admit(entity);
            }
        } else if self.index.contains_key(&entity) {
            self.evict(entity);
        }
    }

    pub fn signature(&self) -> &[ComponentTypeName] {
        &self.signature
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn entities(&self) -> Vec<EntityId> {
        self.results.clone()
    }
}

/// Holds every cache keyed by its normalised signature, and dispatches store change
/// notifications to the ones that care.
#[derive(Default)]
pub struct CacheRegistry {
    caches: HashMap<Signature, Arc<Mutex<Cache>>>,
}

impl CacheRegistry {
    /// Returns the cache for `signature`, building it lazily on first request.
    pub fn get_or_build(&mut self, store: &Store, signature: Signature) -> Arc<Mutex<Cache>> {
        self.caches
            .entry(signature.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Cache::build(store, signature))))
            .clone()
    }

    /// Informs every registered cache of a single component change.
    pub fn on_component_changed(
        &mut self,
        store: &Store,
        entity: EntityId,
        name: &ComponentTypeName,
        added: bool,
    ) {
        for cache in self.caches.values() {
            cache.lock().unwrap().on_component_changed(store, entity, name, added);
        }
    }

    pub fn clear(&mut self) {
        self.caches.clear();
    }
}

/// A stable handle onto one cache's materialised results. Cloning a `View` and
/// holding onto it is how a caller observes later mutations "in place": both clones
/// share the same underlying `Cache`.
#[derive(Clone)]
pub struct View {
    cache: Arc<Mutex<Cache>>,
    store: Arc<Store>,
}

impl View {
    pub(crate) fn new(cache: Arc<Mutex<Cache>>, store: Arc<Store>) -> Self {
        Self { cache, store }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.cache.lock().unwrap().contains(id)
    }

    pub fn signature(&self) -> Signature {
        self.cache.lock().unwrap().signature().to_vec()
    }

    /// Snapshots the matched entity ids at this instant.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.cache.lock().unwrap().entities()
    }

    /// Builds view records for the current snapshot of matched entities.
    pub fn records(&self) -> Vec<crate::ecs::query::ViewRecord> {
        self.entity_ids()
            .into_iter()
            .map(|id| {
                crate::ecs::query::ViewRecord::new(
                    Entity::new(id, &self.store),
                    Arc::clone(&self.store),
                    self.signature(),
                )
            })
            .collect()
    }
}
