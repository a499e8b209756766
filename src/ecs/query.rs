//! The immediate-mode query builder (§4.3): `with` / `without` / `any_of` /
//! `filter`, executed either against the reactive cache (the `with` anchor) or a
//! union scan (the `any_of` anchor).

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::ecs::component::ComponentTypeName;
use crate::ecs::entity::{Entity, EntityId};
use crate::ecs::store::{ComponentRef, ComponentRefMut, Store};

/// The plain-data half of a query: just the clauses, with no store or predicate
/// attached. Cloned into a [`crate::ecs::system::SystemDescriptor`] so the same
/// criteria can be re-run against the store on every tick.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct QuerySpec {
    pub(crate) with: Vec<ComponentTypeName>,
    pub(crate) without: Vec<ComponentTypeName>,
    pub(crate) any_of: Vec<ComponentTypeName>,
}

impl QuerySpec {
    /// The component names this query anchors on: `with` if declared, else `any_of`.
    /// This is what a system's access table is checked against.
    pub fn anchor_names(&self) -> Vec<ComponentTypeName> {
        if !self.with.is_empty() {
            self.with.clone()
        } else {
            self.any_of.clone()
        }
    }
}

type Predicate = dyn Fn(&ViewRecord) -> bool + Send + Sync;

/// A query bound to a store, built fluently and executed with [`Query::run`].
pub struct Query {
    store: Arc<Store>,
    spec: QuerySpec,
    filter: Option<Arc<Predicate>>,
}

impl Query {
    pub(crate) fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            spec: QuerySpec::default(),
            filter: None,
        }
    }

    pub(crate) fn from_parts(store: Arc<Store>, spec: QuerySpec, filter: Option<Arc<Predicate>>) -> Self {
        Self { store, spec, filter }
    }

    pub fn with(mut self, name: impl Into<ComponentTypeName>) -> Self {
        self.spec.with.push(name.into());
        self
    }

    pub fn without(mut self, name: impl Into<ComponentTypeName>) -> Self {
        self.spec.without.push(name.into());
        self
    }

    pub fn any_of(mut self, name: impl Into<ComponentTypeName>) -> Self {
        self.spec.any_of.push(name.into());
        self
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ViewRecord) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    pub fn spec(&self) -> QuerySpec {
        self.spec.clone()
    }

    /// Executes the query against the store as it stands right now.
    pub fn run(&self) -> Vec<ViewRecord> {
        execute(&self.store, &self.spec, self.filter.as_deref())
    }
}

fn execute(store: &Arc<Store>, spec: &QuerySpec, filter: Option<&Predicate>) -> Vec<ViewRecord> {
    let mut ids: Vec<EntityId> = if !spec.with.is_empty() {
        store.multi_view(&spec.with).entity_ids()
    } else if !spec.any_of.is_empty() {
        let mut seen = HashSet::new();
        for name in &spec.any_of {
            seen.extend(store.view(name));
        }
        seen.into_iter().collect()
    } else {
        // Rule 3: neither anchor given. Returning "everything" is deliberately
        // unsupported.
        Vec::new()
    };

    if !spec.without.is_empty() {
        ids.retain(|id| !spec.without.iter().any(|name| store.has_component(*id, name)));
    }

    // Rule 1: when `with` anchors the query, `any_of` is still a record-level
    // rejection, not just the rule-2 anchor for when `with` is empty.
    if !spec.with.is_empty() && !spec.any_of.is_empty() {
        ids.retain(|id| spec.any_of.iter().any(|name| store.has_component(*id, name)));
    }

    let mut signature = spec.with.clone();
    signature.extend(spec.any_of.iter().cloned());
    signature.sort();
    signature.dedup();

    let mut records: Vec<ViewRecord> = ids
        .into_iter()
        .filter_map(|id| store.get_entity(id))
        .map(|entity| ViewRecord::new(entity, Arc::clone(store), signature.clone()))
        .collect();

    if let Some(predicate) = filter {
        records.retain(predicate);
    }
    records
}

/// Borrows a typed component out of the store for the lifetime of the guard.
pub struct ComponentGuard<'a, T> {
    inner: ComponentRef<'a>,
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T: 'static> Deref for ComponentGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.inner
            .downcast_ref::<T>()
            .expect("component name and requested type disagree")
    }
}

/// The mutable counterpart of [`ComponentGuard`].
pub struct ComponentGuardMut<'a, T> {
    inner: ComponentRefMut<'a>,
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T: 'static> Deref for ComponentGuardMut<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.inner
            .downcast_ref::<T>()
            .expect("component name and requested type disagree")
    }
}
impl<'a, T: 'static> DerefMut for ComponentGuardMut<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner
            .downcast_mut::<T>()
            .expect("component name and requested type disagree")
    }
}

/// One row of a query or cache result: the entity plus lazy, store-backed access to
/// its components by name.
#[derive(Clone)]
pub struct ViewRecord {
    entity: Entity,
    store: Arc<Store>,
    signature: Vec<ComponentTypeName>,
}

impl ViewRecord {
    pub(crate) fn new(entity: Entity, store: Arc<Store>, signature: Vec<ComponentTypeName>) -> Self {
        Self {
            entity,
            store,
            signature,
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn id(&self) -> EntityId {
        self.entity.id()
    }

    /// The component names this record was matched on.
    pub fn signature(&self) -> &[ComponentTypeName] {
        &self.signature
    }

    pub fn has(&self, name: &ComponentTypeName) -> bool {
        self.store.has_component(self.id(), name)
    }

    /// Borrows the named component as `T`, or `None` if it is not attached.
    pub fn get<T: 'static>(&self, name: &ComponentTypeName) -> Option<ComponentGuard<'_, T>> {
        self.store
            .get_component(self.id(), name)
            .map(|inner| ComponentGuard {
                inner,
                _marker: std::marker::PhantomData,
            })
    }

    pub fn get_mut<T: 'static>(&self, name: &ComponentTypeName) -> Option<ComponentGuardMut<'_, T>> {
        self.store
            .get_component_mut(self.id(), name)
            .map(|inner| ComponentGuardMut {
                inner,
                _marker: std::marker::PhantomData,
            })
    }
}
