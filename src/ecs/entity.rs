//! Entity identifiers and the handle type that ties them back to a store.
//!
//! Unlike an archetype ECS that recycles slots behind a generation counter, this
//! store's entity ids are a monotonic watermark: `0` is reserved to mean "no entity",
//! and a destroyed id is simply gone until either the counter passes it again or a
//! caller explicitly re-requests it (which cascades a destroy of whatever is still
//! there first). See [`crate::ecs::store::Store::create_entity`].

use std::sync::{Arc, Weak};

use crate::ecs::store::Store;

/// An opaque identifier for an entity. `0` means "no entity / invalidated handle".
pub type EntityId = u32;

/// The id reserved to mean "no entity".
pub const INVALID: EntityId = 0;

/// A handle to an entity: its id plus a non-owning reference to the store that owns
/// it. Cheap to copy (aside from the `Weak` bump).
#[derive(Clone)]
pub struct Entity {
    id: EntityId,
    store: Weak<Store>,
}

impl Entity {
    pub(crate) fn new(id: EntityId, store: &Arc<Store>) -> Self {
        Self {
            id,
            store: Arc::downgrade(store),
        }
    }

    /// An invalidated handle bound to no store.
    pub fn invalid() -> Self {
        Self {
            id: INVALID,
            store: Weak::new(),
        }
    }

    /// The entity's id. `0` if this handle has been invalidated.
    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// `true` if the id is non-zero and the owning store still lists it as live.
    pub fn valid(&self) -> bool {
        self.id != INVALID && self.store.upgrade().is_some_and(|s| s.has_entity(self.id))
    }

    /// Destroys the entity through its owning store and zeroes this handle's id.
    /// Returns `false` if the store is gone or the entity was already dead.
    pub fn destroy(&mut self) -> bool {
        let removed = self
            .store
            .upgrade()
            .is_some_and(|store| store.remove_entity(self.id));
        self.id = INVALID;
        removed
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity").field("id", &self.id).finish()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Allocates monotonically increasing entity ids and tracks the live set.
///
/// There is no dead-pool recycling: destroying an entity just removes it from the
/// live set. The counter only ever advances, whether by normal allocation or by a
/// caller explicitly requesting a specific id ahead of the watermark.
#[derive(Default)]
pub struct Allocator {
    next_id: EntityId,
}

impl Allocator {
    pub const fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Allocates the next id from the counter, advancing it.
    pub fn alloc(&mut self) -> EntityId {
        let id = self.next_id.max(1);
        self.next_id = id.checked_add(1).expect("entity id space exhausted");
        id
    }

    /// Records that `id` is now in use so the counter never hands it out again.
    pub fn observe(&mut self, id: EntityId) {
        if id >= self.next_id {
            self.next_id = id.checked_add(1).unwrap_or(EntityId::MAX);
        }
    }

    /// The highest id ever allocated or observed, i.e. the allocation watermark.
    pub fn watermark(&self) -> EntityId {
        self.next_id.saturating_sub(1)
    }
}
