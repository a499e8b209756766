//! Component types and the name that keys them into the store.
//!
//! Components are dynamically typed from the store's point of view: the store never
//! inspects a component's interior (serialization, equality, anything domain specific
//! is left to the caller), it only needs a type-erased box plus the
//! [`ComponentTypeName`] that keys it. Any `'static + Send + Sync` value can be a
//! component.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::ecs::entity::{EntityId, INVALID};

/// A blanket marker for anything usable as component data.
pub trait Component: Any + Send + Sync {}
impl<T: Any + Send + Sync> Component for T {}

/// A short symbolic name that identifies a component type within one store.
/// Cheap to clone (an `Arc<str>` under the hood) so it can be used freely as a map
/// key without re-allocating.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeName(Arc<str>);

impl ComponentTypeName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ComponentTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for ComponentTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl From<&str> for ComponentTypeName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
impl From<String> for ComponentTypeName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A component instance: its type-erased data plus the bookkeeping the store needs
/// to enforce "attached to at most one entity at a time".
///
/// A freshly constructed instance is *free* (owner id `0`). Attaching it to an
/// entity is the only transition to "attached"; attaching an already-attached
/// instance is a programming error (see module docs on [`crate::ecs::error`]).
pub struct Instance {
    name: ComponentTypeName,
    owner: AtomicU32,
    data: Box<dyn Any + Send + Sync>,
}

impl Instance {
    /// Constructs a free (unattached) component instance.
    pub fn new<T: Component>(name: impl Into<ComponentTypeName>, data: T) -> Self {
        Self {
            name: name.into(),
            owner: AtomicU32::new(INVALID),
            data: Box::new(data),
        }
    }

    /// Constructs a free instance from an already-boxed, already-erased value, used
    /// by the command buffer once it has resolved a deduced name at flush time.
    pub(crate) fn from_boxed(name: ComponentTypeName, data: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            name,
            owner: AtomicU32::new(INVALID),
            data,
        }
    }

    pub fn name(&self) -> &ComponentTypeName {
        &self.name
    }

    pub fn owner(&self) -> Option<EntityId> {
        match self.owner.load(Ordering::Acquire) {
            INVALID => None,
            id => Some(id),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.owner.load(Ordering::Acquire) != INVALID
    }

    /// Stamps the instance as attached to `entity`. Panics (programming error) if
    /// it is already attached to something.
    pub(crate) fn attach(&self, entity: EntityId) {
        let previous = self.owner.swap(entity, Ordering::AcqRel);
        assert_eq!(
            previous, INVALID,
            "component already attached to entity {previous}"
        );
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut()
    }

    pub fn type_id(&self) -> TypeId {
        (*self.data).type_id()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish()
    }
}

/// Maps a component's Rust type to the [`ComponentTypeName`] it was registered
/// under, used to deduce a name when a command omits one explicitly (see
/// `ADD_TO_NEW`/`ADD_COMP` in [`crate::ecs::command`]).
#[derive(Default)]
pub struct NameRegistry {
    by_type: std::collections::HashMap<TypeId, ComponentTypeName>,
}

impl NameRegistry {
    pub fn register<T: Component>(&mut self, name: impl Into<ComponentTypeName>) {
        self.by_type.insert(TypeId::of::<T>(), name.into());
    }

    pub fn name_for(&self, type_id: TypeId) -> Option<ComponentTypeName> {
        self.by_type.get(&type_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Health {
        value: i32,
    }

    #[test]
    fn fresh_instance_is_unattached() {
        let inst = Instance::new("Health", Health { value: 100 });
        assert!(!inst.is_attached());
        assert_eq!(inst.owner(), None);
    }

    #[test]
    fn attach_stamps_owner() {
        let inst = Instance::new("Health", Health { value: 100 });
        inst.attach(7);
        assert_eq!(inst.owner(), Some(7));
        assert!(inst.is_attached());
    }

    #[test]
    #[should_panic(expected = "already attached")]
    fn attaching_twice_panics() {
        let inst = Instance::new("Health", Health { value: 100 });
        inst.attach(1);
        inst.attach(2);
    }

    #[test]
    fn downcast_recovers_typed_data() {
        let inst = Instance::new("Health", Health { value: 42 });
        assert_eq!(inst.downcast_ref::<Health>().unwrap().value, 42);
        assert!(inst.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn name_registry_deduces_registered_types() {
        let mut reg = NameRegistry::default();
        reg.register::<Health>("Health");
        assert_eq!(
            reg.name_for(TypeId::of::<Health>()),
            Some(ComponentTypeName::new("Health"))
        );
        assert_eq!(reg.name_for(TypeId::of::<u32>()), None);
    }
}
