// Entity/component/global store exposed to handlers.
//
// The world is deliberately minimal: entities keyed by `EntityId`, each with
// a type tag and a map of named components, plus a map of named globals.
// Component and global values are `AnyBlob`s, so the kernel can deep-clone
// them for snapshots and hand them back through a checked downcast without
// knowing their concrete types.
//
// Adding an entity with an id that already exists replaces it. Entities are
// never removed implicitly.
//
// See also: `blob.rs` for the clone/downcast contract, `snapshot.rs` for the
// composite snapshot that embeds `WorldSnapshot`.
//
// **Critical constraint: determinism.** Everything is stored in `BTreeMap`s
// so iteration order (and therefore snapshot encoding and hashing) is stable.

use crate::blob::{AnyBlob, Blob};
use serde::{Deserialize, Serialize, Serializer};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct Entity {
    id: EntityId,
    #[serde(rename = "type")]
    kind: String,
    components: BTreeMap<String, AnyBlob>,
}

impl Entity {
    pub fn new(id: EntityId, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            components: BTreeMap::new(),
        }
    }

    /// Builder form of `add_component`.
    pub fn with_component<T: Blob>(mut self, name: impl Into<String>, value: T) -> Self {
        self.add_component(name, value);
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Insert or replace the component stored under `name`.
    pub fn add_component<T: Blob>(&mut self, name: impl Into<String>, value: T) {
        self.components.insert(name.into(), AnyBlob::new(value));
    }

    /// The component under `name`, if present and of type `T`.
    pub fn component<T: Any>(&self, name: &str) -> Option<&T> {
        self.components.get(name)?.downcast_ref::<T>()
    }

    pub fn component_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.components.get_mut(name)?.downcast_mut::<T>()
    }

    /// Returns whether a component was removed.
    pub fn remove_component(&mut self, name: &str) -> bool {
        self.components.remove(name).is_some()
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Component names in sorted order.
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize)]
pub struct World {
    #[serde(serialize_with = "entities_as_list")]
    entities: BTreeMap<EntityId, Entity>,
    globals: BTreeMap<String, AnyBlob>,
}

fn entities_as_list<S: Serializer>(
    entities: &BTreeMap<EntityId, Entity>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(entities.values())
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity, returning any entity it replaced.
    pub fn add_entity(&mut self, entity: Entity) -> Option<Entity> {
        self.entities.insert(entity.id, entity)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Entities in ascending id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Shorthand for `entity(id)?.component::<T>(name)`.
    pub fn component<T: Any>(&self, id: EntityId, name: &str) -> Option<&T> {
        self.entity(id)?.component::<T>(name)
    }

    pub fn component_mut<T: Any>(&mut self, id: EntityId, name: &str) -> Option<&mut T> {
        self.entity_mut(id)?.component_mut::<T>(name)
    }

    pub fn set_global<T: Blob>(&mut self, key: impl Into<String>, value: T) {
        self.globals.insert(key.into(), AnyBlob::new(value));
    }

    pub fn global<T: Any>(&self, key: &str) -> Option<&T> {
        self.globals.get(key)?.downcast_ref::<T>()
    }

    pub fn global_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.globals.get_mut(key)?.downcast_mut::<T>()
    }

    pub fn remove_global(&mut self, key: &str) -> bool {
        self.globals.remove(key).is_some()
    }

    pub fn global_keys(&self) -> impl Iterator<Item = &str> {
        self.globals.keys().map(String::as_str)
    }

    /// Deep copy of every entity, component, and global.
    pub fn capture_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            world: self.clone(),
        }
    }

    /// Replace all contents with a deep copy of `snapshot`.
    pub fn restore_snapshot(&mut self, snapshot: &WorldSnapshot) {
        *self = snapshot.world.clone();
    }
}

/// Isolated, read-only copy of a `World`.
///
/// Serializes as `{entities: [{id, type, components}], globals}` with
/// entities sorted by id and components/globals sorted by key.
#[derive(Clone, Debug, Serialize)]
#[serde(transparent)]
pub struct WorldSnapshot {
    world: World,
}

impl WorldSnapshot {
    /// Read access to the captured state.
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn fingerprint(&self) -> serde_json::Result<u64> {
        crate::snapshot::fingerprint(self)
    }
}
