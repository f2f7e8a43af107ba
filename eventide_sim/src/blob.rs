// Type-erased, deep-cloneable values for components, globals, and typed
// event payloads.
//
// The kernel never inspects component or global contents. It needs exactly
// three things from them: a deep clone (so snapshots are isolated from the
// live world), a safe downcast back to the concrete type, and a JSON encoding
// (so snapshots can be fingerprinted and exported). `Blob` bundles those, and
// is implemented automatically for every `Clone + Debug + Send + Serialize`
// type. `AnyBlob` is the owning wrapper stored in the world and in events.
//
// A type's `Clone` must produce an independent value. Anything shared through
// `Arc`/`Rc` inside a component leaks between the live world and its
// snapshots.

use serde::{Serialize, Serializer};
use std::any::Any;
use std::fmt;

/// Capability contract for values the kernel stores opaquely.
pub trait Blob: Any + fmt::Debug + Send {
    fn clone_blob(&self) -> Box<dyn Blob>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T> Blob for T
where
    T: Any + Clone + fmt::Debug + Send + Serialize,
{
    fn clone_blob(&self) -> Box<dyn Blob> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Owned, type-erased blob. Cloning deep-copies the inner value.
pub struct AnyBlob(Box<dyn Blob>);

impl AnyBlob {
    pub fn new<T: Blob>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        (*self.0).as_any_mut().downcast_mut::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        (*self.0).as_any().is::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        (*self.0).type_name()
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        (*self.0).to_json()
    }
}

impl Clone for AnyBlob {
    fn clone(&self) -> Self {
        Self((*self.0).clone_blob())
    }
}

impl fmt::Debug for AnyBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl Serialize for AnyBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self.to_json().map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}
