//! Typed registries for resources that do not fit the node/layer model.
//!
//! - [`ObjectRegistry`]: per-context `name → value` map for sharing things
//!   like precomputed lookup tables between unrelated layers. Values are
//!   stored type-erased and checked on retrieval, so a lookup can fail with
//!   "not found" or "type mismatch" but never hands back the wrong type.
//! - [`LayerBindingRegistry`]: `(name, id) → handle` map that keeps
//!   externally owned layer wrappers alive for as long as the registry.

#![allow(clippy::must_use_candidate)]

use std::any::{self, Any};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::Result;

/// Type-erased value plus the name of its concrete type, for diagnostics.
struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Named shared objects scoped to one context.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: HashMap<String, Entry>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`.
    ///
    /// Returns `true` if an existing object with that name was replaced.
    pub fn register<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) -> bool {
        self.register_arc(name, Arc::new(value))
    }

    /// Store an already shared value under `name`.
    pub fn register_arc<T: Any + Send + Sync>(
        &mut self,
        name: impl Into<String>,
        value: Arc<T>,
    ) -> bool {
        let name = name.into();
        tracing::trace!(name = %name, ty = any::type_name::<T>(), "register object");
        self.objects
            .insert(
                name,
                Entry {
                    value,
                    type_name: any::type_name::<T>(),
                },
            )
            .is_some()
    }

    /// Retrieve the object stored under `name` as a `T`.
    ///
    /// # Errors
    /// [`Error::ObjectNotFound`] if nothing is stored under `name`,
    /// [`Error::ObjectTypeMismatch`] if the stored value is not a `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let entry = self
            .objects
            .get(name)
            .ok_or_else(|| Error::ObjectNotFound(name.to_string()))?;
        Arc::clone(&entry.value)
            .downcast::<T>()
            .map_err(|_| Error::ObjectTypeMismatch {
                name: name.to_string(),
                stored: entry.type_name,
                requested: any::type_name::<T>(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Handle kept alive on behalf of a managed-language wrapper.
pub type LayerHandle = Arc<dyn Any + Send + Sync>;

/// `(layer name, layer id) → handle` registry.
///
/// Entries are never evicted: while the registry lives, a registered
/// wrapper must be treated as reachable.
#[derive(Default)]
pub struct LayerBindingRegistry {
    layers: HashMap<(String, i64), LayerHandle>,
}

impl LayerBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `handle` alive under `(layer_name, layer_id)`, replacing any
    /// previous handle for that key.
    pub fn regist_pybind_layer(
        &mut self,
        layer_name: impl Into<String>,
        layer_id: i64,
        handle: LayerHandle,
    ) {
        self.layers.insert((layer_name.into(), layer_id), handle);
    }

    /// Handle registered under `(layer_name, layer_id)`, if any.
    pub fn get_pybind_layer(&self, layer_name: &str, layer_id: i64) -> Option<LayerHandle> {
        self.layers
            .get(&(layer_name.to_string(), layer_id))
            .map(Arc::clone)
    }

    /// Like [`get_pybind_layer`](Self::get_pybind_layer), downcast to `T`.
    ///
    /// Returns `None` if the key is unknown or the handle is not a `T`.
    pub fn get_pybind_layer_as<T: Any + Send + Sync>(
        &self,
        layer_name: &str,
        layer_id: i64,
    ) -> Option<Arc<T>> {
        self.get_pybind_layer(layer_name, layer_id)?
            .downcast::<T>()
            .ok()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
