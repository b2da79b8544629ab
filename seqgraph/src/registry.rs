//! Context registry: several independently built graphs in one process.
//!
//! [`ContextRegistry`] is a plain value, so tests and embedders can own as
//! many independent registries as they like. [`with_global`] additionally
//! provides one process-wide registry per backend type for code that has
//! no registry to pass around; it is created on first use and lives until
//! process exit.
//!
//! Contexts are never removed: one context per loaded model, for the life
//! of the registry.

#![allow(clippy::must_use_candidate)]

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{LazyLock, Mutex, PoisonError};

use crate::backend::DeviceBackend;
use crate::config::{ContextConfig, Mode};
use crate::context::Context;
use crate::error::Error;
use crate::objects::LayerBindingRegistry;
use crate::Result;

/// Identifier of a context within its registry. Ids increase strictly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub(crate) usize);

impl ContextId {
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `id → Context` table with one current context.
pub struct ContextRegistry<B: DeviceBackend> {
    contexts: BTreeMap<ContextId, Context<B>>,
    current: Option<ContextId>,
    next_id: usize,
    layer_bindings: LayerBindingRegistry,
}

impl<B: DeviceBackend> Default for ContextRegistry<B> {
    fn default() -> Self {
        Self {
            contexts: BTreeMap::new(),
            current: None,
            next_id: 0,
            layer_bindings: LayerBindingRegistry::new(),
        }
    }
}

impl<B: DeviceBackend> ContextRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context in `mode` on `device_id` and make it current.
    ///
    /// # Errors
    /// Returns an error if the device resources cannot be created. The
    /// registry is left unchanged.
    pub fn create(&mut self, mode: Mode, device_id: usize) -> Result<ContextId> {
        self.create_with(ContextConfig::new(mode, device_id))
    }

    /// Create a context from `config` and make it current.
    ///
    /// # Errors
    /// See [`create`](Self::create).
    pub fn create_with(&mut self, config: ContextConfig) -> Result<ContextId> {
        Ok(self.insert(Context::new(config)?))
    }

    /// Store an already constructed context and make it current.
    pub fn insert(&mut self, context: Context<B>) -> ContextId {
        let id = ContextId(self.next_id);
        self.next_id += 1;
        tracing::debug!(
            id = id.0,
            mode = %context.mode(),
            device = context.device_id(),
            "context registered"
        );
        self.contexts.insert(id, context);
        self.current = Some(id);
        id
    }

    /// Make `id` the current context.
    ///
    /// # Errors
    /// [`Error::ContextNotFound`] if `id` is unknown; the current context
    /// does not change.
    pub fn set_current(&mut self, id: ContextId) -> Result<()> {
        if !self.contexts.contains_key(&id) {
            return Err(Error::ContextNotFound(id));
        }
        tracing::debug!(from = ?self.current.map(ContextId::get), to = id.0, "current context switched");
        self.current = Some(id);
        Ok(())
    }

    /// The current context; `None` only before the first create.
    pub fn current(&self) -> Option<&Context<B>> {
        self.contexts.get(&self.current?)
    }

    pub fn current_mut(&mut self) -> Option<&mut Context<B>> {
        self.contexts.get_mut(&self.current?)
    }

    pub fn current_id(&self) -> Option<ContextId> {
        self.current
    }

    pub fn get(&self, id: ContextId) -> Option<&Context<B>> {
        self.contexts.get(&id)
    }

    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut Context<B>> {
        self.contexts.get_mut(&id)
    }

    /// Registered ids in creation order.
    pub fn ids(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.contexts.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Handles kept alive for managed-language layer wrappers.
    pub fn layer_bindings(&self) -> &LayerBindingRegistry {
        &self.layer_bindings
    }

    pub fn layer_bindings_mut(&mut self) -> &mut LayerBindingRegistry {
        &mut self.layer_bindings
    }
}

/// One registry per backend type, keyed by `TypeId`.
type GlobalMap = HashMap<TypeId, Box<dyn Any + Send>>;

static GLOBAL: LazyLock<Mutex<GlobalMap>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Run `f` against the process-wide registry for backend `B`.
///
/// The registry is created empty on first use. Calls are serialised by a
/// lock; `f` must not call `with_global` again.
///
/// A panic inside `f` (a construction fault in one graph) propagates to the
/// caller but leaves the registry usable for later calls.
#[allow(clippy::missing_panics_doc)]
pub fn with_global<B: DeviceBackend, R>(f: impl FnOnce(&mut ContextRegistry<B>) -> R) -> R {
    // A poisoned lock only means a previous closure panicked; the map itself
    // is never left half-updated.
    let mut map = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner);
    let entry = map
        .entry(TypeId::of::<B>())
        .or_insert_with(|| Box::new(ContextRegistry::<B>::new()));
    let registry = entry
        .downcast_mut::<ContextRegistry<B>>()
        .expect("global registry stored under the wrong backend type");
    f(registry)
}
