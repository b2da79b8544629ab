//! Layer scope stack
//!
//! Tracks the chain of layers currently open during graph construction.
//! The top of the stack is the attribution target for every node and
//! operator registered through the [`Context`].
//!
//! Unbalanced exits are client bugs and panic: continuing would silently
//! corrupt layer ranges.

#![allow(clippy::must_use_candidate)]

use std::ops::{Deref, DerefMut};

use crate::backend::DeviceBackend;
use crate::context::Context;
use crate::element::LayerId;

/// LIFO of open layers, mirroring nested enter/exit calls.
#[derive(Debug, Default, Clone)]
pub struct LayerScopeStack {
    stack: Vec<LayerId>,
}

impl LayerScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `layer` onto the stack.
    pub fn push(&mut self, layer: LayerId) {
        self.stack.push(layer);
    }

    /// Pop the top layer.
    ///
    /// # Panics
    /// Panics if the stack is empty (exit without a matching enter).
    pub fn pop(&mut self) -> LayerId {
        self.stack
            .pop()
            .expect("exit_layer called with no open layer (unmatched exit)")
    }

    /// Innermost open layer.
    pub fn current(&self) -> Option<LayerId> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        self.stack.contains(&layer)
    }

    /// Open layers, outermost first.
    pub fn open_layers(&self) -> &[LayerId] {
        &self.stack
    }
}

/// Guard returned by [`Context::layer_scope`].
///
/// Derefs to the context so registrations made through it land inside the
/// layer. Dropping the guard exits the layer, also when unwinding.
pub struct LayerScope<'a, B: DeviceBackend> {
    ctx: &'a mut Context<B>,
    layer: LayerId,
}

impl<'a, B: DeviceBackend> LayerScope<'a, B> {
    pub(crate) fn new(ctx: &'a mut Context<B>, layer: LayerId) -> Self {
        Self { ctx, layer }
    }

    /// Layer this guard keeps open.
    pub fn layer(&self) -> LayerId {
        self.layer
    }
}

impl<B: DeviceBackend> Deref for LayerScope<'_, B> {
    type Target = Context<B>;

    fn deref(&self) -> &Context<B> {
        self.ctx
    }
}

impl<B: DeviceBackend> DerefMut for LayerScope<'_, B> {
    fn deref_mut(&mut self) -> &mut Context<B> {
        self.ctx
    }
}

impl<B: DeviceBackend> Drop for LayerScope<'_, B> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // Unwind the stack down to (and including) our layer without
            // asserting, so a construction fault never leaves it dangling.
            self.ctx.unwind_scope_to(self.layer);
            return;
        }
        let top = self.ctx.last_layer();
        assert_eq!(
            top,
            Some(self.layer),
            "layer scope for {:?} dropped while {:?} is the innermost open layer",
            self.layer,
            top,
        );
        self.ctx.exit_layer();
    }
}
