//! Graph context: registration, validation and the build state machine.
//!
//! A [`Context`] owns one complete graph. Operator and layer code registers
//! nodes and operators into it while it is being constructed; [`Context::build`]
//! then validates the structure, runs the [`MemoryPlanner`] and freezes the
//! graph. After that the execution engine reads node order, arena offsets and
//! the bound stream/BLAS handle.
//!
//! # Lifecycle
//!
//! `Unbuilt → Building → Built`, strictly forward. The first registration
//! moves an unbuilt context to `Building`; a successful `build()` moves it to
//! `Built`. A failed `build()` leaves it in `Building`.
//!
//! Client bugs (unbalanced layer scopes, registering after build, nested
//! regress regions, unknown ids) panic with a descriptive message: a graph
//! built past such a fault would be structurally inconsistent.

#![allow(clippy::must_use_candidate, clippy::missing_panics_doc)]

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use crate::backend::DeviceBackend;
use crate::binder::DeviceBinding;
use crate::config::{ContextConfig, Mode};
use crate::element::{Layer, LayerId, LayerState, Node, NodeDesc, NodeId, OpDesc, OpId, Operator};
use crate::error::Error;
use crate::objects::ObjectRegistry;
use crate::planner::{Lifetime, MemoryPlan, MemoryPlanner};
use crate::regress::{RegressRegion, RegressTracker};
use crate::scope::{LayerScope, LayerScopeStack};
use crate::Result;

/// Where a context is in its build lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// Nothing registered yet.
    Unbuilt,
    /// Accepting registrations.
    Building,
    /// Frozen; memory plan available.
    Built,
}

/// One graph, its memory plan and the device resources it runs on.
pub struct Context<B: DeviceBackend> {
    config: ContextConfig,
    mode: Mode,
    state: BuildState,

    nodes: Vec<Node>,
    ops: Vec<Operator>,
    layers: Vec<Layer>,
    root_layers: Vec<LayerId>,
    scope: LayerScopeStack,
    regress: RegressTracker,

    layer_name_cnt: BTreeMap<String, usize>,
    node_name_cnt: BTreeMap<String, usize>,
    /// Largest single node size seen so far, available before planning.
    max_tensor_size: usize,

    planner: MemoryPlanner,
    plan: Option<MemoryPlan>,
    /// Allocated on first [`Context::arena`] call after build.
    arena: Option<B::Arena>,

    binding: DeviceBinding<B>,
    objects: ObjectRegistry,
}

impl<B: DeviceBackend> Context<B> {
    /// Create a context bound to `config.device_id`.
    ///
    /// # Errors
    /// Returns an error if `config.arena_alignment` is zero or the device,
    /// stream or BLAS handle cannot be created.
    pub fn new(config: ContextConfig) -> Result<Self> {
        if config.arena_alignment == 0 {
            return Err(Error::Other("arena_alignment must be > 0".into()));
        }
        let binding = DeviceBinding::open(config.device_id)?;
        Ok(Self::with_binding(config, binding))
    }

    /// Create a context in `mode` on device `device_id` with default settings.
    ///
    /// # Errors
    /// See [`Context::new`].
    pub fn open(mode: Mode, device_id: usize) -> Result<Self> {
        Self::new(ContextConfig::new(mode, device_id))
    }

    /// Create a context around an existing device binding.
    ///
    /// `config.device_id` is ignored in favour of the binding's device.
    ///
    /// # Panics
    /// Panics if `config.arena_alignment` is zero.
    pub fn with_binding(mut config: ContextConfig, binding: DeviceBinding<B>) -> Self {
        config.device_id = binding.device_id();
        tracing::debug!(mode = %config.mode, device = config.device_id, "context created");
        Self {
            mode: config.mode,
            state: BuildState::Unbuilt,
            nodes: Vec::new(),
            ops: Vec::new(),
            layers: Vec::new(),
            root_layers: Vec::new(),
            scope: LayerScopeStack::new(),
            regress: RegressTracker::default(),
            layer_name_cnt: BTreeMap::new(),
            node_name_cnt: BTreeMap::new(),
            max_tensor_size: 0,
            planner: MemoryPlanner::new(config.arena_alignment),
            plan: None,
            arena: None,
            binding,
            objects: ObjectRegistry::new(),
            config,
        }
    }

    // ---- State and mode ----

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn is_building(&self) -> bool {
        self.state == BuildState::Building
    }

    pub fn is_built(&self) -> bool {
        self.state == BuildState::Built
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_training(&self) -> bool {
        self.mode == Mode::Training
    }

    /// `"Training"`, `"Inference"` or `"Evaluation"`.
    pub fn status_type_str(&self) -> &'static str {
        self.mode.as_str()
    }

    /// Switch a built graph to training mode.
    ///
    /// Node indices and the memory plan are left untouched.
    ///
    /// # Errors
    /// [`Error::NotBuilt`] if the graph has not been built.
    pub fn convert_into_train(&mut self) -> Result<()> {
        self.switch_mode(Mode::Training)
    }

    /// Switch a built graph to evaluation mode.
    ///
    /// # Errors
    /// [`Error::NotBuilt`] if the graph has not been built.
    pub fn convert_into_eval(&mut self) -> Result<()> {
        self.switch_mode(Mode::Evaluation)
    }

    fn switch_mode(&mut self, mode: Mode) -> Result<()> {
        if !self.is_built() {
            return Err(Error::NotBuilt);
        }
        tracing::debug!(from = %self.mode, to = %mode, "mode switched");
        self.mode = mode;
        Ok(())
    }

    /// Move `Unbuilt` to `Building`; panic if already built.
    fn ensure_building(&mut self, what: &str) {
        assert!(
            self.state != BuildState::Built,
            "cannot {what} after the graph has been built"
        );
        if self.state == BuildState::Unbuilt {
            tracing::trace!("graph registration started");
            self.state = BuildState::Building;
        }
    }

    // ---- Layers ----

    /// Create a layer named after `type_name` (`Linear` → `Linear_1`,
    /// `Linear_2`, ...). It joins the forest when first entered.
    pub fn new_layer(&mut self, type_name: &str) -> LayerId {
        assert!(
            !self.is_built(),
            "cannot create layer {type_name} after the graph has been built"
        );
        let name = next_name(&mut self.layer_name_cnt, type_name);
        let id = LayerId(self.layers.len());
        tracing::trace!(layer = %name, "layer created");
        self.layers.push(Layer::new(id, name));
        id
    }

    /// Open `layer`. It becomes a root layer if no layer is open or
    /// `attach_as_root` is set, otherwise a child of the innermost open layer.
    ///
    /// Prefer [`layer_scope`](Self::layer_scope), which exits automatically.
    ///
    /// # Panics
    /// Panics if the graph is built, the layer is unknown, or the layer has
    /// already been entered.
    pub fn enter_layer(&mut self, layer: LayerId, attach_as_root: bool) {
        assert!(
            !self.is_built(),
            "cannot enter a layer after the graph has been built"
        );
        let parent = if attach_as_root {
            None
        } else {
            self.scope.current()
        };

        let entry = self.layer_mut(layer);
        match entry.state {
            LayerState::Detached => {}
            LayerState::Open => panic!("layer {} entered while already open", entry.name),
            LayerState::Closed => panic!("layer {} re-entered after exit", entry.name),
        }
        entry.state = LayerState::Open;
        entry.parent = parent;

        match parent {
            Some(p) => self.layer_mut(p).children.push(layer),
            None => self.root_layers.push(layer),
        }
        self.scope.push(layer);
    }

    /// Close the innermost open layer.
    ///
    /// # Panics
    /// Panics if no layer is open.
    pub fn exit_layer(&mut self) {
        let layer = self.scope.pop();
        self.layer_mut(layer).state = LayerState::Closed;
    }

    /// Enter `layer` and return a guard that exits it on drop.
    pub fn layer_scope(&mut self, layer: LayerId, attach_as_root: bool) -> LayerScope<'_, B> {
        self.enter_layer(layer, attach_as_root);
        LayerScope::new(self, layer)
    }

    /// Exit layers until `layer` has been closed. Used while unwinding.
    pub(crate) fn unwind_scope_to(&mut self, layer: LayerId) {
        if !self.scope.contains(layer) {
            return;
        }
        while let Some(top) = self.scope.current() {
            self.exit_layer();
            if top == layer {
                break;
            }
        }
    }

    /// Innermost open layer.
    pub fn last_layer(&self) -> Option<LayerId> {
        self.scope.current()
    }

    pub fn scope(&self) -> &LayerScopeStack {
        &self.scope
    }

    fn layer_mut(&mut self, id: LayerId) -> &mut Layer {
        let count = self.layers.len();
        self.layers
            .get_mut(id.0)
            .unwrap_or_else(|| panic!("unknown layer {id:?} ({count} layers registered)"))
    }

    // ---- Nodes and operators ----

    /// Register an operator, attributing it to the innermost open layer.
    ///
    /// Every input's liveness is extended to the operator's position (the
    /// index its first output will get). No node index is consumed.
    ///
    /// # Panics
    /// Panics if the graph is built or an input id is unknown.
    pub fn add_op(&mut self, desc: OpDesc) -> OpId {
        self.ensure_building("add an operator");
        let position = self.nodes.len();
        for input in &desc.inputs {
            let node = self.nodes.get_mut(input.0).unwrap_or_else(|| {
                panic!("operator {} reads unknown node {input}", desc.type_name)
            });
            node.last_use = node.last_use.max(position);
        }

        let id = OpId(self.ops.len());
        let layer = self.scope.current();
        let name = next_name(&mut self.node_name_cnt, &desc.type_name);
        tracing::trace!(op = %name, position, "operator registered");

        if let Some(l) = layer {
            self.layer_mut(l).ops.push(id);
        }
        self.ops.push(Operator {
            id,
            name,
            position,
            layer,
            inputs: desc.inputs,
            outputs: Vec::new(),
        });
        id
    }

    /// Register a node, assigning it the next sequence index.
    ///
    /// The node is attributed to the innermost open layer, whose range (and
    /// that of every ancestor) grows to include it. Inside a regress region
    /// the region bounds are updated too.
    ///
    /// # Panics
    /// Panics if the graph is built or the producer id is unknown.
    pub fn add_node(&mut self, desc: NodeDesc) -> NodeId {
        self.ensure_building("add a node");
        let idx = self.nodes.len();
        let id = NodeId(idx);

        if let Some(op) = desc.producer {
            let count = self.ops.len();
            self.ops
                .get_mut(op.0)
                .unwrap_or_else(|| panic!("unknown producer {op:?} ({count} operators registered)"))
                .outputs
                .push(id);
        }

        let in_regress = self.regress.in_region();
        if in_regress {
            self.update_regr_begin(idx);
            self.update_regr_end(idx);
        }

        let layer = self.scope.current();
        if let Some(l) = layer {
            self.layer_mut(l).nodes.push(id);
        }
        let mut ancestor = layer;
        while let Some(l) = ancestor {
            let entry = self.layer_mut(l);
            entry.cover(idx);
            ancestor = entry.parent;
        }

        let name = next_name(&mut self.node_name_cnt, &desc.type_name);
        tracing::trace!(node = %name, idx, bytes = desc.byte_size, "node registered");
        self.max_tensor_size = self.max_tensor_size.max(desc.byte_size);
        self.nodes.push(Node {
            id,
            name,
            byte_size: desc.byte_size,
            last_use: idx,
            layer,
            producer: desc.producer,
            in_regress,
        });
        id
    }

    /// Record that `node` is still read at the current position.
    ///
    /// # Panics
    /// Panics if the graph is built or `node` is unknown.
    pub fn mark_use(&mut self, node: NodeId) {
        self.ensure_building("mark a node use");
        let position = self.nodes.len();
        let entry = self
            .nodes
            .get_mut(node.0)
            .unwrap_or_else(|| panic!("unknown node {node}"));
        entry.last_use = entry.last_use.max(position);
    }

    /// Index the next registered node will receive.
    pub fn node_idx(&self) -> usize {
        self.nodes.len()
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.nodes.last().map(Node::id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn op(&self, id: OpId) -> Option<&Operator> {
        self.ops.get(id.0)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0)
    }

    /// All nodes in execution order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All operators in registration order.
    pub fn ops(&self) -> &[Operator] {
        &self.ops
    }

    /// Every layer that has been entered, in creation order.
    ///
    /// Layers made by [`new_layer`](Self::new_layer) but never entered are
    /// not part of the forest and are skipped; [`layer`](Self::layer) still
    /// finds them by id.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> + '_ {
        self.layers
            .iter()
            .filter(|l| l.state != LayerState::Detached)
    }

    /// Layers without a parent, in the order they were first entered.
    pub fn root_layers(&self) -> &[LayerId] {
        &self.root_layers
    }

    /// Largest single node size registered so far.
    pub fn max_tensor_size(&self) -> usize {
        self.max_tensor_size
    }

    // ---- Regress region ----

    /// Open the regress region.
    ///
    /// # Panics
    /// Panics if a region is already open or the graph is built.
    pub fn regress_begin(&mut self) {
        assert!(
            !self.is_built(),
            "cannot begin a regress region after the graph has been built"
        );
        self.regress.begin();
    }

    /// Close the regress region.
    ///
    /// # Panics
    /// Panics if no region is open.
    pub fn regress_end(&mut self) {
        self.regress.end();
    }

    pub fn in_regress(&self) -> bool {
        self.regress.in_region()
    }

    /// Record `node_idx` as the region start if none is recorded yet.
    pub fn update_regr_begin(&mut self, node_idx: usize) {
        self.regress.update_begin(node_idx);
    }

    /// Extend the region end to cover `node_idx`.
    pub fn update_regr_end(&mut self, node_idx: usize) {
        self.regress.update_end(node_idx);
    }

    pub fn regress_begin_idx(&self) -> Option<usize> {
        self.regress.begin_idx()
    }

    /// Exclusive end of the recorded region.
    pub fn regress_end_idx(&self) -> Option<usize> {
        self.regress.end_idx()
    }

    pub fn regress_region(&self) -> Option<RegressRegion> {
        self.regress.region()
    }

    // ---- Build ----

    /// Validate the graph, plan its memory and freeze it.
    ///
    /// Calling this on a built graph returns the existing plan without
    /// changing anything.
    ///
    /// # Errors
    /// [`Error::Validation`] if a layer is still open, indices are not
    /// contiguous, the regress region is half open or out of bounds, or a
    /// layer's range is not contiguous, or the aligned node sizes do not fit
    /// in one arena. The context stays in `Building`.
    pub fn build(&mut self) -> Result<&MemoryPlan> {
        if self.is_built() {
            tracing::debug!("build called on a built graph; nothing to do");
            return self.plan.as_ref().ok_or(Error::NotBuilt);
        }

        self.validate()?;

        let lifetimes: Vec<Lifetime> = self
            .nodes
            .iter()
            .map(|n| Lifetime {
                index: n.index(),
                size: n.byte_size,
                first_use: n.first_use(),
                last_use: n.last_use,
            })
            .collect();
        let plan = self.planner.plan(&lifetimes, self.regress.region());

        self.state = BuildState::Built;
        tracing::info!(
            nodes = self.nodes.len(),
            ops = self.ops.len(),
            layers = self.layers.len(),
            peak_bytes = plan.peak_bytes(),
            max_tensor_size = self.max_tensor_size,
            "graph built"
        );
        Ok(&*self.plan.insert(plan))
    }

    fn validate(&self) -> Result<()> {
        if let Some(open) = self.scope.current() {
            let names: Vec<&str> = self
                .scope
                .open_layers()
                .iter()
                .map(|l| self.layers[l.0].name.as_str())
                .collect();
            return Err(Error::Validation(format!(
                "layer {} is still open (open layers: {})",
                self.layers[open.0].name,
                names.join(" > ")
            )));
        }

        if let Some((i, node)) = self
            .nodes
            .iter()
            .enumerate()
            .find(|(i, n)| n.index() != *i)
        {
            return Err(Error::Validation(format!(
                "node {} has index {} at position {i}",
                node.name,
                node.index()
            )));
        }

        self.regress
            .validate(self.nodes.len())
            .map_err(Error::Validation)?;

        for layer in &self.layers {
            let Some(range) = layer.range() else {
                continue;
            };
            let owned = self.subtree_node_count(layer.id);
            if range.len() != owned {
                return Err(Error::Validation(format!(
                    "layer {} spans [{}, {}) but owns {owned} nodes; its range is not contiguous",
                    layer.name, range.start, range.end
                )));
            }
        }

        let mut total = 0usize;
        for node in &self.nodes {
            total = self
                .planner
                .aligned_size(node.byte_size)
                .and_then(|size| total.checked_add(size))
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "node {} ({} bytes) overflows the arena address space",
                        node.name, node.byte_size
                    ))
                })?;
        }
        Ok(())
    }

    fn subtree_node_count(&self, root: LayerId) -> usize {
        let mut count = 0;
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            let layer = &self.layers[id.0];
            count += layer.nodes.len();
            pending.extend_from_slice(&layer.children);
        }
        count
    }

    /// The memory plan, once built.
    pub fn plan(&self) -> Option<&MemoryPlan> {
        self.plan.as_ref()
    }

    /// Arena size required by the plan, once built.
    pub fn peak_bytes(&self) -> Option<usize> {
        self.plan.as_ref().map(MemoryPlan::peak_bytes)
    }

    /// Arena offset of `node`, once built.
    pub fn node_offset(&self, node: NodeId) -> Option<usize> {
        self.plan.as_ref()?.offset(node.0)
    }

    /// The temporary-buffer arena, allocated on first call after build.
    ///
    /// # Errors
    /// [`Error::NotBuilt`] before build; device errors if allocation fails.
    pub fn arena(&mut self) -> Result<&B::Arena> {
        if self.arena.is_none() {
            let bytes = self.plan.as_ref().ok_or(Error::NotBuilt)?.peak_bytes();
            let arena = self.binding.alloc_arena(bytes)?;
            tracing::debug!(bytes, device = self.device_id(), "arena allocated");
            self.arena = Some(arena);
        }
        self.arena.as_ref().ok_or(Error::NotBuilt)
    }

    pub fn is_arena_allocated(&self) -> bool {
        self.arena.is_some()
    }

    // ---- Device binding ----

    pub fn binding(&self) -> &DeviceBinding<B> {
        &self.binding
    }

    pub fn device_id(&self) -> usize {
        self.binding.device_id()
    }

    pub fn stream(&self) -> &B::Stream {
        self.binding.stream()
    }

    pub fn blas(&self) -> &B::BlasHandle {
        self.binding.blas()
    }

    /// Replace the stream, rebinding the BLAS handle to it. Returns the
    /// previous stream.
    ///
    /// # Errors
    /// Returns an error if the handle cannot be rebound; nothing changes.
    pub fn set_stream(&mut self, stream: B::Stream) -> Result<B::Stream> {
        self.binding.set_stream(stream)
    }

    // ---- Shared objects ----

    /// Share `object` with other layers of this graph under `name`.
    ///
    /// Returns `true` if an existing object was replaced.
    pub fn register_object<T: Any + Send + Sync>(
        &mut self,
        name: impl Into<String>,
        object: T,
    ) -> bool {
        self.objects.register(name, object)
    }

    /// Retrieve a shared object.
    ///
    /// # Errors
    /// [`Error::ObjectNotFound`] or [`Error::ObjectTypeMismatch`].
    pub fn get_object<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.objects.get(name)
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.objects
    }

    // ---- Diagnostics ----

    /// Human-readable dump of the layer/node forest.
    pub fn draw_all_context(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "context [{}] {:?}: {} nodes, {} ops, {} layers, peak {}",
            self.mode,
            self.state,
            self.nodes.len(),
            self.ops.len(),
            self.layers.len(),
            self.peak_bytes()
                .map_or_else(|| "unplanned".to_string(), |b| format!("{b} bytes")),
        );
        if let Some(region) = self.regress_region() {
            let _ = writeln!(out, "regress region [{}, {})", region.begin, region.end);
        }
        for &root in &self.root_layers {
            self.draw_layer(&mut out, root, 0);
        }
        let loose: Vec<&Node> = self.nodes.iter().filter(|n| n.layer.is_none()).collect();
        if !loose.is_empty() {
            let _ = writeln!(out, "(no layer)");
            for node in loose {
                self.draw_node(&mut out, node, 1);
            }
        }
        out
    }

    fn draw_layer(&self, out: &mut String, id: LayerId, depth: usize) {
        let layer = &self.layers[id.0];
        let indent = "  ".repeat(depth);
        let span = layer
            .range()
            .map_or_else(|| "empty".to_string(), |r| format!("[{}, {})", r.start, r.end));
        let _ = writeln!(out, "{indent}{} {span}", layer.name);
        for op in &layer.ops {
            let op = &self.ops[op.0];
            let _ = writeln!(out, "{indent}  op {} @{}", op.name, op.position);
        }

        // Interleave direct nodes and child layers in index order.
        let mut items: Vec<(usize, Option<NodeId>, Option<LayerId>)> = layer
            .nodes
            .iter()
            .map(|&n| (n.0, Some(n), None))
            .chain(layer.children.iter().map(|&c| {
                let start = self.layers[c.0].range().map_or(usize::MAX, |r| r.start);
                (start, None, Some(c))
            }))
            .collect();
        items.sort_by_key(|&(start, _, _)| start);
        for item in items {
            match item {
                (_, Some(node), _) => self.draw_node(out, &self.nodes[node.0], depth + 1),
                (_, None, Some(child)) => self.draw_layer(out, child, depth + 1),
                _ => {}
            }
        }
    }

    fn draw_node(&self, out: &mut String, node: &Node, depth: usize) {
        let indent = "  ".repeat(depth);
        let offset = self
            .node_offset(node.id)
            .map_or_else(|| "-".to_string(), |o| o.to_string());
        let _ = writeln!(
            out,
            "{indent}{} {} {}B @{offset} live {}..={}{}",
            node.id,
            node.name,
            node.byte_size,
            node.first_use(),
            node.last_use,
            if node.in_regress { " regress" } else { "" },
        );
    }
}

impl<B: DeviceBackend> fmt::Debug for Context<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("device_id", &self.device_id())
            .field("nodes", &self.nodes.len())
            .field("ops", &self.ops.len())
            .field("layers", &self.layers.len())
            .field("peak_bytes", &self.peak_bytes())
            .finish_non_exhaustive()
    }
}

/// Bump the counter for `type_name` and return the disambiguated name.
fn next_name(counters: &mut BTreeMap<String, usize>, type_name: &str) -> String {
    let count = counters.entry(type_name.to_string()).or_insert(0);
    *count += 1;
    format!("{type_name}_{count}")
}
