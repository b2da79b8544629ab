//! Graph element model: nodes, operators and layers.
//!
//! These are passive records owned by a [`Context`](crate::Context). They
//! are created through the context's registration methods, which assign
//! indices and names; client code only ever holds the typed ids.

#![allow(clippy::must_use_candidate)]

use std::fmt;
use std::ops::Range;

/// Position of a node in global execution order.
///
/// The wrapped value is the node's sequence index, so ids compare in
/// execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

/// Handle to a registered operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub(crate) usize);

/// Handle to a layer created by [`Context::new_layer`](crate::Context::new_layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub(crate) usize);

impl NodeId {
    /// Global sequence index of the node.
    pub fn index(self) -> usize {
        self.0
    }
}

impl OpId {
    /// Position of the operator in the flat operator list.
    pub fn index(self) -> usize {
        self.0
    }
}

impl LayerId {
    /// Position of the layer in the all-layers list.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a client supplies when registering a node.
#[derive(Debug, Clone)]
pub struct NodeDesc {
    pub(crate) type_name: String,
    pub(crate) byte_size: usize,
    pub(crate) producer: Option<OpId>,
}

impl NodeDesc {
    /// A node of the given type name whose output needs `byte_size` bytes.
    pub fn new(type_name: impl Into<String>, byte_size: usize) -> Self {
        Self {
            type_name: type_name.into(),
            byte_size,
            producer: None,
        }
    }

    /// Record `op` as the operator writing this node.
    #[must_use]
    pub fn produced_by(mut self, op: OpId) -> Self {
        self.producer = Some(op);
        self
    }
}

/// What a client supplies when registering an operator.
#[derive(Debug, Clone)]
pub struct OpDesc {
    pub(crate) type_name: String,
    pub(crate) inputs: Vec<NodeId>,
}

impl OpDesc {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            inputs: Vec::new(),
        }
    }

    /// Nodes read by this operator.
    #[must_use]
    pub fn reads(mut self, inputs: &[NodeId]) -> Self {
        self.inputs.extend_from_slice(inputs);
        self
    }
}

/// One indexed step in the execution graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) byte_size: usize,
    pub(crate) last_use: usize,
    pub(crate) layer: Option<LayerId>,
    pub(crate) producer: Option<OpId>,
    pub(crate) in_regress: bool,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Global sequence index.
    pub fn index(&self) -> usize {
        self.id.0
    }

    /// Disambiguated name, e.g. `hidden_2`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes required by the node's output buffer.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// First index at which the node is referenced (its own index).
    pub fn first_use(&self) -> usize {
        self.id.0
    }

    /// Last index at which the node is referenced.
    pub fn last_use(&self) -> usize {
        self.last_use
    }

    /// Innermost layer that was open when the node was registered.
    pub fn layer(&self) -> Option<LayerId> {
        self.layer
    }

    pub fn producer(&self) -> Option<OpId> {
        self.producer
    }

    /// Whether the node was registered inside a regress region.
    pub fn in_regress(&self) -> bool {
        self.in_regress
    }
}

/// A unit of work that reads and writes nodes.
#[derive(Debug, Clone)]
pub struct Operator {
    pub(crate) id: OpId,
    pub(crate) name: String,
    pub(crate) position: usize,
    pub(crate) layer: Option<LayerId>,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) outputs: Vec<NodeId>,
}

impl Operator {
    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node index the operator's first output receives (or would receive).
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn layer(&self) -> Option<LayerId> {
        self.layer
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }
}

/// Where a layer is in its enter/exit lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    /// Created but never entered; not yet part of the forest.
    Detached,
    /// On the scope stack.
    Open,
    /// Exited; no more nodes may be attributed to it.
    Closed,
}

/// A named, nestable grouping of nodes and operators.
#[derive(Debug, Clone)]
pub struct Layer {
    pub(crate) id: LayerId,
    pub(crate) name: String,
    pub(crate) state: LayerState,
    pub(crate) parent: Option<LayerId>,
    pub(crate) children: Vec<LayerId>,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) ops: Vec<OpId>,
    pub(crate) range: Option<Range<usize>>,
}

impl Layer {
    pub(crate) fn new(id: LayerId, name: String) -> Self {
        Self {
            id,
            name,
            state: LayerState::Detached,
            parent: None,
            children: Vec::new(),
            nodes: Vec::new(),
            ops: Vec::new(),
            range: None,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    /// Disambiguated name, e.g. `Linear_2`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    /// Enclosing layer, `None` for root layers.
    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    /// Nodes registered while this layer was the innermost open layer.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Operators registered while this layer was the innermost open layer.
    pub fn ops(&self) -> &[OpId] {
        &self.ops
    }

    /// Node-index range covered by this layer and its descendants.
    ///
    /// `None` if no node was ever attributed to the subtree.
    pub fn range(&self) -> Option<Range<usize>> {
        self.range.clone()
    }

    /// Extend the covered range to include `idx`.
    pub(crate) fn cover(&mut self, idx: usize) {
        self.range = Some(match self.range.take() {
            Some(r) => r.start.min(idx)..r.end.max(idx + 1),
            None => idx..idx + 1,
        });
    }
}
