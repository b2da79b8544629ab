//! seqgraph: graph construction and memory planning for sequence-model inference
//!
//! Client code registers layers, operators and nodes into a [`Context`];
//! the context assigns every node its position in execution order, binds
//! the graph to one device stream and BLAS handle, and plans a single
//! reusable arena sized to the peak simultaneously-live footprint.
//! Several contexts can coexist in a [`ContextRegistry`].
//!
//! Device resources come from a [`DeviceBackend`]. [`HostBackend`] is
//! always available; the CUDA backend lives in `seqgraph-cuda`.

pub mod backend;
pub mod binder;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod host;
pub mod objects;
pub mod planner;
pub mod regress;
pub mod registry;
pub mod scope;

pub use backend::DeviceBackend;
pub use binder::DeviceBinding;
pub use config::{ContextConfig, Mode};
pub use context::{BuildState, Context};
pub use element::{Layer, LayerId, LayerState, Node, NodeDesc, NodeId, OpDesc, OpId, Operator};
pub use error::{Error, Result};
pub use host::{HostBackend, HostBlas, HostStream};
pub use objects::{LayerBindingRegistry, LayerHandle, ObjectRegistry};
pub use planner::{Lifetime, MemoryPlan, MemoryPlanner};
pub use regress::RegressRegion;
pub use registry::{with_global, ContextId, ContextRegistry};
pub use scope::{LayerScope, LayerScopeStack};
