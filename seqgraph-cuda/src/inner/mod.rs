mod backend_impl;

pub use backend_impl::CudaBackend;

/// A graph context bound to a CUDA device.
pub type CudaGraphContext = seqgraph::Context<CudaBackend>;

// Re-export the cudarc types that appear in `CudaBackend`'s associated types
pub use cudarc::cublas::CudaBlas;
pub use cudarc::driver::{CudaDevice, CudaSlice, CudaStream};
