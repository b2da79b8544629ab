//! Device backend trait.
//!
//! A [`Context`](crate::Context) is generic over `B: DeviceBackend`. The
//! backend supplies the device-side resources a graph is bound to: one
//! execution stream, one BLAS handle bound to that stream, and the single
//! arena buffer sized by the memory planner.
//!
//! # Design notes
//!
//! - **Resources are owned, not shared.** `Stream` and `BlasHandle` are
//!   moved into the context that uses them; a stream can therefore never
//!   be live in two contexts at once.
//! - **Rebinding is a backend operation.** [`DeviceBackend::bind_blas`]
//!   re-targets an existing handle, so the binder can swap stream and
//!   handle together (see [`DeviceBinding::set_stream`](crate::DeviceBinding::set_stream)).
//! - Backends live next to their driver bindings: [`HostBackend`](crate::HostBackend)
//!   here, `CudaBackend` in `seqgraph-cuda`.

use crate::Result;

/// A device that can host one graph.
pub trait DeviceBackend: Send + Sized + 'static {
    /// Execution stream (e.g. a forked `CudaStream`).
    type Stream: Send + 'static;

    /// Linear-algebra handle (e.g. `CudaBlas`).
    type BlasHandle: Send + 'static;

    /// Device buffer backing the temporary-buffer arena.
    type Arena: Send + 'static;

    /// Open the device with the given ordinal.
    ///
    /// # Errors
    /// Returns an error if the device cannot be initialised.
    fn open(device_id: usize) -> Result<Self>;

    /// Ordinal of the opened device.
    fn device_id(&self) -> usize;

    /// Create a new stream on this device.
    ///
    /// # Errors
    /// Returns an error if stream creation fails.
    fn create_stream(&self) -> Result<Self::Stream>;

    /// Create a BLAS handle issuing work onto `stream`.
    ///
    /// # Errors
    /// Returns an error if handle creation fails.
    fn create_blas(&self, stream: &Self::Stream) -> Result<Self::BlasHandle>;

    /// Re-target `blas` so its work goes onto `stream`.
    ///
    /// # Errors
    /// Returns an error if the driver rejects the rebinding; the handle
    /// must then still be bound to its previous stream.
    fn bind_blas(&self, blas: &mut Self::BlasHandle, stream: &Self::Stream) -> Result<()>;

    /// Allocate a zeroed arena of `bytes` bytes.
    ///
    /// # Errors
    /// Returns an error if device allocation fails.
    fn alloc_arena(&self, bytes: usize) -> Result<Self::Arena>;
}
