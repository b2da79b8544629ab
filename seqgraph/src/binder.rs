//! Device binding: the device, stream and BLAS handle one graph runs on.

#![allow(clippy::must_use_candidate)]

use crate::backend::DeviceBackend;
use crate::Result;

/// Exclusively owned device resources of one [`Context`](crate::Context).
///
/// The BLAS handle is always bound to the stream held next to it; the only
/// way to change the stream is [`set_stream`](Self::set_stream), which
/// rebinds both together.
pub struct DeviceBinding<B: DeviceBackend> {
    // Fields drop in declaration order: the handle goes before the stream it
    // is bound to, and both before the device.
    blas: B::BlasHandle,
    stream: B::Stream,
    backend: B,
}

impl<B: DeviceBackend> DeviceBinding<B> {
    /// Open device `device_id` and create its stream and BLAS handle.
    ///
    /// # Errors
    /// Returns an error if the device, stream or handle cannot be created.
    pub fn open(device_id: usize) -> Result<Self> {
        Self::with_backend(B::open(device_id)?)
    }

    /// Bind to an already opened backend.
    ///
    /// # Errors
    /// Returns an error if the stream or handle cannot be created.
    pub fn with_backend(backend: B) -> Result<Self> {
        let stream = backend.create_stream()?;
        let blas = backend.create_blas(&stream)?;
        Ok(Self {
            blas,
            stream,
            backend,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn device_id(&self) -> usize {
        self.backend.device_id()
    }

    pub fn stream(&self) -> &B::Stream {
        &self.stream
    }

    pub fn blas(&self) -> &B::BlasHandle {
        &self.blas
    }

    /// Replace the execution stream, rebinding the BLAS handle to it.
    ///
    /// The handle is rebound first; if that fails the previous stream stays
    /// in place and is still the one the handle issues onto. On success the
    /// previous stream is returned to the caller.
    ///
    /// # Errors
    /// Returns an error if the backend cannot rebind the handle.
    pub fn set_stream(&mut self, stream: B::Stream) -> Result<B::Stream> {
        self.backend.bind_blas(&mut self.blas, &stream)?;
        tracing::debug!(device = self.device_id(), "stream rebound");
        Ok(std::mem::replace(&mut self.stream, stream))
    }

    /// Allocate an arena of `bytes` bytes on this device.
    ///
    /// # Errors
    /// Returns an error if device allocation fails.
    pub fn alloc_arena(&self, bytes: usize) -> Result<B::Arena> {
        self.backend.alloc_arena(bytes)
    }
}
