//! `CudaBackend`: implements [`DeviceBackend`] on top of cudarc.

use std::sync::Arc;

use cudarc::cublas::CudaBlas;
use cudarc::driver::{CudaDevice, CudaSlice, CudaStream};
use seqgraph::{DeviceBackend, Result};

/// One opened CUDA device.
#[derive(Clone)]
pub struct CudaBackend {
    device: Arc<CudaDevice>,
}

impl CudaBackend {
    /// Wrap an already opened device.
    #[must_use]
    pub fn from_device(device: Arc<CudaDevice>) -> Self {
        Self { device }
    }

    /// Get a reference to the underlying CUDA device
    #[must_use]
    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }
}

impl std::fmt::Debug for CudaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaBackend")
            .field("ordinal", &self.device.ordinal())
            .finish()
    }
}

impl DeviceBackend for CudaBackend {
    type Stream = CudaStream;
    type BlasHandle = CudaBlas;
    type Arena = CudaSlice<u8>;

    fn open(device_id: usize) -> Result<Self> {
        let device = CudaDevice::new(device_id)?;
        tracing::info!(device_id, name = ?device.name().ok(), "CUDA device opened");
        Ok(Self { device })
    }

    fn device_id(&self) -> usize {
        self.device.ordinal()
    }

    fn create_stream(&self) -> Result<CudaStream> {
        // Forked streams are ordered after work already queued on the
        // device's default stream.
        Ok(self.device.fork_default_stream()?)
    }

    fn create_blas(&self, stream: &CudaStream) -> Result<CudaBlas> {
        let mut blas = CudaBlas::new(self.device.clone())?;
        self.bind_blas(&mut blas, stream)?;
        Ok(blas)
    }

    fn bind_blas(&self, blas: &mut CudaBlas, stream: &CudaStream) -> Result<()> {
        // SAFETY: `DeviceBinding` keeps `stream` alive for as long as `blas`
        // is bound to it: both are replaced together on rebinding, and the
        // handle is dropped before the stream.
        unsafe { blas.set_stream(Some(stream))? };
        Ok(())
    }

    fn alloc_arena(&self, bytes: usize) -> Result<CudaSlice<u8>> {
        tracing::debug!(bytes, "allocating device arena");
        Ok(self.device.alloc_zeros::<u8>(bytes)?)
    }
}
