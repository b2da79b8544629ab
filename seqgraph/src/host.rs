//! Host-memory backend.
//!
//! Stands in for a GPU on machines without one: streams and BLAS handles
//! are plain identifiers, and the arena is a zeroed `Vec<u8>`. Intended for
//! tests and for planning graphs offline. It does not execute anything.

#![allow(clippy::must_use_candidate)]

use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::DeviceBackend;
use crate::Result;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Marker backend bound to a host "device" ordinal.
#[derive(Debug)]
pub struct HostBackend {
    device_id: usize,
}

/// Synthetic stream with a process-unique id.
///
/// Deliberately not `Clone`: a stream is owned by exactly one context.
#[derive(Debug, PartialEq, Eq)]
pub struct HostStream {
    id: u64,
}

impl HostStream {
    /// Create a fresh stream, independent of any backend.
    pub fn new() -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for HostStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthetic BLAS handle remembering which stream it issues onto.
#[derive(Debug)]
pub struct HostBlas {
    stream_id: u64,
}

impl HostBlas {
    /// Id of the stream this handle is bound to.
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }
}

impl DeviceBackend for HostBackend {
    type Stream = HostStream;
    type BlasHandle = HostBlas;
    type Arena = Vec<u8>;

    fn open(device_id: usize) -> Result<Self> {
        Ok(Self { device_id })
    }

    fn device_id(&self) -> usize {
        self.device_id
    }

    fn create_stream(&self) -> Result<HostStream> {
        Ok(HostStream::new())
    }

    fn create_blas(&self, stream: &HostStream) -> Result<HostBlas> {
        Ok(HostBlas {
            stream_id: stream.id,
        })
    }

    fn bind_blas(&self, blas: &mut HostBlas, stream: &HostStream) -> Result<()> {
        blas.stream_id = stream.id;
        Ok(())
    }

    fn alloc_arena(&self, bytes: usize) -> Result<Vec<u8>> {
        Ok(vec![0u8; bytes])
    }
}
