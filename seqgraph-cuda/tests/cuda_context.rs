//! Graph contexts bound to a real CUDA device.
//!
//! Run with:
//!   cargo test -p seqgraph-cuda --features integration -- --test-threads=1
#![cfg(feature = "integration")]

use seqgraph::{with_global, DeviceBackend, Mode, NodeDesc, OpDesc};
use seqgraph_cuda::{CudaBackend, CudaGraphContext};
use serial_test::serial;

fn context() -> CudaGraphContext {
    CudaGraphContext::open(Mode::Inference, 0).expect("Failed to open CUDA device 0")
}

#[test]
#[serial]
fn arena_matches_plan() {
    let mut ctx = context();
    let x = ctx.add_node(NodeDesc::new("input", 1 << 20));
    let op = ctx.add_op(OpDesc::new("Linear").reads(&[x]));
    ctx.add_node(NodeDesc::new("hidden", 1 << 21).produced_by(op));

    let peak = ctx.build().unwrap().peak_bytes();
    assert!(!ctx.is_arena_allocated());
    let arena = ctx.arena().unwrap();
    assert_eq!(arena.len(), peak);
}

#[test]
#[serial]
fn stream_swap_rebinds_blas() {
    let mut ctx = context();
    let backend = CudaBackend::open(0).unwrap();
    let fresh = backend.create_stream().unwrap();

    let old = ctx.set_stream(fresh).unwrap();
    // The replaced stream is handed back and can be dropped independently.
    drop(old);
    ctx.binding().backend().device().synchronize().unwrap();
    assert_eq!(ctx.device_id(), 0);
}

#[test]
#[serial]
fn registry_holds_cuda_contexts() {
    let id = with_global::<CudaBackend, _>(|reg| reg.create(Mode::Inference, 0)).unwrap();
    with_global::<CudaBackend, _>(|reg| {
        assert_eq!(reg.current_id(), Some(id));
        assert_eq!(reg.current().unwrap().device_id(), 0);
    });
}
