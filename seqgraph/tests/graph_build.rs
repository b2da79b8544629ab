//! End-to-end graph construction on the host backend.
//!
//! Builds small encoder/decoder-shaped graphs through the public API and
//! checks indexing, layer forests, regress regions and the memory plan.

use proptest::prelude::*;
use seqgraph::{
    Context, ContextConfig, Error, HostBackend, LayerId, Mode, NodeDesc, NodeId, OpDesc,
};

fn host_ctx(mode: Mode) -> Context<HostBackend> {
    Context::open(mode, 0).expect("Failed to create host context")
}

/// Register `op` reading `inputs` and one output node of `bytes`.
fn emit(ctx: &mut Context<HostBackend>, op: &str, inputs: &[NodeId], bytes: usize) -> NodeId {
    let op = ctx.add_op(OpDesc::new(op).reads(inputs));
    ctx.add_node(NodeDesc::new("out", bytes).produced_by(op))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn encoder_disjoint_nodes_reuse_arena() {
    let mut ctx = host_ctx(Mode::Inference);
    let encoder = ctx.new_layer("Encoder");
    ctx.enter_layer(encoder, false);
    let a = ctx.add_node(NodeDesc::new("hidden", 100));
    let b = ctx.add_node(NodeDesc::new("hidden", 200));
    ctx.exit_layer();

    let plan = ctx.build().unwrap().clone();
    assert_eq!((a.index(), b.index()), (0, 1));
    assert_eq!(ctx.layer(encoder).unwrap().range(), Some(0..2));
    assert_eq!(plan.peak_bytes(), 200);
    assert!(ctx.is_built());
}

#[test]
fn nested_layers_form_forest() {
    let mut ctx = host_ctx(Mode::Inference);
    let a = ctx.new_layer("A");
    let b = ctx.new_layer("B");
    {
        let mut outer = ctx.layer_scope(a, false);
        let mut inner = outer.layer_scope(b, false);
        inner.add_node(NodeDesc::new("x", 16));
    }

    assert_eq!(ctx.root_layers(), &[a]);
    assert_eq!(ctx.layer(a).unwrap().children(), &[b]);
    let range_a = ctx.layer(a).unwrap().range().unwrap();
    let range_b = ctx.layer(b).unwrap().range().unwrap();
    assert!(range_a.start <= range_b.start && range_b.end <= range_a.end);
}

#[test]
#[should_panic(expected = "already inside a regress region")]
fn nested_regress_begin_is_a_fault() {
    let mut ctx = host_ctx(Mode::Training);
    for _ in 0..5 {
        ctx.add_node(NodeDesc::new("fwd", 8));
    }
    ctx.regress_begin();
    let n = ctx.add_node(NodeDesc::new("bwd", 8));
    assert_eq!(n.index(), 5);
    ctx.regress_begin();
}

#[test]
fn transformer_block_plan() {
    let mut ctx = host_ctx(Mode::Inference);
    let embed = ctx.new_layer("Embedding");
    let block = ctx.new_layer("TransformerBlock");

    let x = {
        let mut scope = ctx.layer_scope(embed, false);
        emit(&mut scope, "Gather", &[], 4096)
    };
    {
        let mut scope = ctx.layer_scope(block, false);
        let attn = scope.new_layer("Attention");
        let ffn = scope.new_layer("Ffn");

        let attn_out = {
            let mut s = scope.layer_scope(attn, false);
            let qkv = emit(&mut s, "Linear", &[x], 3 * 4096);
            let scores = emit(&mut s, "Softmax", &[qkv], 8192);
            let ctxv = emit(&mut s, "BatchMatmul", &[scores, qkv], 4096);
            emit(&mut s, "Linear", &[ctxv, x], 4096)
        };
        let mut s = scope.layer_scope(ffn, false);
        let up = emit(&mut s, "Linear", &[attn_out], 4 * 4096);
        emit(&mut s, "Linear", &[up, attn_out], 4096);
    }

    let plan = ctx.build().unwrap().clone();
    let total: usize = ctx.nodes().iter().map(|n| n.byte_size()).sum();
    assert!(plan.peak_bytes() < total, "plan should reuse memory");
    assert!(plan.peak_bytes() >= plan.max_live_bytes());

    // Linear names are disambiguated across the whole graph.
    let linear_names: Vec<&str> = ctx
        .ops()
        .iter()
        .map(|op| op.name())
        .filter(|n| n.starts_with("Linear"))
        .collect();
    assert_eq!(linear_names, vec!["Linear_1", "Linear_2", "Linear_3", "Linear_4"]);

    let block_range = ctx.layer(block).unwrap().range().unwrap();
    assert_eq!(block_range, 1..7);
}

#[test]
fn training_backward_region_keeps_activations() {
    let mut ctx = host_ctx(Mode::Training);
    let x = emit(&mut ctx, "Embed", &[], 256);
    ctx.regress_begin();
    let h1 = emit(&mut ctx, "Linear", &[x], 256);
    let h2 = emit(&mut ctx, "Gelu", &[h1], 256);
    ctx.regress_end();
    emit(&mut ctx, "Loss", &[h2], 4);

    let region = ctx.regress_region().unwrap();
    assert_eq!((region.begin, region.end), (1, 3));

    let plan = ctx.build().unwrap().clone();
    // h1 is last read at 2 but must survive through the region end.
    assert_eq!(plan.interval(h1.index()), Some((1, 3)));
    let (h1_off, h2_off) = (plan.offset(1).unwrap(), plan.offset(2).unwrap());
    assert!(h1_off + 256 <= h2_off || h2_off + 256 <= h1_off);
}

#[test]
fn double_build_is_a_noop() {
    let mut ctx = host_ctx(Mode::Inference);
    let x = emit(&mut ctx, "A", &[], 32);
    emit(&mut ctx, "B", &[x], 64);

    let first = ctx.build().unwrap().clone();
    let nodes_before: Vec<(usize, String)> = ctx
        .nodes()
        .iter()
        .map(|n| (n.index(), n.name().to_string()))
        .collect();
    let second = ctx.build().unwrap().clone();
    let nodes_after: Vec<(usize, String)> = ctx
        .nodes()
        .iter()
        .map(|n| (n.index(), n.name().to_string()))
        .collect();

    assert_eq!(first, second);
    assert_eq!(nodes_before, nodes_after);
}

#[test]
fn repeated_graphs_produce_identical_plans() {
    let build = || {
        let mut ctx = Context::<HostBackend>::new(ContextConfig {
            arena_alignment: 256,
            ..ContextConfig::default()
        })
        .unwrap();
        let mut prev = emit(&mut ctx, "Embed", &[], 1000);
        for i in 0..12 {
            prev = emit(&mut ctx, "Linear", &[prev], 512 + 100 * (i % 4));
        }
        ctx.build().unwrap().clone()
    };
    assert_eq!(build(), build());
}

#[test]
fn mode_switch_leaves_plan() {
    let mut ctx = host_ctx(Mode::Inference);
    emit(&mut ctx, "A", &[], 32);
    assert!(matches!(ctx.convert_into_eval(), Err(Error::NotBuilt)));

    let plan = ctx.build().unwrap().clone();
    ctx.convert_into_train().unwrap();
    assert!(ctx.is_training());
    assert_eq!(ctx.plan(), Some(&plan));
    assert_eq!(ctx.node_idx(), 1);
}

#[test]
fn shared_lookup_table_between_layers() {
    let mut ctx = host_ctx(Mode::Inference);
    let l1 = ctx.new_layer("Rotary");
    let l2 = ctx.new_layer("Rotary");
    {
        let mut s = ctx.layer_scope(l1, false);
        if s.get_object::<Vec<f32>>("rope_cos").is_err() {
            s.register_object("rope_cos", vec![1.0_f32; 64]);
        }
    }
    let s = ctx.layer_scope(l2, false);
    let table = s.get_object::<Vec<f32>>("rope_cos").unwrap();
    assert_eq!(table.len(), 64);
    assert!(matches!(
        s.get_object::<Vec<u8>>("rope_cos"),
        Err(Error::ObjectTypeMismatch { .. })
    ));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Step {
    Enter,
    Exit,
    Node(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Enter),
        Just(Step::Exit),
        (1usize..512).prop_map(Step::Node),
    ]
}

/// Replay `steps`, skipping exits on an empty stack and closing everything
/// left open at the end.
fn replay(steps: &[Step]) -> (Context<HostBackend>, Vec<NodeId>) {
    let mut ctx = host_ctx(Mode::Inference);
    let mut nodes = Vec::new();
    let mut depth = 0usize;
    for step in steps {
        match *step {
            Step::Enter => {
                let layer = ctx.new_layer("Block");
                ctx.enter_layer(layer, false);
                depth += 1;
            }
            Step::Exit if depth > 0 => {
                ctx.exit_layer();
                depth -= 1;
            }
            Step::Exit => {}
            Step::Node(bytes) => nodes.push(ctx.add_node(NodeDesc::new("n", bytes))),
        }
    }
    for _ in 0..depth {
        ctx.exit_layer();
    }
    (ctx, nodes)
}

fn subtree_indices(ctx: &Context<HostBackend>, id: LayerId, out: &mut Vec<usize>) {
    let layer = ctx.layer(id).unwrap();
    out.extend(layer.nodes().iter().map(|n| n.index()));
    for &child in layer.children() {
        subtree_indices(ctx, child, out);
    }
}

proptest! {
    #[test]
    fn indices_follow_call_order(steps in proptest::collection::vec(step_strategy(), 0..64)) {
        let (_, nodes) = replay(&steps);
        let indices: Vec<usize> = nodes.iter().map(|n| n.index()).collect();
        let expected: Vec<usize> = (0..nodes.len()).collect();
        prop_assert_eq!(indices, expected);
    }

    #[test]
    fn layer_ranges_are_contiguous(steps in proptest::collection::vec(step_strategy(), 0..64)) {
        let (mut ctx, _) = replay(&steps);
        for layer in ctx.layers() {
            let mut owned = Vec::new();
            subtree_indices(&ctx, layer.id(), &mut owned);
            owned.sort_unstable();
            match layer.range() {
                None => prop_assert!(owned.is_empty()),
                Some(range) => prop_assert_eq!(owned, range.collect::<Vec<_>>()),
            }
        }
        prop_assert!(ctx.build().is_ok());
    }
}
