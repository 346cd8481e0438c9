#![cfg(feature = "autodiff")]

use std::collections::BTreeSet;

use mind_graph::autodiff::{differentiate, AutodiffError, GradientOptions};
use mind_graph::ir::{
    verify_graph, GradInOutMapper, GradInOutType, GradOpSpec, Graph, GraphError, Op, OpId, OpKind,
    OpSettings, TensorKind,
};
use mind_graph::ops::{Add, Identity, IdentityGrad, MatMul, Mul, Nll, ReduceSum, Relu, L1};
use mind_graph::types::{DType, TensorData, TensorInfo};

fn f32s(shape: &[usize]) -> TensorInfo {
    TensorInfo::new(DType::F32, shape.to_vec())
}

fn var(g: &mut Graph, id: &str, shape: &[usize]) {
    let info = f32s(shape);
    let data = TensorData::from_bytes(vec![0; info.nbytes()]);
    g.add_var_init(id, info, data).expect("variable");
}

fn grow(g: &mut Graph, kind: Box<dyn OpKind>, inputs: &[&str], output: &str) -> OpId {
    let op = g.create_op(kind, OpSettings::default());
    for (i, t) in inputs.iter().enumerate() {
        g.connect_in_tensor(op, i, t).expect("connect input");
    }
    g.create_and_connect_out_tensor(op, 0, output)
        .expect("connect output");
    g.setup_op(op).expect("setup");
    op
}

/// x[2,3] @ w[3,4] -> relu -> reduce_sum
fn mlp() -> Graph {
    let mut g = Graph::default();
    g.add_input("x", f32s(&[2, 3])).expect("input");
    var(&mut g, "w", &[3, 4]);
    grow(&mut g, Box::new(MatMul), &["x", "w"], "h");
    grow(&mut g, Box::new(Relu), &["h"], "r");
    grow(&mut g, Box::new(ReduceSum), &["r"], "loss");
    g
}

#[test]
fn every_variable_gets_a_gradient() {
    let mut g = mlp();
    let result = differentiate(&mut g, &GradientOptions::new("loss")).expect("gradients");

    assert_eq!(result.gradients.get("w").map(String::as_str), Some("d__w"));
    assert!(result.missing.is_empty());
    assert_eq!(g.tensor_info("d__w").expect("d__w"), &f32s(&[3, 4]));
    // Streams only get gradients on request.
    assert!(g.tensor("d__x").is_none());
    verify_graph(&g).expect("backward graph verifies");

    let seed = g.tensor("d__loss").expect("seed");
    assert_eq!(seed.kind, TensorKind::Constant);
}

#[test]
fn identity_chain_propagates_the_seed() {
    let mut g = Graph::default();
    var(&mut g, "w", &[1]);
    grow(&mut g, Box::new(Identity), &["w"], "a");
    grow(&mut g, Box::new(Identity), &["a"], "loss");

    let result = differentiate(&mut g, &GradientOptions::new("loss")).expect("gradients");
    assert_eq!(result.gradients.len(), 1);
    let types: Vec<&str> = result
        .grad_ops
        .iter()
        .map(|op| g.op(*op).expect("grad op").op_type())
        .collect();
    assert_eq!(types, vec!["IdentityGrad", "Sum", "IdentityGrad", "Sum"]);

    // d__w <- Sum <- IdentityGrad <- d__a <- Sum <- IdentityGrad <- d__loss
    let mut current = "d__w".to_string();
    let mut hops = 0;
    while let Some(op) = g.tensor(&current).and_then(|t| t.producer) {
        current = g.op(op).expect("op").inputs().id(0).expect("input").clone();
        hops += 1;
    }
    assert_eq!(current, "d__loss");
    assert_eq!(hops, 4);
}

#[test]
fn requested_stream_gradient() {
    let mut g = mlp();
    let options = GradientOptions {
        stream_gradients: BTreeSet::from(["x".to_string()]),
        ..GradientOptions::new("loss")
    };
    let result = differentiate(&mut g, &options).expect("gradients");
    assert_eq!(result.gradients.get("x").map(String::as_str), Some("d__x"));
    assert_eq!(g.tensor_info("d__x").expect("d__x"), &f32s(&[2, 3]));
}

#[test]
fn partial_gradients_are_summed_once() {
    // w feeds Mul twice and Add once: three partial gradients.
    let mut g = Graph::default();
    var(&mut g, "w", &[2]);
    grow(&mut g, Box::new(Mul), &["w", "w"], "m");
    grow(&mut g, Box::new(Add), &["m", "w"], "s");
    grow(&mut g, Box::new(L1 { lambda: 0.5 }), &["s"], "loss");

    differentiate(&mut g, &GradientOptions::new("loss")).expect("gradients");

    let sum = g
        .tensor("d__w")
        .and_then(|t| t.producer)
        .and_then(|op| g.op(op))
        .expect("gradient sum");
    assert_eq!(sum.op_type(), "Sum");
    assert_eq!(sum.inputs().len(), 3);
    let partials = sum.inputs().tensor_ids();
    assert!(partials.iter().all(|p| p.starts_with("d__w_")));
    assert_eq!(g.ops_of_type("Sum").len(), 3);
}

#[test]
fn sum_waits_for_every_consumer() {
    // Three distinct ops read w; its gradient sum is grown once, after all
    // three partials exist.
    let mut g = Graph::default();
    var(&mut g, "w", &[2]);
    grow(&mut g, Box::new(Identity), &["w"], "a");
    grow(&mut g, Box::new(Relu), &["w"], "b");
    grow(&mut g, Box::new(Identity), &["w"], "c");
    grow(&mut g, Box::new(Add), &["a", "b"], "ab");
    grow(&mut g, Box::new(Add), &["ab", "c"], "s");
    grow(&mut g, Box::new(L1 { lambda: 1.0 }), &["s"], "loss");

    let result = differentiate(&mut g, &GradientOptions::new("loss")).expect("gradients");

    let sums: Vec<OpId> = g
        .ops_of_type("Sum")
        .into_iter()
        .filter(|op| g.op(*op).expect("sum").settings.name == "GradSum:w")
        .collect();
    assert_eq!(sums.len(), 1);
    let sum = g.op(sums[0]).expect("sum");
    assert_eq!(sum.inputs().len(), 3);

    let position = |op: OpId| {
        result
            .grad_ops
            .iter()
            .position(|grown| *grown == op)
            .expect("grown op")
    };
    let sum_at = position(sum.id());
    for (_, partial) in sum.inputs().iter() {
        let producer = g.tensor(partial).and_then(|t| t.producer).expect("partial");
        assert!(position(producer) < sum_at);
    }
    assert_eq!(result.gradients.get("w").map(String::as_str), Some("d__w"));
}

/// `Masked(x, mask)` passes `x` through; `mask` gets no gradient.
#[derive(Debug)]
struct Masked;

impl OpKind for Masked {
    fn op_type(&self) -> &str {
        "Masked"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        inputs
            .first()
            .cloned()
            .flatten()
            .map(|info| vec![info])
            .ok_or_else(|| GraphError::inference("Masked", "input 0 is not connected"))
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![GradOpSpec::new(
            Box::new(IdentityGrad),
            vec![GradInOutMapper::new(0, 0, GradInOutType::GradOut)],
            [(0, 0)],
        )])
    }
}

#[test]
fn gradient_free_branch_does_not_hide_a_real_path() {
    // w -> Identity -> a -> Masked(a, mask) -> L1
    // w -> Relu -> mask, whose only consumer never differentiates it.
    let mut g = Graph::default();
    var(&mut g, "w", &[2]);
    grow(&mut g, Box::new(Identity), &["w"], "a");
    let relu = grow(&mut g, Box::new(Relu), &["w"], "mask");
    grow(&mut g, Box::new(Masked), &["a", "mask"], "y");
    grow(&mut g, Box::new(L1 { lambda: 1.0 }), &["y"], "loss");

    let result = differentiate(&mut g, &GradientOptions::new("loss")).expect("gradients");
    assert_eq!(result.gradients.get("w").map(String::as_str), Some("d__w"));
    assert!(result.missing.is_empty());
    assert!(g.tensor("d__mask").is_none());
    assert!(result
        .grad_ops
        .iter()
        .all(|op| g.op(*op).and_then(|o| o.grad_info()).map(|i| i.forward) != Some(relu)));

    let sum = g
        .tensor("d__w")
        .and_then(|t| t.producer)
        .and_then(|op| g.op(op))
        .expect("gradient sum");
    assert_eq!(sum.inputs().len(), 1);
    verify_graph(&g).expect("backward graph verifies");
}

#[test]
fn unreachable_and_frozen_variables() {
    let mut g = mlp();
    var(&mut g, "unused", &[4]);
    var(&mut g, "b", &[2, 4]);
    grow(&mut g, Box::new(Add), &["h", "b"], "side");

    let options = GradientOptions {
        do_not_update: BTreeSet::from(["b".to_string()]),
        ..GradientOptions::new("loss")
    };
    let result = differentiate(&mut g, &options).expect("gradients");
    assert_eq!(result.missing, vec!["unused".to_string()]);
    assert!(!result.gradients.contains_key("b"));
    // The side branch is not on a path to the loss.
    assert!(g.tensor("d__side").is_none());
}

#[test]
fn labels_do_not_stall_completion() {
    let mut g = Graph::default();
    g.add_input("label", TensorInfo::new(DType::I32, vec![2]))
        .expect("label");
    var(&mut g, "logits", &[2, 5]);
    grow(&mut g, Box::new(Relu), &["logits"], "probs");
    grow(&mut g, Box::new(Nll), &["probs", "label"], "loss");

    let result = differentiate(&mut g, &GradientOptions::new("loss")).expect("gradients");
    assert!(result.gradients.contains_key("logits"));
    assert!(g.tensor("d__label").is_none());
}

#[test]
fn loss_must_be_a_computed_scalar() {
    let mut g = mlp();
    let err = differentiate(&mut g, &GradientOptions::new("h")).unwrap_err();
    assert!(matches!(err, AutodiffError::LossNotScalar { .. }));

    let err = differentiate(&mut g, &GradientOptions::new("nope")).unwrap_err();
    assert_eq!(err, AutodiffError::UnknownLoss("nope".into()));

    var(&mut g, "s", &[1]);
    let err = differentiate(&mut g, &GradientOptions::new("s")).unwrap_err();
    assert_eq!(err, AutodiffError::LossWithoutProducer("s".into()));
}

#[test]
fn reserved_names_are_rejected() {
    let mut g = mlp();
    let err = g
        .add_var_init("d__w", f32s(&[1]), TensorData::from_f32s(&[0.0]))
        .unwrap_err();
    assert_eq!(err, GraphError::ReservedId("d__w".into()));

    // Ids created through the raw wiring API are checked before growth.
    let mut raw = mlp();
    let op = raw.create_op(Box::new(Relu), OpSettings::default());
    raw.connect_in_tensor(op, 0, "r").expect("connect");
    raw.create_and_connect_out_tensor(op, 0, "d__r_2_0")
        .expect("raw output");
    let ops_before = raw.num_ops();
    let err = differentiate(&mut raw, &GradientOptions::new("loss")).unwrap_err();
    assert_eq!(err, AutodiffError::ReservedId("d__r_2_0".into()));
    assert_eq!(raw.num_ops(), ops_before);

    // A graph that was already differentiated holds generated names.
    differentiate(&mut g, &GradientOptions::new("loss")).expect("first pass");
    let err = differentiate(&mut g, &GradientOptions::new("loss")).unwrap_err();
    assert!(matches!(err, AutodiffError::ReservedId(_)));
}

#[test]
fn differentiation_is_deterministic() {
    let mut one = mlp();
    let mut two = mlp();
    let a = differentiate(&mut one, &GradientOptions::new("loss")).expect("first");
    let b = differentiate(&mut two, &GradientOptions::new("loss")).expect("second");
    assert_eq!(a, b);
    assert_eq!(
        mind_graph::ir::format_graph(&one),
        mind_graph::ir::format_graph(&two)
    );
}
