use mind_graph::ir::{
    format_graph, verify_graph, Graph, GraphError, GraphId, OpId, OpKind, OpSettings, TensorKind,
};
use mind_graph::ops::{Add, Identity, MatMul, Relu};
use mind_graph::types::{DType, TensorData, TensorInfo};

fn f32s(shape: &[usize]) -> TensorInfo {
    TensorInfo::new(DType::F32, shape.to_vec())
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

#[test]
fn wiring_keeps_back_references_in_sync() {
    let mut g = Graph::default();
    g.add_input("x", f32s(&[4])).expect("x");
    let add = grow(&mut g, Box::new(Add), &["x", "x"], "y");

    let x = g.tensor("x").expect("x");
    assert_eq!(x.consumers.count(add), 2);
    assert_eq!(g.tensor("y").and_then(|t| t.producer), Some(add));
    assert_eq!(g.op(add).expect("op").inputs().indices("x"), vec![0, 1]);
    verify_graph(&g).expect("consistent");

    assert_eq!(g.disconnect_in_tensor(add, 1).expect("disconnect"), "x");
    assert_eq!(g.tensor("x").expect("x").consumers.count(add), 1);
    verify_graph(&g).expect("still consistent");
}

#[test]
fn op_ids_increase_and_are_never_reused() {
    let mut g = Graph::default();
    g.add_input("x", f32s(&[1])).expect("x");
    let a = grow(&mut g, Box::new(Identity), &["x"], "a");
    let b = grow(&mut g, Box::new(Identity), &["a"], "b");
    assert!(a < b);

    g.disconnect_all(b).expect("disconnect");
    g.erase_op(b).expect("erase");
    let c = g.create_op(Box::new(Identity), OpSettings::default());
    assert!(c > b);
    assert_eq!(g.op_ids(), vec![a, c]);
}

#[test]
fn rejected_rewire_leaves_graph_untouched() {
    let mut g = Graph::default();
    g.add_input("a", f32s(&[2, 3])).expect("a");
    g.add_input("b", f32s(&[3, 5])).expect("b");
    g.add_input("c", f32s(&[7, 7])).expect("c");
    let mm = grow(&mut g, Box::new(MatMul), &["a", "b"], "ab");

    let err = g.connect_in_tensor(mm, 1, "c").unwrap_err();
    assert!(matches!(err, GraphError::Inference { .. }));
    assert_eq!(
        g.op(mm).expect("op").inputs().id(1).map(String::as_str),
        Some("b")
    );
    assert!(g.tensor("c").expect("c").consumers.is_empty());
    assert_eq!(g.tensor_info("ab").expect("ab"), &f32s(&[2, 5]));
}

#[test]
fn rewire_rejected_by_a_consumer_is_rolled_back() {
    let mut g = Graph::default();
    g.add_input("x", f32s(&[2])).expect("x");
    g.add_input("big", f32s(&[3])).expect("big");
    let relu = grow(&mut g, Box::new(Relu), &["x"], "r");
    let add = grow(&mut g, Box::new(Add), &["r", "x"], "s");

    // Relu accepts the new input; Add then rejects f32[3] + f32[2].
    let err = g.connect_in_tensor(relu, 0, "big").unwrap_err();
    assert!(matches!(err, GraphError::Inference { .. }));

    assert_eq!(
        g.op(relu).expect("relu").inputs().id(0).map(String::as_str),
        Some("x")
    );
    assert!(g.tensor("big").expect("big").consumers.is_empty());
    assert_eq!(g.tensor("x").expect("x").consumers.count(relu), 1);
    assert_eq!(g.tensor_info("r").expect("r"), &f32s(&[2]));
    assert_eq!(g.tensor_info("s").expect("s"), &f32s(&[2]));
    assert!(g.op(add).expect("add").is_setup());
    verify_graph(&g).expect("consistent after rejection");
}

#[test]
fn setup_propagates_to_consumers() {
    let mut g = Graph::default();
    g.add_input("a", f32s(&[2])).expect("a");
    g.add_input("b", f32s(&[3])).expect("b");
    let copy = grow(&mut g, Box::new(Identity), &["a"], "y");
    grow(&mut g, Box::new(Relu), &["y"], "z");

    g.connect_in_tensor(copy, 0, "b").expect("rewire");
    assert_eq!(g.tensor_info("z").expect("z"), &f32s(&[3]));
}

#[test]
fn outputs_need_a_free_computed_tensor() {
    let mut g = Graph::default();
    g.add_input("x", f32s(&[1])).expect("x");
    let a = grow(&mut g, Box::new(Identity), &["x"], "y");
    let b = g.create_op(Box::new(Identity), OpSettings::default());

    assert_eq!(
        g.connect_out_tensor(b, 0, "y").unwrap_err(),
        GraphError::AlreadyProduced {
            tensor: "y".into(),
            producer: a,
        }
    );
    assert!(matches!(
        g.connect_out_tensor(b, 0, "x").unwrap_err(),
        GraphError::NotComputed {
            kind: TensorKind::Stream,
            ..
        }
    ));
    assert!(matches!(
        g.create_and_connect_out_tensor(b, 0, "x").unwrap_err(),
        GraphError::DuplicateTensor(_)
    ));
}

#[test]
fn erase_requires_disconnection() {
    let mut g = Graph::default();
    g.add_input("x", f32s(&[1])).expect("x");
    let op = grow(&mut g, Box::new(Identity), &["x"], "y");
    assert!(matches!(
        g.erase_op(op).unwrap_err(),
        GraphError::OpStillConnected { .. }
    ));
    assert!(matches!(
        g.remove_tensor("y").unwrap_err(),
        GraphError::TensorStillConnected(_)
    ));

    g.disconnect_all(op).expect("disconnect");
    g.erase_op(op).expect("erase");
    g.remove_tensor("y").expect("remove");
    assert_eq!(g.num_ops(), 0);
    assert!(g.tensor("x").expect("x").consumers.is_empty());
    assert!(matches!(g.erase_op(op).unwrap_err(), GraphError::UnknownOp(_)));
}

#[test]
fn replace_tensor_rewires_consumers_and_outputs() {
    let mut g = Graph::default();
    g.add_input("a", f32s(&[2])).expect("a");
    g.add_input("b", f32s(&[2])).expect("b");
    let add = grow(&mut g, Box::new(Add), &["a", "a"], "y");
    g.mark_as_output("a").expect("output");

    g.replace_tensor("a", "b").expect("replace");
    assert!(g.tensor("a").expect("a").consumers.is_empty());
    assert_eq!(g.tensor("b").expect("b").consumers.count(add), 2);
    assert_eq!(g.outputs(), ["b".to_string()]);
}

#[test]
fn data_size_is_checked() {
    let mut g = Graph::default();
    let err = g
        .add_const_init("c", f32s(&[3]), TensorData::from_f32s(&[1.0]))
        .unwrap_err();
    assert!(matches!(err, GraphError::DataSize { expected: 12, found: 4, .. }));
}

#[test]
fn scopes_round_trip() {
    let g = Graph::new(GraphId("body".into()));
    let scoped = g.add_scope("x");
    assert_eq!(scoped, "body/x");
    assert_eq!(g.remove_scope(&scoped).expect("strip"), "x");
    assert!(matches!(
        g.remove_scope("other/x").unwrap_err(),
        GraphError::ScopeMismatch { .. }
    ));
    assert_eq!(Graph::default().add_scope("x"), "x");
}

#[test]
fn live_sets_follow_the_schedule() {
    let mut g = Graph::default();
    g.add_input("x", f32s(&[2])).expect("x");
    let a = grow(&mut g, Box::new(Relu), &["x"], "a");
    let b = grow(&mut g, Box::new(Relu), &["x"], "b");
    let c = grow(&mut g, Box::new(Add), &["a", "b"], "c");

    let live = g.live_sets(&[a, b, c]).expect("valid order");
    assert_eq!(live[0].iter().copied().collect::<Vec<_>>(), vec![a]);
    assert_eq!(live[1].iter().copied().collect::<Vec<_>>(), vec![a, b]);
    assert!(live[2].is_empty());

    let err = g.live_sets(&[c, a, b]).unwrap_err();
    assert!(err.is_internal());
}

#[test]
fn dump_is_stable() {
    let mut g = Graph::default();
    g.add_input("x", f32s(&[2])).expect("x");
    grow(&mut g, Box::new(Relu), &["x"], "y");
    g.mark_as_output("y").expect("output");
    let text = format_graph(&g);
    assert!(text.contains("%0 = Relu(0:x) -> y:f32[2]"));
    assert_eq!(text, format_graph(&g));
}
