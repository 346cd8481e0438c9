use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use mind_graph::autodiff::{differentiate, GradientOptions};
use mind_graph::ir::{Graph, OpKind, OpSettings};
use mind_graph::model::{build_graph, ModelDescription};
use mind_graph::ops::{Add, MatMul, OpRegistry, ReduceSum, Relu};
use mind_graph::options::SessionOptions;
use mind_graph::pipeline::compile_model;
use mind_graph::types::{DType, TensorData, TensorInfo};

fn grow(g: &mut Graph, kind: Box<dyn OpKind>, inputs: &[&str], output: &str) {
    let op = g.create_op(kind, OpSettings::default());
    for (i, t) in inputs.iter().enumerate() {
        g.connect_in_tensor(op, i, t).expect("connect input");
    }
    g.create_and_connect_out_tensor(op, 0, output)
        .expect("connect output");
    g.setup_op(op).expect("setup");
}

fn var(g: &mut Graph, id: &str, shape: &[usize]) {
    let info = TensorInfo::new(DType::F32, shape.to_vec());
    let data = TensorData::from_bytes(vec![0; info.nbytes()]);
    g.add_var_init(id, info, data).expect("variable");
}

/// `layers` dense layers of width 64 with bias and ReLU, summed to a loss.
fn mlp_chain(layers: usize) -> Graph {
    let mut g = Graph::default();
    g.add_input("x", TensorInfo::new(DType::F32, vec![32, 64]))
        .expect("input");
    let mut current = "x".to_string();
    for l in 0..layers {
        let (w, b) = (format!("w{l}"), format!("b{l}"));
        var(&mut g, &w, &[64, 64]);
        var(&mut g, &b, &[32, 64]);
        let (h, hb, r) = (format!("h{l}"), format!("hb{l}"), format!("r{l}"));
        grow(&mut g, Box::new(MatMul), &[current.as_str(), w.as_str()], &h);
        grow(&mut g, Box::new(Add), &[h.as_str(), b.as_str()], &hb);
        grow(&mut g, Box::new(Relu), &[hb.as_str()], &r);
        current = r;
    }
    grow(&mut g, Box::new(ReduceSum), &[current.as_str()], "loss");
    g
}

fn bench_autodiff_mlp(c: &mut Criterion) {
    let mut group = c.benchmark_group("autodiff_mlp");

    for layers in [2usize, 8, 32] {
        group.bench_with_input(
            BenchmarkId::new("differentiate", layers),
            &layers,
            |b, &layers| {
                b.iter_batched(
                    || mlp_chain(layers),
                    |mut g| {
                        differentiate(black_box(&mut g), &GradientOptions::new("loss"))
                            .expect("autodiff failed")
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

const TWO_LAYER: &str = r#"{
    "inputs": [{ "id": "x", "dtype": "f32", "shape": [128, 784] }],
    "initializers": [
        { "id": "w1", "kind": "var", "dtype": "f32", "shape": [784, 512] },
        { "id": "w2", "kind": "var", "dtype": "f32", "shape": [512, 10] }
    ],
    "nodes": [
        { "op_type": "MatMul", "inputs": ["x", "w1"], "outputs": ["h1"] },
        { "op_type": "Relu", "inputs": ["h1"], "outputs": ["a1"] },
        { "op_type": "MatMul", "inputs": ["a1", "w2"], "outputs": ["h2"] },
        { "op_type": "L1", "inputs": ["h2"], "outputs": ["loss"], "attributes": { "lambda": 0.1 } }
    ],
    "outputs": ["loss"]
}"#;

fn bench_autodiff_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("autodiff_end_to_end");
    let model = ModelDescription::from_json_str(TWO_LAYER).expect("model");
    let registry = OpRegistry::builtin();
    let options = SessionOptions {
        loss: Some("loss".into()),
        ..SessionOptions::default()
    };

    group.bench_function("build_only", |b| {
        b.iter(|| build_graph(black_box(&model), &registry).expect("build failed"));
    });
    group.bench_function("compile_and_diff", |b| {
        b.iter(|| compile_model(black_box(&model), &registry, &options).expect("compile failed"));
    });

    group.finish();
}

criterion_group!(benches, bench_autodiff_mlp, bench_autodiff_end_to_end);

criterion_main!(benches);
