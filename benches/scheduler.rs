use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mind_graph::ir::{Graph, OpKind, OpSettings};
use mind_graph::ops::{Relu, Sum};
use mind_graph::scheduler::{
    compute_schedule, DependencyGraph, KahnTieBreaker, OpsBeforeKey, RequireOptimalSchedule,
    SchedulerOptions,
};
use mind_graph::types::{DType, TensorInfo};

fn grow(g: &mut Graph, kind: Box<dyn OpKind>, inputs: &[&str], output: &str) {
    let op = g.create_op(kind, OpSettings::default());
    for (i, t) in inputs.iter().enumerate() {
        g.connect_in_tensor(op, i, t).expect("connect input");
    }
    g.create_and_connect_out_tensor(op, 0, output)
        .expect("connect output");
    g.setup_op(op).expect("setup");
}

/// `width` independent relu chains of `depth` ops, joined by one sum.
fn fan(width: usize, depth: usize) -> Graph {
    let mut g = Graph::default();
    g.add_input("x", TensorInfo::new(DType::F32, vec![256]))
        .expect("input");
    let mut tails = Vec::with_capacity(width);
    for w in 0..width {
        let mut current = "x".to_string();
        for d in 0..depth {
            let next = format!("t{w}_{d}");
            grow(&mut g, Box::new(Relu), &[current.as_str()], &next);
            current = next;
        }
        tails.push(current);
    }
    let tails: Vec<&str> = tails.iter().map(String::as_str).collect();
    grow(&mut g, Box::new(Sum), &tails, "y");
    g
}

fn bench_kahn(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_kahn");

    for tie_breaker in [KahnTieBreaker::Fifo, KahnTieBreaker::Greedy] {
        let g = fan(16, 8);
        let options = SchedulerOptions {
            kahn_tie_breaker: tie_breaker,
            ..SchedulerOptions::default()
        };
        let dag = DependencyGraph::build(&g, &OpsBeforeKey::new(), &options).expect("dag");
        group.bench_with_input(
            BenchmarkId::new("order", tie_breaker),
            &dag,
            |b, dag| {
                b.iter(|| {
                    compute_schedule(black_box(dag), RequireOptimalSchedule::No, &options)
                        .expect("schedule failed")
                });
            },
        );
    }

    group.finish();
}

fn bench_anneal(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_anneal");
    group.sample_size(20);

    for (width, depth) in [(4usize, 4usize), (16, 8), (32, 16)] {
        let g = fan(width, depth);
        let options = SchedulerOptions {
            swap_limit: 20_000,
            ..SchedulerOptions::default()
        };
        let dag = DependencyGraph::build(&g, &OpsBeforeKey::new(), &options).expect("dag");
        group.bench_with_input(
            BenchmarkId::new("optimal", format!("{width}x{depth}")),
            &dag,
            |b, dag| {
                b.iter(|| {
                    compute_schedule(black_box(dag), RequireOptimalSchedule::Yes, &options)
                        .expect("schedule failed")
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_kahn, bench_anneal);

criterion_main!(benches);
