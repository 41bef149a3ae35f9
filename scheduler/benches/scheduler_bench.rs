use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use msc::buffers::LogicalBuffer;
use msc::ir::{InstrId, Module, Opcode};
use msc::schedule::{schedule_module, Algorithm};

fn size(b: &LogicalBuffer) -> u64 {
    b.bytes
}

// ── Synthetic module shapes ─────────────────────────────────────────────────

/// A single dependency chain; worst case for traversal depth.
fn chain(n: usize) -> Module {
    let mut m = Module::new("chain");
    let c = m.add_computation("main");
    let mut prev = m.add_parameter(c, "p", 64);
    for i in 0..n {
        prev = m.add_instruction(c, Opcode::Negate, format!("n{i}"), &[prev], 64);
    }
    m
}

/// `depth` layers of `width` nodes, each reading two nodes of the previous
/// layer; exercises the ready-set priority churn.
fn layered(width: usize, depth: usize) -> Module {
    let mut m = Module::new("layered");
    let c = m.add_computation("main");
    let mut layer: Vec<InstrId> = (0..width)
        .map(|i| m.add_parameter(c, format!("p{i}"), 32))
        .collect();
    for d in 0..depth {
        layer = (0..width)
            .map(|i| {
                let a = layer[i];
                let b = layer[(i + 1) % width];
                m.add_instruction(c, Opcode::Add, format!("l{d}_{i}"), &[a, b], 32)
            })
            .collect();
    }
    let root = m.add_instruction(c, Opcode::Tuple, "root", &layer, 8);
    m.set_root(c, root);
    m
}

/// Wide fan-out from one producer into many independent reducers; the
/// shape where freeing the shared buffer dominates the heuristic.
fn fanout(readers: usize) -> Module {
    let mut m = Module::new("fanout");
    let c = m.add_computation("main");
    let p = m.add_parameter(c, "p", 8);
    let shared = m.add_instruction(c, Opcode::Negate, "shared", &[p], 4096);
    let sinks: Vec<InstrId> = (0..readers)
        .map(|i| m.add_instruction(c, Opcode::Negate, format!("r{i}"), &[shared], 16))
        .collect();
    let root = m.add_instruction(c, Opcode::Tuple, "root", &sinks, 8);
    m.set_root(c, root);
    m
}

// ── Benchmarks ──────────────────────────────────────────────────────────────

fn bench_algorithms(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("algorithms");
    let module = layered(16, 24);
    for (label, algorithm) in [
        ("list", Algorithm::List),
        ("dfs", Algorithm::Dfs),
        ("post_order", Algorithm::PostOrder),
        ("default", Algorithm::Default),
    ] {
        group.bench_with_input(
            BenchmarkId::new("layered_16x24", label),
            &algorithm,
            |bench, &algorithm| {
                bench.iter(|| schedule_module(&module, &size, Some(algorithm)).unwrap())
            },
        );
    }
    group.finish();
}

fn bench_shapes(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("shapes");
    let shapes: [(&str, Module); 3] = [
        ("chain_1024", chain(1024)),
        ("layered_32x32", layered(32, 32)),
        ("fanout_512", fanout(512)),
    ];
    for (label, module) in &shapes {
        group.bench_with_input(BenchmarkId::from_parameter(label), module, |bench, module| {
            bench.iter(|| schedule_module(module, &size, None).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_algorithms, bench_shapes);
criterion_main!(benches);
