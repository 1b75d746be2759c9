/// Call graph construction from recorded call relationships
///
/// Graphs are built once per consumer request, from however many distinct
/// caller/callee pairs a long profiling session collected.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vmprof::call_graph::CallGraph;
use vmprof::function::FunctionId;
use vmprof::function_profiler::CallRecord;
use vmprof::stats::StatsTable;

/// A call tree with `fanout` callees per function, `depth` levels deep
fn call_tree(fanout: i32, depth: u32) -> (Vec<CallRecord>, StatsTable) {
    let mut calls = vec![CallRecord {
        caller: None,
        callee: FunctionId::MAIN,
    }];
    let mut stats = StatsTable::new();
    stats.record_entry(FunctionId::MAIN);

    let mut level = vec![FunctionId::MAIN];
    let mut next_address = 0;
    for _ in 0..depth {
        let mut children = Vec::new();
        for &caller in &level {
            for _ in 0..fanout {
                next_address += 0x40;
                let callee = FunctionId::Normal(next_address);
                stats.record_entry(callee);
                calls.push(CallRecord {
                    caller: Some(caller),
                    callee,
                });
                children.push(callee);
            }
        }
        level = children;
    }
    (calls, stats)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for (fanout, depth) in [(4, 3), (8, 3), (4, 5)] {
        let (calls, stats) = call_tree(fanout, depth);
        group.bench_with_input(
            BenchmarkId::new("records", calls.len()),
            &calls,
            |b, calls| b.iter(|| CallGraph::build(black_box(calls), &stats).expect("known functions")),
        );
    }

    group.finish();
}

fn bench_traverse(c: &mut Criterion) {
    let (calls, stats) = call_tree(8, 3);
    let graph = CallGraph::build(&calls, &stats).expect("known functions");

    c.bench_function("graph_traverse_585", |b| {
        b.iter(|| {
            let mut visited = 0usize;
            graph.traverse(|node| visited += node.callees().len());
            black_box(visited)
        })
    });
}

criterion_group!(benches, bench_build, bench_traverse);
criterion_main!(benches);
