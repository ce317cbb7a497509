mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use raf::engine::{EngineOptions, engines};
use raf::source::Source;

fn bench_backends(c: &mut Criterion) {
    let options = EngineOptions::default();
    for (label, text) in common::workloads() {
        let source = Source::new(format!("{label}.raf"), text);
        for engine in engines() {
            c.bench_function(&format!("run_{}_{label}", engine.name()), |b| {
                b.iter(|| {
                    let outcome = engine.run(black_box(&source), &options);
                    assert!(outcome.error.is_none());
                    black_box(outcome.lines);
                })
            });
        }
    }
}

criterion_group!(benches, bench_backends);
criterion_main!(benches);
