//! Identity table benchmarks
//!
//! Measures proxy lookup and the reachability sweep.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use gcbridge::sandbox::Sandbox;
use gcbridge::HostObject;

fn populated(count: usize) -> (Sandbox, Vec<HostObject>) {
    let sandbox = Sandbox::new().unwrap();
    let class = sandbox.define_bound_class("Game.Actor", None);
    let objects: Vec<HostObject> = (0..count)
        .map(|i| sandbox.spawn(class, &format!("Actor_{i}")))
        .collect();
    for &object in &objects {
        sandbox.cx.get_foreign_object(object).unwrap();
    }
    (sandbox, objects)
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_lookup");

    let (sandbox, objects) = populated(1000);
    group.bench_function("existing_proxy", |b| {
        let mut next = objects.iter().cycle();
        b.iter(|| {
            let object = *next.next().unwrap();
            black_box(sandbox.cx.get_foreign_object(object).unwrap())
        });
    });

    group.bench_function("create_proxy", |b| {
        b.iter_batched(
            || populated(1),
            |(sandbox, objects)| {
                sandbox.cx.shutdown();
                black_box(sandbox.cx.get_foreign_object(objects[0]).unwrap())
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_sweep");

    for count in [100usize, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let (sandbox, objects) = populated(count);
                    for object in objects.iter().step_by(2) {
                        sandbox.host.mark_unreachable(*object);
                    }
                    sandbox
                },
                |sandbox| black_box(sandbox.cx.on_reachability_pass()),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lookup, bench_sweep);
criterion_main!(benches);
