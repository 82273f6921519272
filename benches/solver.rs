//! Assembly + solve throughput on a generated contact set.

use ccp_solver::{BodyState, CcpSolver, ContactPoint, DataManager, SolverKind};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nalgebra::Vector3;
use std::hint::black_box;

/// A row of unit spheres resting on a long fixed slab: one contact per
/// sphere, all penetrating slightly.
fn resting_row(num_spheres: usize) -> DataManager {
    let mut data = DataManager::new();
    let mut bodies = vec![BodyState::fixed(
        Vector3::new(0.0, 0.0, -0.5),
        nalgebra::UnitQuaternion::identity(),
    )];
    for i in 0..num_spheres {
        bodies.push(BodyState {
            pos: Vector3::new(i as f64 * 2.0, 0.0, 0.5),
            friction: Vector3::new(0.4, 0.0, 0.0),
            force: Vector3::new(0.0, 0.0, -9.81),
            ..BodyState::default()
        });
    }
    data.set_bodies(&bodies);

    let contacts: Vec<ContactPoint> = (0..num_spheres)
        .map(|i| ContactPoint {
            body_a: 0,
            body_b: i + 1,
            point_a: Vector3::new(i as f64 * 2.0, 0.0, 0.0),
            point_b: Vector3::new(i as f64 * 2.0, 0.0, 0.0),
            normal: Vector3::z(),
            depth: -1e-3,
            effective_radius: 0.5,
        })
        .collect();
    data.set_contacts(&contacts).unwrap();
    data.settings.tolerance = 1e-6;
    data.settings.max_iterations = 100;
    data
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_step");
    for &n in &[64_usize, 512, 2048] {
        group.throughput(Throughput::Elements(n as u64));
        for kind in [SolverKind::Apgd, SolverKind::Pgs] {
            group.bench_with_input(
                BenchmarkId::new(format!("{kind:?}"), n),
                &n,
                |bench, &n| {
                    let mut solver = CcpSolver::new();
                    bench.iter_batched(
                        || {
                            let mut data = resting_row(n);
                            data.settings.solver = kind;
                            data
                        },
                        |mut data| black_box(solver.run_step(&mut data, 1e-3)),
                        criterion::BatchSize::LargeInput,
                    );
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
