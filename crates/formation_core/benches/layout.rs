//! Layout benchmarks for formation_core.
//!
//! Run with: `cargo bench -p formation_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use formation_core::assignment::assign_slots;
use formation_core::components::{Footprint, UnitMotion};
use formation_core::data::FormationTemplate;
use formation_core::layout::{compute_offsets, SlotRng};
use formation_core::math::{Fixed, Vec2Fixed};
use formation_core::simulation::{EntitySpawnParams, Simulation};
use formation_test_utils::fixtures::uniform_layout_members;

/// Slot layout plus assignment for growing member counts.
pub fn layout_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout");
    let template = FormationTemplate::box_formation();

    for count in [10usize, 50, 200] {
        let members = uniform_layout_members(count, Footprint::UNIT);
        group.bench_with_input(BenchmarkId::new("compute_and_assign", count), &members, |b, members| {
            b.iter(|| {
                let mut rng = SlotRng::new(7);
                let plan = compute_offsets(black_box(members), &template, false, &mut rng);
                black_box(assign_slots(
                    members,
                    &plan.buckets,
                    &plan.slots,
                    Vec2Fixed::ZERO,
                    Vec2Fixed::FORWARD,
                ))
            });
        });
    }

    group.finish();
}

/// Shape updates of a formation switching to columns and back.
pub fn shape_update_benchmark(c: &mut Criterion) {
    c.bench_function("shape_update_100_members", |b| {
        b.iter_batched(
            || {
                let mut sim = Simulation::with_seed(3);
                let members: Vec<_> = (0..100)
                    .map(|i| {
                        sim.spawn_unit(EntitySpawnParams {
                            position: Some(Vec2Fixed::from_ints(i % 10 * 2, i / 10 * 2)),
                            owner: Some(1),
                            motion: Some(UnitMotion::new(Fixed::from_num(9), Fixed::ONE)),
                            ..Default::default()
                        })
                    })
                    .collect();
                let formation = sim
                    .create_formation(FormationTemplate::box_formation(), Some(1), &members)
                    .expect("valid formation");
                sim.order_move(formation, vec![Vec2Fixed::from_ints(0, 400)], None)
                    .expect("formation exists");
                sim
            },
            |mut sim| black_box(sim.tick(1000)),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, layout_benchmark, shape_update_benchmark);
criterion_main!(benches);
