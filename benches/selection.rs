//! Placement selection benchmarks
//!
//! Run with: cargo bench --bench selection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use latejoin::game::selector::{select, sort_for_selection};
use latejoin::game::snapshot::PeerSnapshot;
use latejoin::game::state::{Platform, WorldState};
use latejoin::latejoin::placement::{arrival_point, PlacementSettings};
use latejoin::util::vec3::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

/// Peers scattered over a hillside, one in ten dead
fn create_peers(count: usize) -> Vec<PeerSnapshot> {
    let mut rng = StdRng::seed_from_u64(42);

    (0..count)
        .map(|i| {
            let position = Vec3::new(
                rng.gen_range(-500.0..500.0),
                rng.gen_range(0.0..200.0),
                rng.gen_range(-500.0..500.0),
            );
            let grounded = rng.gen_bool(0.8).then_some(position);
            PeerSnapshot::new(Uuid::new_v4(), i % 10 != 0, grounded, position + Vec3::UP)
        })
        .collect()
}

/// Benchmark target selection over growing peer sets
fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");
    group.sample_size(50);

    for count in [8, 64, 512, 4096] {
        let peers = create_peers(count);
        let exclude = peers[count / 2].id;

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("lowest_living", count), &count, |b, _| {
            b.iter(|| black_box(select(&peers, black_box(exclude))))
        });
    }
    group.finish();
}

/// Benchmark the sort that makes selection reproducible, plus the select itself
fn bench_sorted_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_select");
    group.sample_size(50);

    for count in [8, 64, 512, 4096] {
        let peers = create_peers(count);
        let exclude = peers[0].id;

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("sort_then_select", count), &count, |b, _| {
            b.iter(|| {
                let mut snapshot = peers.clone();
                sort_for_selection(&mut snapshot);
                black_box(select(&snapshot, exclude))
            })
        });
    }
    group.finish();
}

/// Benchmark arrival point probing around a target
fn bench_arrival_point(c: &mut Criterion) {
    let mut world = WorldState::new();
    world.add_platform(Platform::new(Vec3::ZERO, 100.0, 100.0));
    for i in 0..32 {
        let x = (i % 8) as f32 * 10.0 - 40.0;
        let z = (i / 8) as f32 * 10.0 - 20.0;
        world.add_platform(Platform::new(Vec3::new(x, (i % 5) as f32, z), 2.0, 2.0));
    }

    let target = PeerSnapshot::new(Uuid::new_v4(), true, Some(Vec3::new(0.0, 4.0, 0.0)), Vec3::new(0.0, 5.6, 0.0));
    let settings = PlacementSettings::default();
    let mut rng = StdRng::seed_from_u64(7);

    c.bench_function("arrival_point", |b| {
        b.iter(|| black_box(arrival_point(&target, &world, &settings, &mut rng)))
    });
}

criterion_group!(benches, bench_select, bench_sorted_select, bench_arrival_point);
criterion_main!(benches);
