//! Room registry benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parley_protocol::Frame;
use parley_server::{ConnectionId, Deliver, RoomRegistry, RoomsConfig};
use std::sync::Arc;

/// Discards every frame.
struct Sink;

impl Deliver for Sink {
    fn deliver(&self, frame: Frame) -> bool {
        black_box(frame);
        true
    }
}

fn registry_with_members(members: u64, capacity: usize) -> RoomRegistry {
    let registry = RoomRegistry::new(&RoomsConfig {
        history_capacity: capacity,
        ..Default::default()
    });
    for id in 0..members {
        registry.register(id, Arc::new(Sink));
        registry.assign_uuid(id).unwrap();
    }
    registry
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for members in [1, 10, 100] {
        let registry = registry_with_members(members, 1000);

        group.throughput(Throughput::Elements(members));
        group.bench_with_input(BenchmarkId::from_parameter(members), &registry, |b, registry| {
            b.iter(|| black_box(registry.broadcast(0, "hello everyone").unwrap()));
        });
    }

    group.finish();
}

fn bench_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll");

    for backlog in [1, 100, 1000] {
        let registry = registry_with_members(2, 10_000);
        let reader: ConnectionId = 1;

        group.throughput(Throughput::Elements(backlog as u64));
        group.bench_with_input(BenchmarkId::from_parameter(backlog), &backlog, |b, &backlog| {
            b.iter(|| {
                for _ in 0..backlog {
                    registry.broadcast(0, "queued").unwrap();
                }
                black_box(registry.poll(reader).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_join(c: &mut Criterion) {
    let registry = registry_with_members(100, 1000);
    registry.create("dev");

    c.bench_function("join", |b| {
        let mut toggle = false;
        b.iter(|| {
            toggle = !toggle;
            let room = if toggle { "dev" } else { "the lobby" };
            registry.join(7, room).unwrap();
        });
    });
}

criterion_group!(benches, bench_broadcast, bench_poll, bench_join);

criterion_main!(benches);
