//! Fan-out benchmarks for the hub.
//!
//! These benchmarks measure the cost of one broadcast across subscriber counts
//! and mailbox conditions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::{Duration, Instant};
use trackhub_core::{Hub, HubConfig, LocationEvent, Mailbox, OverflowPolicy};

fn register(hub: &Hub, count: usize) -> Vec<Mailbox> {
    (0..count)
        .map(|i| hub.register(format!("customer-{}", i)).unwrap())
        .collect()
}

/// Broadcast with every mailbox drained between events.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let event = LocationEvent::now("bus-1", 106.82, -6.17);

    for size in [1usize, 10, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_custom(|iters| {
                let hub = Hub::new();
                let mut mailboxes = register(&hub, size);

                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let event = event.clone();
                    let start = Instant::now();
                    black_box(hub.broadcast(event));
                    elapsed += start.elapsed();

                    for mailbox in &mut mailboxes {
                        let _ = mailbox.try_recv();
                    }
                }
                elapsed
            });
        });
    }

    group.finish();
}

/// Broadcast when some or all mailboxes are full.
fn bench_overflow(c: &mut Criterion) {
    let mut group = c.benchmark_group("overflow");
    let event = LocationEvent::now("bus-1", 106.82, -6.17);

    group.bench_function("one_stalled_of_100", |b| {
        b.iter_custom(|iters| {
            let hub = Hub::new();
            let mut mailboxes = register(&hub, 100);
            // Never drained: full after the first few broadcasts.
            let _stalled = mailboxes.pop();

            let mut elapsed = Duration::ZERO;
            for _ in 0..iters {
                let event = event.clone();
                let start = Instant::now();
                black_box(hub.broadcast(event));
                elapsed += start.elapsed();

                for mailbox in &mut mailboxes {
                    let _ = mailbox.try_recv();
                }
            }
            elapsed
        });
    });

    group.bench_function("all_full_1000", |b| {
        let hub = Hub::with_config(HubConfig {
            mailbox_capacity: 1,
            overflow_policy: OverflowPolicy::DropNewest,
        });
        let _mailboxes = register(&hub, 1000);
        hub.broadcast(event.clone());

        b.iter(|| hub.broadcast(black_box(event.clone())));
    });

    group.finish();
}

/// Register and unregister one subscriber while 1000 others stay registered.
fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("register_unregister", |b| {
        let hub = Hub::new();
        let _mailboxes = register(&hub, 1000);

        b.iter(|| {
            let mailbox = hub.register(black_box("churn")).unwrap();
            hub.unregister_registration(mailbox.registration())
        });
    });

    group.bench_function("snapshot_1000", |b| {
        let hub = Hub::new();
        let _mailboxes = register(&hub, 1000);

        b.iter(|| black_box(hub.snapshot()));
    });

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_overflow, bench_registration);
criterion_main!(benches);
