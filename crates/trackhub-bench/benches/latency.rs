//! Latency benchmarks.
//!
//! Time from an event entering the system to a subscriber holding it.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Instant;
use tokio::sync::watch;
use trackhub_core::{Hub, LocationEvent};
use trackhub_log::{FileLog, FileLogConfig, LogConsumer, LogPublisher, MemoryLog, StartFrom};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Broadcast then receive on the same task.
fn bench_hub_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_latency");
    let rt = runtime();

    group.bench_function("single_subscriber", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let hub = Hub::new();
                let mut mailbox = hub.register("customer-1").unwrap();

                let start = Instant::now();
                for _ in 0..iters {
                    hub.broadcast(LocationEvent::now("bus-1", 1.0, 2.0));
                    black_box(mailbox.recv().await);
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Publish to a log, consume, broadcast, receive.
fn bench_pipeline_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_latency");
    let rt = runtime();

    group.bench_function("memory_log", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let log = MemoryLog::new();
                let mut consumer = log.consumer(StartFrom::End);
                let hub = Hub::new();
                let mut mailbox = hub.register("customer-1").unwrap();

                let start = Instant::now();
                for _ in 0..iters {
                    log.publish(&LocationEvent::now("bus-1", 1.0, 2.0))
                        .await
                        .unwrap();
                    if let Some(event) = consumer.next().await.unwrap() {
                        hub.on_event(event);
                    }
                    black_box(mailbox.recv().await);
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("file_log", |b| {
        let path = std::env::temp_dir().join(format!("trackhub-bench-{}.log", std::process::id()));

        b.iter_custom(|iters| {
            rt.block_on(async {
                let _ = tokio::fs::remove_file(&path).await;
                let log = FileLog::open(FileLogConfig {
                    path: path.clone(),
                    ..FileLogConfig::default()
                })
                .await
                .unwrap();
                let (_tx, rx) = watch::channel(false);
                let mut consumer = log.consumer(StartFrom::End, rx).await.unwrap();
                let hub = Hub::new();
                let mut mailbox = hub.register("customer-1").unwrap();

                let start = Instant::now();
                for _ in 0..iters {
                    log.publish(&LocationEvent::now("bus-1", 1.0, 2.0))
                        .await
                        .unwrap();
                    if let Some(event) = consumer.next().await.unwrap() {
                        hub.on_event(event);
                    }
                    black_box(mailbox.recv().await);
                }
                start.elapsed()
            })
        });

        let _ = std::fs::remove_file(&path);
    });

    group.finish();
}

criterion_group!(benches, bench_hub_latency, bench_pipeline_latency);
criterion_main!(benches);
