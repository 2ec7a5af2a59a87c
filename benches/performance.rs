//! Performance benchmarks for the durable log.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use logchat::chat::compose;
use logchat::{ConsumerConfig, DeliverPolicy, LogClient, StreamConfig};
use std::time::Duration;
use tempfile::TempDir;

fn create_log(dir: &TempDir) -> LogClient {
    let log = LogClient::connect(dir.path().to_str().unwrap()).unwrap();
    log.add_stream(StreamConfig::for_channel("room1", Duration::from_secs(3600)))
        .unwrap();
    log
}

/// Benchmark appends with varying payload sizes
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");

    for size in [16, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("payload_bytes", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let log = create_log(&dir);
            let text = "x".repeat(size);

            b.iter(|| {
                black_box(
                    log.publish(compose("room1", "alice", &text, Utc::now()))
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

/// Benchmark history pulls over logs of varying length
fn bench_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch");

    for entries in [100, 1000, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("log_entries", entries),
            &entries,
            |b, &entries| {
                let dir = TempDir::new().unwrap();
                let log = create_log(&dir);
                for i in 0..entries {
                    log.publish(compose("room1", "alice", &format!("m{i}"), Utc::now()))
                        .unwrap();
                }

                let mut round = 0u64;
                b.iter(|| {
                    // Fresh reader each round so every pull starts at the beginning
                    round += 1;
                    let name = format!("reader{round}");
                    let mut config = ConsumerConfig::durable(&name, Duration::from_secs(30));
                    config.deliver_policy = DeliverPolicy::All;
                    log.add_consumer("room1", config).unwrap();

                    let batch = log
                        .fetch("room1", &name, 10, Duration::from_millis(10))
                        .unwrap();
                    for pulled in &batch.entries {
                        pulled.ack().unwrap();
                    }
                    black_box(batch.head);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_publish, bench_fetch);
criterion_main!(benches);
