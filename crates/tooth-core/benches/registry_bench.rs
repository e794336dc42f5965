//! Criterion benchmarks for [`PeerRegistry`] discovery recording.
//!
//! A busy scan in a crowded room reports the same few dozen peers over and
//! over, so the re-discovery (overwrite) path matters as much as insertion.
//!
//! Run with:
//! ```bash
//! cargo bench --package tooth-core --bench registry_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tooth_core::{Peer, PeerAddress, PeerRegistry};

fn address(n: u32) -> PeerAddress {
    let b = n.to_be_bytes();
    PeerAddress::from_octets([0x02, 0x00, b[0], b[1], b[2], b[3]])
}

fn bench_fresh_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_insert");
    for n in [10u32, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut registry = PeerRegistry::new();
                for i in 0..n {
                    registry.record_discovery(Peer::new(address(i), "peer"));
                }
                black_box(registry.len())
            });
        });
    }
    group.finish();
}

fn bench_rediscovery(c: &mut Criterion) {
    let mut registry = PeerRegistry::new();
    for i in 0..100 {
        registry.record_discovery(Peer::new(address(i), "peer"));
    }

    c.bench_function("registry_rediscover_100", |b| {
        b.iter(|| {
            for i in 0..100 {
                black_box(registry.record_discovery(Peer::new(address(i), "peer")));
            }
        });
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let mut registry = PeerRegistry::new();
    for i in 0..500 {
        registry.record_discovery(Peer::new(address(i), "peer"));
    }

    c.bench_function("registry_snapshot_500", |b| {
        b.iter(|| black_box(registry.all()));
    });
}

criterion_group!(benches, bench_fresh_inserts, bench_rediscovery, bench_snapshot);
criterion_main!(benches);
