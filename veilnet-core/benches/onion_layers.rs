use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use veilnet_core::core_path::hop_crypto::{unwrap_downstream, wrap_upstream};
use veilnet_core::core_path::{HopKeys, MAX_HOPS};

const PAYLOAD_SIZE: usize = 1024;

fn hop_keys(count: usize) -> Vec<HopKeys> {
    (0..count)
        .map(|_| HopKeys::from_parts(rand::random(), rand::random()))
        .collect()
}

fn bench_wrap_upstream(c: &mut Criterion) {
    let mut group = c.benchmark_group("onion_wrap_upstream");
    let payload = vec![0x5au8; PAYLOAD_SIZE];
    group.throughput(Throughput::Bytes(PAYLOAD_SIZE as u64));

    for hops in [1, 3, 5, MAX_HOPS] {
        let keys = hop_keys(hops);
        group.bench_with_input(BenchmarkId::new("hops", hops), &keys, |b, keys| {
            b.iter(|| black_box(wrap_upstream(keys.iter(), black_box(&payload)).unwrap()));
        });
    }

    group.finish();
}

fn bench_peel_along_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("onion_peel_along_path");
    let payload = vec![0x5au8; PAYLOAD_SIZE];
    group.throughput(Throughput::Bytes(PAYLOAD_SIZE as u64));

    for hops in [1, 3, 5, MAX_HOPS] {
        let keys = hop_keys(hops);
        let onion = wrap_upstream(keys.iter(), &payload).unwrap();
        group.bench_with_input(BenchmarkId::new("hops", hops), &onion, |b, onion| {
            b.iter(|| {
                // every hop removes its own layer in turn
                let mut data = onion.clone();
                for k in &keys {
                    data = k.peel_upstream(&data).unwrap();
                }
                black_box(data)
            });
        });
    }

    group.finish();
}

fn bench_downstream_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("onion_downstream");
    let payload = vec![0x5au8; PAYLOAD_SIZE];
    group.throughput(Throughput::Bytes(PAYLOAD_SIZE as u64));

    for hops in [1, 3, 5, MAX_HOPS] {
        let keys = hop_keys(hops);
        let mut reply = payload.clone();
        for k in keys.iter().rev() {
            reply = k.add_downstream(&reply).unwrap();
        }
        group.bench_with_input(BenchmarkId::new("unwrap", hops), &reply, |b, reply| {
            b.iter(|| black_box(unwrap_downstream(keys.iter(), black_box(reply)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_wrap_upstream,
    bench_peel_along_path,
    bench_downstream_round
);
criterion_main!(benches);
