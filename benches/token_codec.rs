use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use uuid::Uuid;

use projectdesk::identity::IdentityCodec;

fn gen_ids(n: usize, seed: u64) -> Vec<Uuid> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| Uuid::from_u128(rng.gen::<u128>())).collect()
}

fn bench_token_codec(c: &mut Criterion) {
    let codec = match IdentityCodec::new(b"bench-secret") {
        Ok(c) => c,
        Err(e) => panic!("codec: {}", e),
    };
    let ns = [1_000usize, 10_000usize];
    let mut group = c.benchmark_group("identity_token");
    group.sample_size(30);

    for &n in &ns {
        let ids = gen_ids(n, 0xC00C_1E00);
        let tokens: Vec<String> = ids.iter().map(|id| codec.encode(*id)).collect();
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("encode", n.to_string()), &n, |b, _| {
            b.iter(|| {
                for id in &ids { criterion::black_box(codec.encode(*id)); }
            });
        });

        group.bench_with_input(BenchmarkId::new("decode_valid", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let mut ok = 0usize;
                for t in &tokens { if codec.decode(t).is_some() { ok += 1; } }
                criterion::black_box(ok);
            });
        });

        // Tampered tail: the full MAC comparison must still run.
        let forged: Vec<String> = tokens
            .iter()
            .map(|t| {
                let mut s = t.clone();
                let last = if s.ends_with('0') { '1' } else { '0' };
                s.pop();
                s.push(last);
                s
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("decode_forged", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let mut ok = 0usize;
                for t in &forged { if codec.decode(t).is_some() { ok += 1; } }
                criterion::black_box(ok);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_token_codec);
criterion_main!(benches);
