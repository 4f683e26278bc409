//! Criterion benchmarks for token decoding and caveat verification.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use lsat_paywall::{
    Caveat, HmacMacaroon, Identifier, Lsat, Macaroon, RootKey, SatisfierContext, SatisfierSet,
    check_caveats, verify_macaroons,
};

fn root_key() -> RootKey {
    RootKey::from_bytes(&[3; 32]).expect("valid key")
}

fn macaroon_with_caveats(count: usize) -> HmacMacaroon {
    let identifier = Identifier::new(&[1; 32], &[2; 32]).expect("valid identifier");
    let mut macaroon =
        HmacMacaroon::create("lsat", &root_key(), &identifier.encode()).expect("mint");
    for i in 0..count {
        let until = i64::MAX - i64::try_from(i).expect("small count");
        macaroon
            .add_first_party_caveat(&Caveat::expiration(until).encode())
            .expect("caveat");
    }
    macaroon
}

/// Benchmark: caveat decoding
fn bench_caveat_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("caveat_decode");

    let test_cases = [
        ("expiration", "expiration=1700000000000"),
        ("route", "route=/api/v1/videos/42"),
        (
            "challenge",
            "challenge=0b8a6c2f7ef3d2b0b9a8c7d6e5f4a3b2c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7f6:02abcdef:",
        ),
    ];

    for (name, text) in test_cases {
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("decode", name), &text, |b, text| {
            b.iter(|| Caveat::decode(black_box(text)));
        });
    }

    group.finish();
}

/// Benchmark: identifier decoding
fn bench_identifier(c: &mut Criterion) {
    let bytes = Identifier::new(&[7; 32], &[9; 32]).expect("valid").encode();
    c.bench_function("identifier_decode", |b| {
        b.iter(|| Identifier::decode(black_box(&bytes)));
    });
}

/// Benchmark: `Authorization` header parsing
fn bench_token_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_parse");

    for count in [0, 4, 16] {
        let token = Lsat::from_macaroon(macaroon_with_caveats(count), None)
            .expect("valid token")
            .to_token();
        group.bench_with_input(BenchmarkId::new("caveats", count), &token, |b, token| {
            b.iter(|| Lsat::from_token(black_box(token)));
        });
    }

    group.finish();
}

/// Benchmark: signature and caveat verification as the chain grows
fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify");
    let key = root_key();
    let satisfiers = SatisfierSet::builtin(false);

    for count in [1, 4, 16, 64] {
        let macaroon = macaroon_with_caveats(count);
        group.bench_with_input(BenchmarkId::new("macaroon", count), &macaroon, |b, m| {
            b.iter(|| {
                let mut ctx = SatisfierContext::new(0);
                verify_macaroons(&[(black_box(m), &key)], &satisfiers, &mut ctx)
            });
        });

        let caveats: Vec<Caveat> = (0..count)
            .map(|i| Caveat::expiration(1_000_000 - i64::try_from(i).expect("small count")))
            .collect();
        group.bench_with_input(BenchmarkId::new("caveats_only", count), &caveats, |b, cs| {
            b.iter(|| {
                let mut ctx = SatisfierContext::new(0);
                check_caveats(black_box(cs), &satisfiers, &mut ctx)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_caveat_decode,
    bench_identifier,
    bench_token_parse,
    bench_verify,
);
criterion_main!(benches);
