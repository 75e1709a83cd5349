//! Microbenchmarks for the hot primitives.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rxhash::{aes, blake2b, superscalar};

fn bench_blake2b(c: &mut Criterion) {
    let input = [0x37u8; 72];
    let mut digest = [0u8; 64];

    c.bench_function("blake2b_512", |b| {
        b.iter(|| blake2b::hash(&mut digest, black_box(&input)))
    });
}

fn bench_fill_1r(c: &mut Criterion) {
    let mut seed = [0x5au8; 64];
    let mut buffer = vec![0u8; rxhash::params::SCRATCHPAD_L3_SIZE as usize];

    c.bench_function("aes_fill_1r_scratchpad", |b| {
        b.iter(|| aes::fill_1r(black_box(&mut buffer), &mut seed))
    });
}

fn bench_hash_1r(c: &mut Criterion) {
    let mut seed = [0x5au8; 64];
    let mut buffer = vec![0u8; rxhash::params::SCRATCHPAD_L3_SIZE as usize];
    aes::fill_1r(&mut buffer, &mut seed).unwrap();
    let mut digest = [0u8; 64];

    c.bench_function("aes_hash_1r_scratchpad", |b| {
        b.iter(|| aes::hash_1r(&mut digest, black_box(&buffer)))
    });
}

fn bench_superscalar_generate(c: &mut Criterion) {
    c.bench_function("superscalar_generate_8", |b| {
        b.iter(|| {
            let mut generator =
                superscalar::Generator::new(blake2b::Rng::new(black_box(b"test key 000"), 0));
            for _ in 0..rxhash::params::CACHE_ACCESSES {
                black_box(generator.generate());
            }
        })
    });
}

criterion_group!(
    benches,
    bench_blake2b,
    bench_fill_1r,
    bench_hash_1r,
    bench_superscalar_generate
);
criterion_main!(benches);
