use std::collections::BTreeMap;

use arbor_core::buckets::{allocate, Multibucket};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Deterministic sentence lengths with a long tail.
fn lengths(n: usize) -> Vec<usize> {
    (0..n).map(|i| 3 + (i * 7919) % 40 + (i % 13) * (i % 5)).collect()
}

fn bench_allocate(c: &mut Criterion) {
    let mut histogram = BTreeMap::new();
    for len in lengths(10_000) {
        *histogram.entry(len).or_insert(0) += 1;
    }

    c.bench_function("allocate_5_buckets", |b| {
        b.iter(|| allocate(black_box(&histogram), 5).unwrap());
    });

    c.bench_function("allocate_40_buckets", |b| {
        b.iter(|| allocate(black_box(&histogram), 40).unwrap());
    });
}

fn bench_multibucket(c: &mut Criterion) {
    let sentences: Vec<Vec<String>> = lengths(2_000)
        .into_iter()
        .enumerate()
        .map(|(i, len)| (0..len).map(|j| format!("w{}", (i + j) % 500)).collect())
        .collect();

    c.bench_function("multibucket_close_2000", |b| {
        b.iter(|| {
            let mut mb = Multibucket::new("form", 5).unwrap();
            for sentence in &sentences {
                let feats = (0..sentence.len() as u32).collect();
                mb.add(sentence, feats).unwrap();
            }
            mb.close().unwrap();
            mb
        });
    });

    let mut mb = Multibucket::new("form", 5).unwrap();
    for sentence in &sentences {
        mb.add(sentence, (0..sentence.len() as u32).collect()).unwrap();
    }
    mb.close().unwrap();
    let request: Vec<usize> = (1..mb.len()).step_by(7).collect();

    c.bench_function("set_placeholders_request_order", |b| {
        b.iter(|| {
            let batch = mb.set_placeholders(black_box(&request)).unwrap();
            batch.to_request_order()
        });
    });
}

criterion_group!(benches, bench_allocate, bench_multibucket);
criterion_main!(benches);
