use criterion::{criterion_group, criterion_main, Criterion};
use rating_kernel_core::{manhattan, pearson, RatingVector};

fn mk_vector(offset: usize, items: usize) -> RatingVector {
    (0..items)
        .map(|index| {
            let rating = f64::from(u32::try_from((index + offset) % 11).unwrap_or(0));
            (format!("item-{index}"), rating / 2.0)
        })
        .collect()
}

fn bench_manhattan(c: &mut Criterion) {
    let left = mk_vector(0, 5_000);
    let right = mk_vector(3, 5_000);

    c.bench_function("manhattan_5000_shared_items", |b| {
        b.iter(|| {
            let distance = manhattan(&left, &right);
            assert!(distance >= 0.0);
        });
    });
}

fn bench_pearson(c: &mut Criterion) {
    let left = mk_vector(0, 5_000);
    let right = mk_vector(3, 5_000);

    c.bench_function("pearson_5000_shared_items", |b| {
        b.iter(|| {
            if let Err(err) = pearson(&left, &right) {
                panic!("pearson benchmark failed: {err}");
            }
        });
    });
}

criterion_group!(similarity_benches, bench_manhattan, bench_pearson);
criterion_main!(similarity_benches);
