//! Benchmarks for flat-index k-NN search

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use snapdex::{Embedding, FlatIndex};

fn create_random_embeddings(n: usize, dim: usize) -> Vec<Embedding> {
    (0..n)
        .map(|_| {
            let data: Vec<f32> = (0..dim).map(|_| rand::random::<f32>()).collect();
            Embedding::new(data)
        })
        .collect()
}

fn benchmark_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    for size in [100, 1000, 10000].iter() {
        let mut index = FlatIndex::new();
        for embedding in create_random_embeddings(*size, 128) {
            index.insert(embedding).unwrap();
        }

        let query = Embedding::new(vec![0.5; 128]);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| index.search(black_box(&query), black_box(10)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_search);
criterion_main!(benches);
