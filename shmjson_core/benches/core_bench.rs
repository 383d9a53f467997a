use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use shmjson_core::{MemPool, ShmTable};

fn bench_pool_alloc_free(c: &mut Criterion) {
    let pool = MemPool::create(None, 32, 4096).unwrap();
    c.bench_function("pool_alloc_free_48b", |b| {
        b.iter(|| {
            let p = pool.alloc(black_box(48)).unwrap();
            pool.free(p);
        })
    });
}

fn bench_pool_fragmented_alloc(c: &mut Criterion) {
    // every other run freed: allocations scan past single-slot holes
    let pool = MemPool::create(None, 32, 8192).unwrap();
    let runs: Vec<_> = (0..2048).map(|_| pool.alloc(24).unwrap()).collect();
    for p in runs.iter().step_by(2) {
        pool.free(*p);
    }
    c.bench_function("pool_alloc_fragmented_2slot", |b| {
        b.iter(|| {
            if let Some(p) = pool.alloc(black_box(56)) {
                pool.free(p);
            }
        })
    });
}

fn bench_table_insert_lookup(c: &mut Criterion) {
    let keys: Vec<String> = (0..256).map(|i| format!("member_{}", i)).collect();
    c.bench_function("table_insert_lookup_256", |b| {
        b.iter(|| {
            let pool = MemPool::create(None, 32, 16384).unwrap();
            let mut t = ShmTable::create(0, &pool).unwrap();
            for key in &keys {
                let cell = pool.alloc(8).unwrap();
                t.insert(key, cell).unwrap();
            }
            for key in &keys {
                black_box(t.lookup(key));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_pool_alloc_free,
    bench_pool_fragmented_alloc,
    bench_table_insert_lookup
);
criterion_main!(benches);
