use criterion::{black_box, criterion_group, criterion_main, Criterion};
use poolmem::dynamic_pool::DynamicPool;

fn alloc_free_cycle(c: &mut Criterion) {
    c.bench_function("dynamic_pool/alloc_free_cycle", |b| {
        let mut pool = DynamicPool::try_create(1 << 16).unwrap();
        b.iter(|| {
            let ptr = pool.try_alloc(64).unwrap();
            black_box(ptr);
            unsafe { pool.try_free(ptr.as_ptr()).unwrap() };
        });
    });
}

fn fragmented_alloc_safe(c: &mut Criterion) {
    c.bench_function("dynamic_pool/alloc_safe_under_fragmentation", |b| {
        b.iter(|| {
            let mut pool = DynamicPool::try_create(1 << 14).unwrap();
            let blocks: Vec<_> = (0..64).map(|_| pool.try_alloc(32).unwrap()).collect();
            for ptr in blocks.iter().step_by(2) {
                unsafe { pool.try_free(ptr.as_ptr()).unwrap() };
            }
            let result = pool.try_alloc_safe(256);
            black_box(result.ok());
        });
    });
}

criterion_group!(benches, alloc_free_cycle, fragmented_alloc_safe);
criterion_main!(benches);
