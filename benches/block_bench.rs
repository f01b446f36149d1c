use criterion::{black_box, criterion_group, criterion_main, Criterion};
use refcounted_array::block::BlockRef;
use std::time::Duration;

fn bench_block_alloc_release(c: &mut Criterion) {
    c.bench_function("block_alloc_release_1k", |b| {
        b.iter(|| {
            let blk = BlockRef::<u64>::try_new_default(1_000).unwrap();
            black_box(blk.as_ptr());
            blk.release();
        })
    });
}

fn bench_block_share_release(c: &mut Criterion) {
    c.bench_function("block_share_release", |b| {
        let blk = BlockRef::<u64>::try_new_default(16).unwrap();
        b.iter(|| {
            let s = blk.share();
            black_box(s.ref_count());
            s.release();
        });
        blk.release();
    });
}

fn bench_block_copy(c: &mut Criterion) {
    c.bench_function("block_from_slice_1k", |b| {
        let src: Vec<u64> = (0..1_000).collect();
        b.iter(|| {
            let blk = BlockRef::try_from_slice(black_box(&src[..])).unwrap();
            blk.release();
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_block_alloc_release, bench_block_share_release, bench_block_copy
}
criterion_main!(benches);
