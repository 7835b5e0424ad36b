//! Dispatch/recv throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use seqpool::Pool;

fn bench_round_trip(c: &mut Criterion) {
    let pool = Pool::new(4).unwrap();
    let queue = pool.queue::<u64>(64).unwrap();
    queue.attach();

    c.bench_function("round_trip_64", |b| {
        b.iter(|| {
            for i in 0..64u64 {
                queue.dispatch(move || black_box(i)).unwrap();
            }
            for _ in 0..64 {
                black_box(queue.recv().unwrap());
            }
        })
    });
}

fn bench_multi_queue_fan_out(c: &mut Criterion) {
    let pool = Pool::new(4).unwrap();
    let queues: Vec<_> = (0..4)
        .map(|_| {
            let q = pool.queue::<u64>(32).unwrap();
            q.attach();
            q
        })
        .collect();

    c.bench_function("fan_out_4x32", |b| {
        b.iter(|| {
            for q in &queues {
                for i in 0..32u64 {
                    q.dispatch(move || black_box(i)).unwrap();
                }
            }
            for q in &queues {
                for _ in 0..32 {
                    black_box(q.recv().unwrap());
                }
            }
        })
    });
}

criterion_group!(benches, bench_round_trip, bench_multi_queue_fan_out);
criterion_main!(benches);
