//! Stress test - many jobs across several queues
//!
//! Drives a small pool hard from concurrent producers and consumers,
//! mixing ordered queues with a fire-and-forget in_only queue, and
//! reports throughput plus how often the non-blocking path hit
//! backpressure.

use seqpool::{Pool, PoolConfig, PoolError, QueueConfig, ShutdownMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    println!("=== seqpool Stress Test ===\n");

    let jobs_per_queue: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(50_000);
    let config = match std::env::args().nth(2).and_then(|s| s.parse().ok()) {
        Some(n) => PoolConfig::new().workers(n),
        None => PoolConfig::from_env().expect("invalid SEQPOOL_WORKERS"),
    };

    println!("{} jobs per queue, {} workers\n", jobs_per_queue, config.workers);

    let pool = Pool::with_config(config).expect("failed to start pool");
    let qa = Arc::new(pool.queue::<u64>(64).expect("queue a"));
    let qb = Arc::new(pool.queue::<u64>(64).expect("queue b"));
    let fire: Arc<seqpool::SeqQueue<()>> = Arc::new(
        pool.queue_with(QueueConfig::new().qsize(64).in_only(true))
            .expect("fire queue"),
    );
    qa.attach();
    qb.attach();
    fire.attach();

    let would_block = Arc::new(AtomicU64::new(0));
    let fired = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let mut threads = Vec::new();

    // Ordered producers: blocking dispatch.
    for q in [Arc::clone(&qa), Arc::clone(&qb)] {
        threads.push(thread::spawn(move || {
            for i in 0..jobs_per_queue {
                q.dispatch(move || i.wrapping_mul(2654435761)).expect("dispatch");
            }
        }));
    }

    // Fire-and-forget producer: non-blocking, retrying on backpressure.
    {
        let fire = Arc::clone(&fire);
        let would_block = Arc::clone(&would_block);
        let fired = Arc::clone(&fired);
        threads.push(thread::spawn(move || {
            let mut sent = 0u64;
            while sent < jobs_per_queue {
                let fired = Arc::clone(&fired);
                match fire.try_dispatch(move || {
                    fired.fetch_add(1, Ordering::Relaxed);
                }) {
                    Ok(()) => sent += 1,
                    Err(PoolError::WouldBlock) => {
                        would_block.fetch_add(1, Ordering::Relaxed);
                        thread::yield_now();
                    }
                    Err(e) => panic!("fire dispatch failed: {}", e),
                }
            }
        }));
    }

    // Ordered consumers: verify the serial stream is contiguous.
    for q in [Arc::clone(&qa), Arc::clone(&qb)] {
        threads.push(thread::spawn(move || {
            for i in 0..jobs_per_queue {
                let done = q.recv().expect("recv");
                assert_eq!(done.serial().as_u64(), i);
            }
        }));
    }

    for t in threads {
        t.join().expect("worker thread panicked");
    }
    fire.flush().expect("flush");

    let elapsed = start.elapsed();
    let total = pool.jobs_completed();
    println!("Completed {} jobs in {:?}", total, elapsed);
    println!(
        "Throughput: {:.0} jobs/sec",
        total as f64 / elapsed.as_secs_f64()
    );
    println!("Fire-and-forget ran: {}", fired.load(Ordering::Relaxed));
    println!(
        "Non-blocking backpressure hits: {}",
        would_block.load(Ordering::Relaxed)
    );

    drop(qa);
    drop(qb);
    drop(fire);
    pool.shutdown(ShutdownMode::Drain);
    println!("\nDone!");
}
