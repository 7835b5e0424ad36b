//! Basic seqpool example
//!
//! Dispatches jobs that finish in scrambled order and shows the queue
//! delivering their results in submission order anyway.

use seqpool::{Pool, PoolConfig, ShutdownMode};
use std::thread;
use std::time::Duration;

fn main() {
    println!("=== seqpool Basic Example ===\n");

    let config = PoolConfig::default().workers(4);
    println!("Starting pool with {} workers...", config.workers);

    let pool = Pool::with_config(config).expect("failed to start pool");
    let queue = pool.queue::<String>(16).expect("failed to create queue");
    queue.attach();

    println!("Dispatching 20 jobs with scrambled run times...\n");
    for i in 0..20u64 {
        queue
            .dispatch(move || {
                // Later jobs tend to finish earlier.
                thread::sleep(Duration::from_millis((97 * i) % 23));
                format!("job {} ran on {:?}", i, thread::current().name().unwrap_or("?"))
            })
            .expect("dispatch failed");
    }

    for _ in 0..20 {
        let done = queue.recv().expect("queue closed early");
        println!("serial {:>2}: {}", done.serial(), done.value());
    }

    println!("\nDispatched: {}", pool.jobs_dispatched());
    println!("Completed:  {}", pool.jobs_completed());

    drop(queue);
    pool.shutdown(ShutdownMode::Drain);
    println!("\nDone!");
}
