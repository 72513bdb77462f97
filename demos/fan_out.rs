//! Fan out a stream of jobs to competing workers over one bounded channel.
//!
//! Run with `RUST_LOG=debug cargo run --example fan_out` to watch the
//! scheduling decisions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use task_pipeline::{delay, BoundedChannel, Capacity, Config, Runtime};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = Runtime::new(
        Config::new()
            .worker_count(4)
            .task_timeout(Duration::from_secs(5)),
    );
    let processed = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&processed);
    let outcome = runtime.block_on(
        runtime
            .pipeline()
            .channel_capacity(Capacity::Bounded(4))
            .run_fan_out(
                |ch| async move {
                    for job in 0..16u32 {
                        tracing::info!(job, "submitting");
                        ch.send(job).await?;
                    }
                    Ok(())
                },
                (0..3).map(|worker| {
                    let sink = Arc::clone(&sink);
                    move |ch: BoundedChannel<u32>| async move {
                        while let Ok(job) = ch.recv().await {
                            // Pretend the job takes a moment.
                            delay(Duration::from_millis(10)).await;
                            tracing::info!(worker, job, "processed");
                            sink.lock().unwrap().push((worker, job));
                        }
                        Ok(())
                    }
                }),
            ),
    );

    let processed = processed.lock().unwrap();
    println!("outcome: {outcome:?}, {} jobs processed", processed.len());
    for worker in 0..3 {
        let share = processed.iter().filter(|(w, _)| *w == worker).count();
        println!("  worker {worker} handled {share}");
    }
}
