//! End-to-end behavior of groups, channels, sequences, and the runner.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use task_pipeline::runner::stage;
use task_pipeline::seq::{from_iter, generate, LazySequence};
use task_pipeline::{delay, BoundedChannel, Capacity, Config, Error, Runtime, TaskState};

#[test]
fn a_group_of_delayed_tasks_all_complete() {
    let runtime = Runtime::new(Config::new().worker_count(4));
    let counter = Arc::new(AtomicUsize::new(0));

    let group = runtime.group();
    for _ in 0..32 {
        let counter = Arc::clone(&counter);
        let _ = group.spawn(async move {
            delay(Duration::from_millis(1)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    runtime.block_on(group.join_all()).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 32);
}

#[test]
fn a_failing_task_cancels_its_siblings() {
    let runtime = Runtime::new(Config::new().worker_count(2));
    let stalled: BoundedChannel<u32> = BoundedChannel::bounded(1);

    let group = runtime.group();
    let blocked: Vec<_> = (0..2)
        .map(|_| {
            let ch = stalled.clone();
            group.spawn(async move {
                ch.recv().await?;
                Ok(())
            })
        })
        .collect();
    let failing = group.spawn::<(), _>(async {
        delay(Duration::from_millis(5)).await;
        Err(Error::task("boom"))
    });

    let outcome = runtime.block_on(group.clone().join_all());
    assert_eq!(outcome, Err(Error::task("boom")));
    assert_eq!(failing.state(), TaskState::Failed);
    for handle in &blocked {
        assert_eq!(handle.state(), TaskState::Cancelled);
    }
    assert!(group.is_cancelled());
}

#[test]
fn the_first_spawned_failure_wins() {
    // One worker makes the interleaving deterministic: the first task fails
    // and cancels the second before it ever runs.
    let runtime = Runtime::new(Config::new().worker_count(1));

    let group = runtime.group();
    let _ = group.spawn::<(), _>(async { Err(Error::task("first")) });
    let _ = group.spawn::<(), _>(async { Err(Error::task("second")) });

    assert_eq!(
        runtime.block_on(group.join_all()),
        Err(Error::task("first"))
    );
}

#[test]
fn tasks_spawned_after_cancellation_never_run() {
    let runtime = Runtime::new(Config::new().worker_count(2));
    let group = runtime.group();
    group.cancel();

    let ran = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&ran);
    let handle = group.spawn::<(), _>(async move {
        probe.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert_eq!(runtime.block_on(handle), Err(Error::TaskCancelled));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn cancellation_is_observed_at_the_next_suspension_point() {
    let runtime = Runtime::new(Config::new().worker_count(2));
    let group = runtime.group();

    let progressed = Arc::new(AtomicUsize::new(0));
    let steps = Arc::clone(&progressed);
    let handle = group.spawn::<(), _>(async move {
        loop {
            steps.fetch_add(1, Ordering::SeqCst);
            delay(Duration::from_millis(1)).await;
        }
    });

    while progressed.load(Ordering::SeqCst) == 0 {
        std::thread::yield_now();
    }
    handle.cancel();

    // A cancelled child is not a failure.
    assert_eq!(runtime.block_on(group.join_all()), Ok(()));
    assert_eq!(handle.state(), TaskState::Cancelled);
}

#[test]
fn cancelling_a_parent_reaches_nested_groups() {
    let runtime = Runtime::new(Config::new().worker_count(2));
    let parent = runtime.group();
    let child = parent.child();

    let handle = child.spawn::<(), _>(async {
        loop {
            delay(Duration::from_millis(1)).await;
        }
    });

    parent.cancel();
    runtime.block_on(child.join_all()).unwrap();
    assert_eq!(handle.state(), TaskState::Cancelled);
}

#[test]
fn per_sender_ordering_survives_interleaving() {
    let runtime = Runtime::new(Config::new().worker_count(4));
    let ch: BoundedChannel<(u8, u32)> = BoundedChannel::bounded(2);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let producers = runtime.group();
    for sender in 0..2u8 {
        let ch = ch.clone();
        let _ = producers.spawn(async move {
            for n in 0..20u32 {
                ch.send((sender, n)).await?;
            }
            Ok(())
        });
    }

    let consumers = runtime.group();
    let sink = Arc::clone(&seen);
    let drain = ch.clone();
    let _ = consumers.spawn(async move {
        while let Ok(pair) = drain.recv().await {
            sink.lock().unwrap().push(pair);
        }
        Ok(())
    });

    runtime.block_on(async {
        producers.join_all().await.unwrap();
        ch.close();
        consumers.join_all().await.unwrap();
    });

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 40);
    for sender in 0..2u8 {
        let ordered: Vec<u32> = seen
            .iter()
            .filter(|(s, _)| *s == sender)
            .map(|(_, n)| *n)
            .collect();
        assert_eq!(ordered, (0..20).collect::<Vec<_>>());
    }
}

#[test]
fn detached_failures_reach_the_registered_handler() {
    let captured = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    let runtime = Runtime::new(Config::new().worker_count(1).on_detached_failure(
        move |err| {
            *slot.lock().unwrap() = Some(err.clone());
        },
    ));

    let handle = runtime.spawn_detached::<(), _>(async { Err(Error::task("orphaned")) });
    assert_eq!(runtime.block_on(handle), Err(Error::task("orphaned")));
    assert_eq!(*captured.lock().unwrap(), Some(Error::task("orphaned")));
}

#[test]
fn a_task_exceeding_the_deadline_is_cancelled() {
    let runtime = Runtime::new(
        Config::new()
            .worker_count(2)
            .task_timeout(Duration::from_millis(20)),
    );

    let group = runtime.group();
    let handle = group.spawn(async {
        delay(Duration::from_secs(10)).await;
        Ok(())
    });

    assert_eq!(runtime.block_on(handle), Err(Error::TaskCancelled));
    // A timed-out task is cancelled, not failed, so the group still joins
    // cleanly.
    assert_eq!(runtime.block_on(group.join_all()), Ok(()));
}

#[test]
fn fan_out_delivers_buffered_values_after_a_producer_failure() {
    let runtime = Runtime::new(Config::new().worker_count(2));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let outcome = runtime.block_on(
        runtime
            .pipeline()
            .channel_capacity(Capacity::Bounded(8))
            .run_fan_out(
                |ch| async move {
                    for n in 0..3u32 {
                        ch.send(n).await?;
                    }
                    Err(Error::task("producer died"))
                },
                std::iter::once(move |ch: BoundedChannel<u32>| async move {
                    while let Ok(n) = ch.recv().await {
                        sink.lock().unwrap().push(n);
                    }
                    Ok(())
                }),
            ),
    );

    assert_eq!(outcome, Err(Error::task("producer died")));
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn stage_chains_run_in_declared_order() {
    let runtime = Runtime::new(Config::new().worker_count(2));
    let out = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&out);
    let outcome = runtime.block_on(runtime.pipeline().run_sequence_pipeline(
        from_iter(0u32..),
        vec![stage::take(4), stage::map(|n| n + 10)],
        move |n| sink.lock().unwrap().push(n),
    ));

    assert_eq!(outcome, Ok(()));
    assert_eq!(*out.lock().unwrap(), vec![10, 11, 12, 13]);
}

#[test]
fn a_caught_sequence_failure_completes_the_pipeline() {
    let runtime = Runtime::new(Config::new().worker_count(2));
    let caught = Arc::new(Mutex::new(None));
    let out = Arc::new(Mutex::new(Vec::new()));

    let group = runtime.group();
    let sink = Arc::clone(&out);
    let slot = Arc::clone(&caught);
    let handle = group.spawn(async move {
        generate(|emitter| async move {
            emitter.emit(1u32).await;
            emitter.emit(2).await;
            Err(Error::sequence("source exhausted early"))
        })
        .catch(move |err| *slot.lock().unwrap() = Some(err))
        .collect(move |n| sink.lock().unwrap().push(n))
        .await
    });

    assert_eq!(runtime.block_on(handle), Ok(()));
    assert_eq!(*out.lock().unwrap(), vec![1, 2]);
    assert_eq!(
        *caught.lock().unwrap(),
        Some(Error::sequence("source exhausted early"))
    );
}
