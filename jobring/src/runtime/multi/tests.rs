use super::*;
use crate as jobring;
use crate::runtime::runtime::Kind;
use crate::runtime::{self, Builder, ExeOpt, Runtime, RuntimeConfig, wait_all};
use crate::sync::Mutex;
use crate::task::{JoinHandle, yield_now};
use crate::test_utils::{DropCounter, init_tracing};
use crate::time::sleep_for;
use crate::utils::thread::current_thread_name;
use anyhow::Result;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

assert_impl_all!(Handle: Send, Sync, Clone);
assert_impl_all!(Worker: Send, Sync);

fn multi_runtime(workers: usize) -> Result<Runtime> {
    init_tracing();
    Builder::new_multi().worker_threads(workers).try_build()
}

/// A pool whose workers never run, so queue lengths can be inspected.
fn idle_pool(workers: usize) -> Result<Handle> {
    init_tracing();
    Handle::new_idle(&RuntimeConfig {
        kind: Kind::Multi,
        worker_threads: workers,
        ..RuntimeConfig::default()
    })
}

fn multi_handle(rt: &Runtime) -> Handle {
    match rt.handle() {
        runtime::Handle::Multi(h) => h.clone(),
        runtime::Handle::Inline(_) => unreachable!("built a multi runtime"),
    }
}

/// Shuts `pool` down and checks every handle observed the cancellation.
fn shutdown_and_check_cancelled(pool: &Handle, joins: Vec<JoinHandle<()>>) {
    pool.shutdown();

    assert_eq!(pool.queue_lens().iter().sum::<usize>(), 0);
    for join in joins {
        assert!(join.get_result().unwrap_err().is_cancelled());
    }
}

#[rstest]
#[case(1, 10)]
#[case(2, 7)]
#[case(4, 4)]
#[case(4, 1001)]
#[case(8, 3)]
fn test_balance_bounded_imbalance(#[case] workers: usize, #[case] jobs: usize) -> Result<()> {
    let pool = idle_pool(workers)?;
    let rt = runtime::Handle::Multi(pool.clone());

    let joins = (0..jobs)
        .map(|_| rt.spawn_with(async {}, ExeOpt::balance()))
        .collect::<Vec<_>>();

    let (floor, ceil) = (jobs / workers, jobs.div_ceil(workers));
    let lens = pool.queue_lens();
    assert_eq!(lens.iter().sum::<usize>(), jobs);
    for len in lens {
        assert!(len == floor || len == ceil, "{len} not in [{floor}, {ceil}]");
    }

    shutdown_and_check_cancelled(&pool, joins);
    Ok(())
}

#[rstest]
#[case(2, 8)]
#[case(4, 400)]
#[case(3, 2)]
fn test_batch_split_across_workers(#[case] workers: usize, #[case] jobs: usize) -> Result<()> {
    let pool = idle_pool(workers)?;
    let rt = runtime::Handle::Multi(pool.clone());

    let joins = rt.spawn_all((0..jobs).map(|_| async {}), ExeOpt::balance());

    let lens = pool.queue_lens();
    assert_eq!(lens.iter().sum::<usize>(), jobs);
    if jobs % workers == 0 {
        assert!(lens.iter().all(|&len| len == jobs / workers), "{lens:?}");
    } else {
        // Fewer jobs than workers, one job per chunk.
        assert_eq!(lens.iter().filter(|&&len| len == 1).count(), jobs);
    }

    shutdown_and_check_cancelled(&pool, joins);
    Ok(())
}

#[test]
fn test_forced_placement_targets_one_worker() -> Result<()> {
    let pool = idle_pool(4)?;
    let rt = runtime::Handle::Multi(pool.clone());

    let mut joins = (0..10)
        .map(|_| rt.spawn_with(async {}, ExeOpt::force(2)))
        .collect::<Vec<_>>();
    joins.extend(rt.spawn_all((0..6).map(|_| async {}), ExeOpt::force(1)));

    assert_eq!(pool.queue_lens(), [0, 6, 10, 0]);

    shutdown_and_check_cancelled(&pool, joins);
    Ok(())
}

#[test]
fn test_preferred_placement_uses_free_worker() -> Result<()> {
    let pool = idle_pool(3)?;
    let rt = runtime::Handle::Multi(pool.clone());

    let joins = (0..5)
        .map(|_| rt.spawn_with(async {}, ExeOpt::prefer(1)))
        .collect::<Vec<_>>();
    assert_eq!(pool.queue_lens(), [0, 5, 0]);

    shutdown_and_check_cancelled(&pool, joins);
    Ok(())
}

#[test]
fn test_block_on_returns_and_joins_workers() -> Result<()> {
    let rt = multi_runtime(4)?;
    let pool = multi_handle(&rt);

    assert_eq!(rt.block_on(async { 233 }), 233);

    rt.shutdown();
    assert_eq!(pool.strong_count(), 1);
    assert_eq!(pool.queue_lens(), [0, 0, 0, 0]);
    Ok(())
}

#[test]
fn test_main_runs_on_worker_zero() -> Result<()> {
    let rt = multi_runtime(2)?;
    let index = rt.block_on(async { crate::context::current_worker_index() });
    assert_eq!(index, Some(0));
    Ok(())
}

#[test]
fn test_forced_task_stays_on_its_worker() -> Result<()> {
    let rt = multi_runtime(3)?;

    let seen = rt.block_on(async {
        let h = jobring::spawn_with(
            async {
                let mut seen = Vec::new();
                for _ in 0..20 {
                    seen.push(crate::context::current_worker_index());
                    yield_now().await;
                    sleep_for(Duration::from_millis(1)).await;
                }
                seen
            },
            ExeOpt::force(1),
        );
        h.await.unwrap()
    });

    assert!(seen.iter().all(|&index| index == Some(1)), "{seen:?}");
    Ok(())
}

#[test]
fn test_worker_threads_are_named() -> Result<()> {
    init_tracing();
    let rt = Builder::new_multi()
        .worker_threads(2)
        .thread_name("pool-worker")
        .try_build()?;

    let names = rt.block_on(async {
        let handles = (0..2)
            .map(|i| jobring::spawn_with(async { current_thread_name() }, ExeOpt::force(i)))
            .collect::<Vec<_>>();
        wait_all(handles).await
    });

    for name in names {
        assert_eq!(name?.as_deref(), Some("pool-worker"));
    }
    Ok(())
}

#[rstest]
#[case::join_first(Duration::from_millis(20), Duration::ZERO)]
#[case::finish_first(Duration::ZERO, Duration::from_millis(20))]
#[case::close_race(Duration::from_millis(1), Duration::from_millis(1))]
fn test_join_observes_completion(
    #[case] task_delay: Duration,
    #[case] join_delay: Duration,
) -> Result<()> {
    let rt = multi_runtime(2)?;

    for _ in 0..20 {
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        let h = rt.spawn(async move {
            if !task_delay.is_zero() {
                sleep_for(task_delay).await;
            }
            flag.store(true, Ordering::SeqCst);
            7
        });

        // Join from a thread that is not part of the runtime.
        let joiner = std::thread::spawn(move || {
            std::thread::sleep(join_delay);
            futures::executor::block_on(h)
        });

        assert_eq!(joiner.join().unwrap()?, 7);
        assert!(finished.load(Ordering::SeqCst));
    }
    Ok(())
}

#[test]
fn test_join_from_another_task() -> Result<()> {
    let rt = multi_runtime(4)?;

    let total = rt.block_on(async {
        let producers = (0..64u64)
            .map(|i| jobring::spawn(async move { i }))
            .collect::<Vec<_>>();

        // Join on whatever worker the consumer lands on.
        jobring::spawn(async move {
            let mut sum = 0;
            for res in wait_all(producers).await {
                sum += res.unwrap();
            }
            sum
        })
        .await
        .unwrap()
    });

    assert_eq!(total, (0..64).sum::<u64>());
    Ok(())
}

#[test]
fn test_detached_tasks_release_once() -> Result<()> {
    const TASKS: usize = 5_000;

    let rt = multi_runtime(4)?;
    let counter = DropCounter::new();

    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..TASKS {
        let guard = counter.guard();
        let completed = completed.clone();
        rt.spawn_detach(async move {
            let _guard = guard;
            yield_now().await;
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    while counter.dropped() < TASKS && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(counter.dropped(), TASKS);
    assert_eq!(completed.load(Ordering::SeqCst), TASKS);

    rt.shutdown();
    assert_eq!(counter.dropped(), TASKS);
    Ok(())
}

#[test]
fn test_detached_cells_freed() -> Result<()> {
    const WORKERS: usize = 4;
    const TASKS: usize = 2_000;

    let rt = multi_runtime(WORKERS)?;
    let pool = multi_handle(&rt);

    // Each worker clones the handle into its context on start.
    let warm_up = (0..WORKERS)
        .map(|i| rt.spawn_with(async {}, ExeOpt::force(i)))
        .collect::<Vec<_>>();
    rt.block_on(async move {
        for join in warm_up {
            join.await.unwrap();
        }
    });
    let baseline = pool.strong_count();

    // Every live task cell owns a clone of the pool handle.
    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..TASKS {
        let completed = completed.clone();
        rt.spawn_detach(async move {
            yield_now().await;
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    while (completed.load(Ordering::SeqCst) < TASKS || pool.strong_count() > baseline)
        && Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(completed.load(Ordering::SeqCst), TASKS);
    assert!(pool.strong_count() <= baseline, "{} > {baseline}", pool.strong_count());

    rt.shutdown();
    assert_eq!(pool.strong_count(), 1);
    Ok(())
}

#[test]
fn test_shutdown_releases_parked_tasks() -> Result<()> {
    let rt = multi_runtime(2)?;
    let counter = DropCounter::new();

    let guard = counter.guard();
    let parked = rt.block_on(async move {
        let h = jobring::spawn(async move {
            let _guard = guard;
            sleep_for(Duration::from_secs(3600)).await;
        });
        sleep_for(Duration::from_millis(10)).await;
        h
    });
    assert_eq!(counter.dropped(), 0);

    rt.shutdown();
    assert!(parked.get_result().unwrap_err().is_cancelled());
    assert_eq!(counter.dropped(), 1);
    Ok(())
}

#[test]
fn test_mutex_counter_no_lost_updates() -> Result<()> {
    const TASKS: usize = 100_000;

    let rt = multi_runtime(4)?;
    let counter = Arc::new(Mutex::new(0usize));

    let c = counter.clone();
    let failed = rt.block_on(async move {
        let handles = (0..TASKS)
            .map(|_| {
                let c = c.clone();
                jobring::spawn(async move {
                    *c.lock().await += 1;
                })
            })
            .collect::<Vec<_>>();

        wait_all(handles)
            .await
            .into_iter()
            .filter(Result::is_err)
            .count()
    });

    assert_eq!(failed, 0);
    assert_eq!(*counter.try_lock().expect("no task holds the lock"), TASKS);
    Ok(())
}

#[test]
fn test_staggered_timers_fire_in_order() -> Result<()> {
    const STEP: Duration = Duration::from_millis(10);
    const TOLERANCE: Duration = Duration::from_millis(50);

    let rt = multi_runtime(4)?;

    let fired = rt.block_on(async {
        let start = Instant::now();
        let handles = (0..=20u32)
            .map(|i| {
                let deadline = start + STEP * i;
                jobring::spawn(async move {
                    crate::time::sleep_until(deadline).await;
                    (i, deadline, Instant::now())
                })
            })
            .collect::<Vec<_>>();

        wait_all(handles)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
    })?;

    assert_eq!(fired.len(), 21);
    for &(i, deadline, at) in &fired {
        assert!(at >= deadline, "timer {i} fired early");
    }
    for window in fired.windows(2) {
        let ((i, _, a), (j, _, b)) = (window[0], window[1]);
        assert!(a <= b + TOLERANCE, "timer {i} fired after timer {j}");
    }
    Ok(())
}

#[test]
#[should_panic(expected = "boom")]
fn test_main_panic_resumes_on_caller() {
    let rt = Builder::new_multi().worker_threads(2).try_build().unwrap();
    let answer: u32 = rt.block_on(async { panic!("boom") });
    unreachable!("block_on returned {answer}");
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "blocked on from its own worker")]
fn test_block_on_from_worker_rejected() {
    let rt = Builder::new_multi().worker_threads(2).try_build().unwrap();
    let pool = multi_handle(&rt);
    rt.block_on(async move { pool.block_on(async {}) });
}

#[test]
fn test_shutdown_from_foreign_thread() -> Result<()> {
    let rt = multi_runtime(2)?;
    let pool = multi_handle(&rt);

    rt.block_on(async {});
    std::thread::spawn(move || pool.shutdown()).join().unwrap();

    // Idempotent with the shutdown run by the drop.
    drop(rt);
    Ok(())
}
