use super::*;
use crate as jobring;
use crate::io::{self, IoError, Op};
use crate::reactor::BackendKind;
use crate::runtime::{Builder, ExeOpt, Runtime, wait_all};
use crate::task::yield_now;
use crate::test_utils::init_tracing;
use crate::time::sleep_for;
use anyhow::Result;
use static_assertions::assert_impl_all;
use std::io::Write as _;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

assert_impl_all!(Handle: Send, Sync, Clone);

fn inline_runtime() -> Result<Runtime> {
    init_tracing();
    Builder::new_inline().try_build()
}

#[test]
fn test_block_on_returns_output() -> Result<()> {
    let rt = inline_runtime()?;
    assert_eq!(rt.block_on(async { 233 }), 233);
    Ok(())
}

#[test]
fn test_block_on_twice() -> Result<()> {
    let rt = inline_runtime()?;
    assert_eq!(rt.block_on(async { 1 }), 1);
    assert_eq!(rt.block_on(async { "two" }), "two");
    Ok(())
}

#[jobring::test]
async fn test_spawn_and_join() {
    let h = jobring::spawn(async { 6 * 7 });
    assert_eq!(h.await.unwrap(), 42);
}

#[jobring::test]
async fn test_yield_interleaves_tasks() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let spawn_logger = |name: &'static str| {
        let log = log.clone();
        jobring::spawn(async move {
            for i in 0..3 {
                log.lock().push(format!("{name}{i}"));
                yield_now().await;
            }
        })
    };

    let a = spawn_logger("a");
    let b = spawn_logger("b");
    for res in wait_all([a, b]).await {
        res.unwrap();
    }

    assert_eq!(*log.lock(), ["a0", "b0", "a1", "b1", "a2", "b2"]);
}

#[jobring::test]
async fn test_high_priority_runs_first() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let (l1, l2) = (log.clone(), log.clone());
    let low = jobring::spawn(async move { l1.lock().push("low") });
    let high = jobring::spawn_with(async move { l2.lock().push("high") }, ExeOpt::balance().high());

    for res in wait_all([low, high]).await {
        res.unwrap();
    }
    assert_eq!(*log.lock(), ["high", "low"]);
}

#[jobring::test]
async fn test_spawn_all_keeps_order_of_results() {
    let handles = jobring::spawn_all((0..16).map(|i| async move { i * 2 }), ExeOpt::default());
    let results = wait_all(handles)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert_eq!(results, (0..16).map(|i| i * 2).collect::<Vec<_>>());
}

#[jobring::test]
async fn test_foreign_wake_from_blocking_pool() {
    let h = jobring::spawn_blocking(|| {
        std::thread::sleep(Duration::from_millis(20));
        5
    });
    assert_eq!(h.await.unwrap(), 5);
}

#[jobring::test]
async fn test_sleep_is_never_early() {
    let start = Instant::now();
    sleep_for(Duration::from_millis(30)).await;
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[jobring::test]
async fn test_no_worker_index_inline() {
    assert_eq!(crate::context::current_worker_index(), None);
}

#[test]
fn test_parked_task_resumes_on_next_block_on() -> Result<()> {
    let rt = inline_runtime()?;
    let done = Arc::new(AtomicBool::new(false));

    let flag = done.clone();
    rt.block_on(async move {
        jobring::spawn_detach(async move {
            sleep_for(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
    });
    assert!(!done.load(Ordering::SeqCst));

    rt.block_on(async { sleep_for(Duration::from_millis(60)).await });
    assert!(done.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_shutdown_cancels_unrun_spawn() -> Result<()> {
    let rt = inline_runtime()?;
    let h = rt.spawn(async { 1 });
    rt.shutdown();

    assert!(h.get_result().unwrap_err().is_cancelled());
    Ok(())
}

#[test]
fn test_shutdown_drops_parked_task() -> Result<()> {
    let rt = inline_runtime()?;
    let h = rt.block_on(async {
        let h = jobring::spawn(async { sleep_for(Duration::from_secs(3600)).await });
        yield_now().await;
        h
    });
    rt.shutdown();

    assert!(h.get_result().unwrap_err().is_cancelled());
    Ok(())
}

#[test]
fn test_queue_empty_after_block_on() -> Result<()> {
    let rt = inline_runtime()?;
    rt.block_on(async {
        let handles = (0..10).map(|_| jobring::spawn(yield_now())).collect::<Vec<_>>();
        wait_all(handles).await;
    });

    let crate::runtime::Handle::Inline(handle) = rt.handle() else {
        unreachable!("built an inline runtime");
    };
    assert_eq!(handle.queue_len(), 0);
    Ok(())
}

#[test]
#[should_panic(expected = "boom")]
fn test_main_panic_resumes_on_caller() {
    let rt = Builder::new_inline().try_build().unwrap();
    let answer: u32 = rt.block_on(async { panic!("boom") });
    unreachable!("block_on returned {answer}");
}

#[test]
#[should_panic(expected = "must be called from within a jobring runtime")]
fn test_spawn_outside_runtime_panics() {
    jobring::spawn_detach(async {});
}

#[test]
fn test_write_then_read_tempfile() -> Result<()> {
    let Ok(rt) = Builder::new_inline().backend(BackendKind::Uring).try_build() else {
        // io_uring unavailable on this kernel or sandbox.
        return Ok(());
    };

    let mut file = tempfile::tempfile()?;
    file.write_all(b"hello ")?;
    let fd = file.as_raw_fd();

    let (written, read) = rt.block_on(async move {
        let written = Op::new(io::Write::new(fd, &b"jobring"[..], 6)).await?;
        let read = Op::new(io::Read::new(fd, 64, 0)).await?;
        Ok::<_, IoError>((written, read))
    })?;

    assert_eq!(written, 7);
    assert_eq!(read, b"hello jobring");
    Ok(())
}
