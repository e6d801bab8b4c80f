use crate::context;
use crate::reactor::Reactor;
use crate::runtime;
use crate::runtime::multi::Handle;
use anyhow::{Context, Result};
use std::thread;

/// Threads driving the workers. Each returns its reactor on exit so pending
/// wakers are released only after the queues are drained.
#[derive(Debug)]
pub(super) struct ThreadPool {
    handles: Vec<thread::JoinHandle<Reactor>>,
}

impl ThreadPool {
    /// Starts one thread per reactor. If any thread fails to start, the ones
    /// already running are stopped and joined before the error is returned.
    pub(super) fn spawn(scheduler: &Handle, reactors: Vec<Reactor>) -> Result<Self> {
        let mut pool = ThreadPool {
            handles: Vec::with_capacity(reactors.len()),
        };

        for (index, reactor) in reactors.into_iter().enumerate() {
            match spawn_worker_thread(scheduler.clone(), index, reactor) {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    for worker in scheduler.workers.iter() {
                        worker.stop();
                    }
                    drop(pool.join());

                    return Err(e).with_context(|| format!("failed to spawn worker {index}"));
                }
            }
        }

        Ok(pool)
    }

    /// Joins every thread, collecting the reactors of those that exited
    /// cleanly.
    pub(super) fn join(self) -> Vec<Reactor> {
        self.handles
            .into_iter()
            .filter_map(|handle| match handle.join() {
                Ok(reactor) => Some(reactor),
                Err(_) => {
                    tracing::error!("worker thread panicked");
                    None
                }
            })
            .collect()
    }
}

fn spawn_worker_thread(
    scheduler: Handle,
    index: usize,
    mut reactor: Reactor,
) -> std::io::Result<thread::JoinHandle<Reactor>> {
    let mut builder = thread::Builder::new();

    if let Some(stack_size) = scheduler.cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder
        .name(scheduler.cfg.thread_name.next_name())
        .spawn(move || {
            let worker = &scheduler.workers[index];
            let span = tracing::info_span!("worker", index = worker.index());
            let _span = span.enter();

            let _enter = context::enter(
                runtime::Handle::Multi(scheduler.clone()),
                worker.reactor.clone(),
                Some((scheduler.addr(), index)),
            );

            tracing::debug!("worker started");
            worker.run(&mut reactor, scheduler.cfg.event_interval);
            tracing::debug!("worker stopped");

            reactor
        })
}
