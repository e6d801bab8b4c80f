use crate::reactor::{IoError, Reactor};
use crate::runtime::inline::Handle;
use crate::runtime::{EventInterval, Ticker, TickerEvents};
use crate::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    /// Blocked on the reactor.
    Waiting,

    /// Draining the queue.
    Executing,

    Stop,
}

impl Handle {
    /// Runs jobs until `main` is final and the queue is empty.
    pub(super) fn event_loop<T>(
        &self,
        reactor: &mut Reactor,
        main: &JoinHandle<T>,
    ) -> Result<(), IoError> {
        let mut ticker = Ticker::new();
        let mut interval = EventInterval::new(self.cfg.event_interval);
        let mut state = LoopState::Executing;

        loop {
            state = match state {
                LoopState::Waiting => {
                    reactor.wait()?;
                    LoopState::Executing
                }
                LoopState::Executing => {
                    while let Some(job) = self.next_job() {
                        tracing::trace!(id = %job.id(), "run");
                        job.run();

                        if ticker
                            .tick(&mut interval)
                            .contains(TickerEvents::POLL_REACTOR)
                        {
                            reactor.poll()?;
                        }
                    }

                    if main.is_finished() {
                        LoopState::Stop
                    } else {
                        LoopState::Waiting
                    }
                }
                LoopState::Stop => return Ok(()),
            };
        }
    }

    fn next_job(&self) -> Option<super::scheduler::InlineJob> {
        self.queue.lock().pop_front()
    }
}
