use bitflags::bitflags;

/// Counts jobs executed by one executor thread.
#[derive(Debug, Default)]
pub(crate) struct Ticker {
    tick: u32,
}

impl Ticker {
    pub(crate) fn new() -> Self {
        Self { tick: 0 }
    }

    pub(crate) fn tick<T: TickerData>(&mut self, data: &mut T) -> TickerEvents {
        self.tick = self.tick.wrapping_add(1);
        data.update_and_check(self.tick)
    }
}

/// Turns ticks into events. Each executor flavor decides its own cadence.
pub(crate) trait TickerData {
    fn update_and_check(&mut self, tick: u32) -> TickerEvents;
}

/// Polls the reactor, and looks for a stop request, every `interval` jobs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EventInterval {
    interval: u32,
}

impl EventInterval {
    pub(crate) fn new(interval: u32) -> Self {
        debug_assert!(interval > 0);
        Self {
            interval: interval.max(1),
        }
    }
}

impl TickerData for EventInterval {
    fn update_and_check(&mut self, tick: u32) -> TickerEvents {
        if tick % self.interval == 0 {
            TickerEvents::POLL_REACTOR | TickerEvents::CHECK_STOP
        } else {
            TickerEvents::empty()
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct TickerEvents: u8 {
        /// Process ready completions and due timers without blocking.
        const POLL_REACTOR = 1;

        /// A stop request may be pending.
        const CHECK_STOP = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_every_interval() {
        let mut ticker = Ticker::new();
        let mut data = EventInterval::new(4);

        let fired = (1..=12)
            .filter(|_| ticker.tick(&mut data).contains(TickerEvents::POLL_REACTOR))
            .count();
        assert_eq!(fired, 3);
    }

    #[test]
    fn test_interval_of_one_fires_always() {
        let mut ticker = Ticker::new();
        let mut data = EventInterval::new(1);
        assert!((0..5).all(|_| !ticker.tick(&mut data).is_empty()));
    }
}
