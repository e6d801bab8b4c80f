use crate::time::NaryHeap;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;

/// Identifies a timer registered with a [`TimerManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TimerId(COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

enum PendingOp<T> {
    Add(Entry<T>),
    Delete(TimerId),
}

struct Entry<T> {
    instant: Instant,
    id: TimerId,
    payload: T,
}

// Ids are monotonic, so equal instants fire in insertion order.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.instant, self.id).cmp(&(other.instant, other.id))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Entry<T> {}

struct Timers<T> {
    heap: NaryHeap<Entry<T>, 4>,

    /// Soft deletes. An id is erased the first time its timer comes due.
    deleted: HashSet<TimerId>,
}

/// Orders pending wake-ups and hands back the due ones.
///
/// Any thread may add or delete timers: both only queue an operation behind
/// the `pending` lock. The thread owning the manager applies them to the heap
/// when it calls [`process_timers`], so producers never touch the heap.
///
/// Deletion is soft. The entry stays in the heap and is discarded when it
/// comes due, which keeps the heap free of arbitrary removals.
///
/// [`process_timers`]: TimerManager::process_timers
pub struct TimerManager<T> {
    pending: Mutex<Vec<PendingOp<T>>>,
    timers: Mutex<Timers<T>>,
}

impl<T> TimerManager<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            timers: Mutex::new(Timers {
                heap: NaryHeap::with_capacity(capacity),
                deleted: HashSet::new(),
            }),
        }
    }

    /// Schedules `payload` to be returned once `instant` has passed.
    ///
    /// Takes effect on the next call to `process_timers`.
    pub fn add_timer(&self, instant: Instant, payload: T) -> TimerId {
        let id = TimerId::next();
        self.pending.lock().push(PendingOp::Add(Entry {
            instant,
            id,
            payload,
        }));
        id
    }

    /// Cancels a timer. Unknown or already fired ids are a no-op.
    pub fn delete_timer(&self, id: TimerId) {
        self.pending.lock().push(PendingOp::Delete(id));
    }

    /// Earliest instant in the heap as of the last `process_timers` call.
    ///
    /// Ops queued since then are not reflected, and a soft-deleted head can
    /// make the bound early. Both only cause an early wake-up.
    pub fn next_instant(&self) -> Option<Instant> {
        self.timers.lock().heap.peek().map(|entry| entry.instant)
    }

    /// Number of entries in the heap, soft-deleted ones included.
    pub fn len(&self) -> usize {
        self.timers.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.pending.lock().is_empty()
    }

    /// Returns every payload whose instant has passed, earliest first.
    pub fn process_timers(&self) -> Vec<T> {
        self.process_timers_at(Instant::now())
    }

    /// Same as [`process_timers`](Self::process_timers) with an explicit
    /// notion of now.
    pub fn process_timers_at(&self, now: Instant) -> Vec<T> {
        let ops = std::mem::take(&mut *self.pending.lock());

        let mut timers = self.timers.lock();
        let Timers { heap, deleted } = &mut *timers;

        for op in ops {
            match op {
                PendingOp::Add(entry) => heap.push(entry),
                PendingOp::Delete(id) => {
                    deleted.insert(id);
                }
            }
        }

        let mut due = Vec::new();
        while let Some(entry) = heap.pop_if(|entry| entry.instant <= now) {
            if !deleted.remove(&entry.id) {
                due.push(entry.payload);
            }
        }

        due
    }

    /// Drops every timer. Payloads are released after the locks.
    pub fn clear(&self) -> usize {
        let ops = std::mem::take(&mut *self.pending.lock());

        let entries: Vec<Entry<T>> = {
            let mut timers = self.timers.lock();
            timers.deleted.clear();
            timers.heap.drain().collect()
        };

        let count = entries.len()
            + ops
                .iter()
                .filter(|op| matches!(op, PendingOp::Add(_)))
                .count();

        drop(ops);
        drop(entries);
        count
    }
}

impl<T> Default for TimerManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TimerManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerManager")
            .field("pending", &self.pending.lock().len())
            .field("timers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::DropCounter;
    use std::sync::Arc;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_fires_due_and_skips_deleted() {
        let mgr = TimerManager::with_capacity(10);
        let start = Instant::now();

        let ids: Vec<TimerId> = (0..21u64)
            .map(|i| mgr.add_timer(start + ms(i * 100), i))
            .collect();

        let due = mgr.process_timers_at(start + ms(1000));
        assert_eq!(due, (0..=10).collect::<Vec<_>>());

        for id in &ids[11..20] {
            mgr.delete_timer(*id);
        }

        let due = mgr.process_timers_at(start + ms(2000));
        assert_eq!(due, vec![20]);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_delete_before_admission() {
        let mgr = TimerManager::new();
        let start = Instant::now();

        mgr.add_timer(start + ms(1000), 100);
        let second = mgr.add_timer(start + ms(2000), 200);
        mgr.add_timer(start + ms(3000), 300);
        mgr.delete_timer(second);

        assert_eq!(mgr.process_timers_at(start + ms(1000)), vec![100]);
        assert_eq!(mgr.process_timers_at(start + ms(3000)), vec![300]);
    }

    #[test]
    fn test_delete_after_fire_is_noop() {
        let mgr = TimerManager::new();
        let start = Instant::now();

        let id = mgr.add_timer(start, 'a');
        assert_eq!(mgr.process_timers_at(start), vec!['a']);

        mgr.delete_timer(id);
        mgr.add_timer(start + ms(5), 'b');
        assert_eq!(mgr.process_timers_at(start + ms(5)), vec!['b']);
    }

    #[test]
    fn test_never_fires_early() {
        let mgr = TimerManager::new();
        let start = Instant::now();

        mgr.add_timer(start + ms(10), ());
        assert!(mgr.process_timers_at(start + ms(9)).is_empty());
        assert_eq!(mgr.next_instant(), Some(start + ms(10)));
        assert_eq!(mgr.process_timers_at(start + ms(10)).len(), 1);
        assert_eq!(mgr.next_instant(), None);
    }

    #[test]
    fn test_ordering_with_shuffled_inserts() {
        let mgr = TimerManager::new();
        let start = Instant::now();

        let mut offsets: Vec<u64> = (0..500).collect();
        fastrand::Rng::with_seed(7).shuffle(&mut offsets);

        for off in &offsets {
            mgr.add_timer(start + ms(*off), *off);
        }

        let due = mgr.process_timers_at(start + ms(1_000));
        assert_eq!(due, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_equal_instants_keep_insertion_order() {
        let mgr = TimerManager::new();
        let at = Instant::now();

        for i in 0..32 {
            mgr.add_timer(at, i);
        }

        assert_eq!(mgr.process_timers_at(at), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_producers() {
        let mgr = Arc::new(TimerManager::new());
        let start = Instant::now();

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let mgr = mgr.clone();
                std::thread::spawn(move || {
                    for i in 0..250u64 {
                        mgr.add_timer(start + ms(i), t * 1_000 + i);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let due = mgr.process_timers_at(start + ms(250));
        assert_eq!(due.len(), 1_000);
    }

    #[test]
    fn test_clear_releases_payloads() {
        let counter = DropCounter::new();
        let mgr = TimerManager::new();
        let start = Instant::now();

        for i in 0..8 {
            mgr.add_timer(start + ms(i), counter.guard());
        }
        mgr.process_timers_at(start - ms(1));
        mgr.add_timer(start, counter.guard());

        assert_eq!(mgr.clear(), 9);
        assert_eq!(counter.dropped(), 9);
        assert!(mgr.is_empty());
    }
}
