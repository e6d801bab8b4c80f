use crate::queue::{JobQueue, Link, next_of, set_next_of};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// A lock-free multi-producer stack with an atomic drain-all.
///
/// Any thread may [`push`](AtomicJobQueue::push) concurrently. The only way to
/// consume is [`pop_all`](AtomicJobQueue::pop_all), which detaches the whole
/// list at once and hands it back in push order. There are no partial pops, so
/// there is no ABA hazard on the head pointer.
pub struct AtomicJobQueue<L: Link> {
    head: AtomicPtr<L::Node>,
    _p: PhantomData<L>,
}

unsafe impl<L: Link + Send> Send for AtomicJobQueue<L> {}
unsafe impl<L: Link + Send> Sync for AtomicJobQueue<L> {}

impl<L: Link> AtomicJobQueue<L> {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            _p: PhantomData,
        }
    }

    pub fn push(&self, item: L) {
        let node = item.into_node();
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            // Safety: the node is not published yet, we are its only owner.
            unsafe { set_next_of::<L>(node, NonNull::new(head)) };

            match self.head.compare_exchange_weak(
                head,
                node.as_ptr(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Detaches every pushed element and returns them oldest first.
    pub fn pop_all(&self) -> JobQueue<L> {
        let mut cursor = NonNull::new(self.head.swap(ptr::null_mut(), Ordering::AcqRel));
        let mut queue = JobQueue::new();

        while let Some(node) = cursor {
            // Safety: the swap above gave us exclusive ownership of the list.
            unsafe {
                cursor = next_of::<L>(node);
                queue.push_front(L::from_node(node));
            }
        }

        queue
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<L: Link> Default for AtomicJobQueue<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Link> Drop for AtomicJobQueue<L> {
    fn drop(&mut self) {
        self.pop_all().clear();
    }
}

impl<L: Link> fmt::Debug for AtomicJobQueue<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicJobQueue")
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::test_node::Entry;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_pop_all_returns_push_order() {
        let q = AtomicJobQueue::new();
        assert!(q.is_empty());

        for i in 0..5 {
            q.push(Entry::boxed(i));
        }
        assert!(!q.is_empty());

        let mut drained = q.pop_all();
        assert!(q.is_empty());
        assert_eq!(drained.len(), 5);

        let vals: Vec<_> = drained.drain().map(|e| e.val).collect();
        assert_eq!(vals, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pop_all_empty() {
        let q: AtomicJobQueue<Box<Entry>> = AtomicJobQueue::new();
        assert!(q.pop_all().is_empty());
    }

    #[test]
    fn test_drop_releases_elements() {
        let q = AtomicJobQueue::new();
        q.push(Entry::boxed(1));
        q.push(Entry::boxed(2));
        drop(q);
    }

    #[test]
    fn test_concurrent_push() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1_000;

        let q = Arc::new(AtomicJobQueue::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles = (0..THREADS)
            .map(|t| {
                let q = q.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..PER_THREAD {
                        q.push(Entry::boxed(t * PER_THREAD + i));
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        let mut collect = |mut batch: JobQueue<Box<Entry>>| {
            for e in batch.drain() {
                assert!(seen.insert(e.val), "duplicate element {}", e.val);
            }
        };

        // Drain while producers are still pushing.
        for _ in 0..100 {
            collect(q.pop_all());
        }

        for h in handles {
            h.join().unwrap();
        }
        collect(q.pop_all());

        assert_eq!(seen.len(), THREADS * PER_THREAD);
    }
}
