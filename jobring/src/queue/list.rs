use crate::queue::{Link, next_of, set_next_of};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// A single-owner intrusive FIFO/LIFO queue.
///
/// Not thread-safe: whoever holds the queue (a worker behind its lock, the
/// timer batch being fired, a drained waiter list) has exclusive access to
/// every node linked into it.
///
/// Dropping a queue that still holds jobs is a contract violation and trips a
/// debug assertion. Use [`JobQueue::clear`] when discarding on purpose.
pub struct JobQueue<L: Link> {
    head: Option<NonNull<L::Node>>,
    tail: Option<NonNull<L::Node>>,
    len: usize,
    _p: PhantomData<L>,
}

// Safety: the queue owns its elements.
unsafe impl<L: Link + Send> Send for JobQueue<L> {}
unsafe impl<L: Link + Sync> Sync for JobQueue<L> {}

impl<L: Link> JobQueue<L> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            _p: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn push_back(&mut self, item: L) {
        let node = item.into_node();

        unsafe {
            set_next_of::<L>(node, None);
            match self.tail {
                Some(tail) => set_next_of::<L>(tail, Some(node)),
                None => self.head = Some(node),
            }
        }

        self.tail = Some(node);
        self.len += 1;
    }

    pub fn push_front(&mut self, item: L) {
        let node = item.into_node();

        unsafe { set_next_of::<L>(node, self.head) };
        if self.tail.is_none() {
            self.tail = Some(node);
        }

        self.head = Some(node);
        self.len += 1;
    }

    /// Pops the oldest element, or `None` when empty. Never blocks.
    pub fn pop_front(&mut self) -> Option<L> {
        let node = self.head?;

        unsafe {
            self.head = next_of::<L>(node);
            set_next_of::<L>(node, None);
        }

        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;

        Some(unsafe { L::from_node(node) })
    }

    /// Splits off the first `n` elements (or all of them if fewer remain) into
    /// a new queue.
    pub fn pop_front_n(&mut self, n: usize) -> JobQueue<L> {
        if n == 0 || self.is_empty() {
            return JobQueue::new();
        }

        if n >= self.len {
            return std::mem::take(self);
        }

        let first = self.head;
        let mut last = first.expect("non-empty queue has a head");
        for _ in 1..n {
            last = unsafe { next_of::<L>(last) }.expect("queue shorter than its length");
        }

        unsafe {
            self.head = next_of::<L>(last);
            set_next_of::<L>(last, None);
        }
        self.len -= n;

        JobQueue {
            head: first,
            tail: Some(last),
            len: n,
            _p: PhantomData,
        }
    }

    /// Moves every element of `other` to the back of `self`.
    pub fn append(&mut self, mut other: JobQueue<L>) {
        let Some(other_head) = other.head.take() else {
            return;
        };

        match self.tail {
            Some(tail) => unsafe { set_next_of::<L>(tail, Some(other_head)) },
            None => self.head = Some(other_head),
        }

        self.tail = other.tail.take();
        self.len += std::mem::take(&mut other.len);
    }

    /// Moves every element of `other` to the front of `self`, keeping
    /// `other`'s order.
    pub fn prepend(&mut self, mut other: JobQueue<L>) {
        let Some(other_tail) = other.tail.take() else {
            return;
        };

        unsafe { set_next_of::<L>(other_tail, self.head) };
        if self.tail.is_none() {
            self.tail = Some(other_tail);
        }

        self.head = other.head.take();
        self.len += std::mem::take(&mut other.len);
    }

    /// Pops every element, front to back.
    pub fn drain(&mut self) -> Drain<'_, L> {
        Drain { queue: self }
    }

    /// Drops every element.
    pub fn clear(&mut self) {
        while let Some(item) = self.pop_front() {
            drop(item);
        }
    }
}

impl<L: Link> Default for JobQueue<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Link> Extend<L> for JobQueue<L> {
    fn extend<I: IntoIterator<Item = L>>(&mut self, iter: I) {
        for item in iter {
            self.push_back(item);
        }
    }
}

impl<L: Link> FromIterator<L> for JobQueue<L> {
    fn from_iter<I: IntoIterator<Item = L>>(iter: I) -> Self {
        let mut queue = JobQueue::new();
        queue.extend(iter);
        queue
    }
}

impl<L: Link> Drop for JobQueue<L> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.is_empty(),
                "dropped a JobQueue still holding {} job(s)",
                self.len
            );
        }
        self.clear();
    }
}

impl<L: Link> fmt::Debug for JobQueue<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue").field("len", &self.len).finish()
    }
}

pub struct Drain<'a, L: Link> {
    queue: &'a mut JobQueue<L>,
}

impl<L: Link> Iterator for Drain<'_, L> {
    type Item = L;

    fn next(&mut self) -> Option<L> {
        self.queue.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.queue.len, Some(self.queue.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::test_node::Entry;
    use rstest::rstest;

    fn queue_of(vals: impl IntoIterator<Item = usize>) -> JobQueue<Box<Entry>> {
        vals.into_iter().map(Entry::boxed).collect()
    }

    fn values(queue: &mut JobQueue<Box<Entry>>) -> Vec<usize> {
        queue.drain().map(|e| e.val).collect()
    }

    #[test]
    fn test_fifo_and_lifo() {
        let mut q = JobQueue::new();
        q.push_back(Entry::boxed(1));
        q.push_back(Entry::boxed(2));
        q.push_front(Entry::boxed(0));
        assert_eq!(q.len(), 3);

        assert_eq!(values(&mut q), vec![0, 1, 2]);
        assert!(q.is_empty());
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn test_push_after_emptied() {
        let mut q = queue_of([1]);
        assert_eq!(q.pop_front().map(|e| e.val), Some(1));

        q.push_back(Entry::boxed(2));
        q.push_front(Entry::boxed(3));
        assert_eq!(values(&mut q), vec![3, 2]);
    }

    #[rstest]
    #[case::zero(5, 0, vec![], vec![0, 1, 2, 3, 4])]
    #[case::some(5, 2, vec![0, 1], vec![2, 3, 4])]
    #[case::all(5, 5, vec![0, 1, 2, 3, 4], vec![])]
    #[case::more_than_len(3, 10, vec![0, 1, 2], vec![])]
    #[case::empty(0, 3, vec![], vec![])]
    fn test_pop_front_n(
        #[case] len: usize,
        #[case] n: usize,
        #[case] taken: Vec<usize>,
        #[case] rest: Vec<usize>,
    ) {
        let mut q = queue_of(0..len);
        let mut head = q.pop_front_n(n);

        assert_eq!(head.len(), taken.len());
        assert_eq!(q.len(), rest.len());
        assert_eq!(values(&mut head), taken);

        // The remainder must still be a well formed queue.
        q.push_back(Entry::boxed(99));
        let mut expected = rest;
        expected.push(99);
        assert_eq!(values(&mut q), expected);
    }

    #[rstest]
    #[case::both_full(vec![1, 2], vec![3, 4])]
    #[case::self_empty(vec![], vec![3, 4])]
    #[case::other_empty(vec![1, 2], vec![])]
    fn test_append_prepend(#[case] a: Vec<usize>, #[case] b: Vec<usize>) {
        let mut q = queue_of(a.clone());
        q.append(queue_of(b.clone()));
        assert_eq!(q.len(), a.len() + b.len());
        q.push_back(Entry::boxed(100));
        let mut expected = [a.clone(), b.clone()].concat();
        expected.push(100);
        assert_eq!(values(&mut q), expected);

        let mut q = queue_of(a.clone());
        q.prepend(queue_of(b.clone()));
        q.push_back(Entry::boxed(100));
        let mut expected = [b, a].concat();
        expected.push(100);
        assert_eq!(values(&mut q), expected);
    }

    #[test]
    fn test_clear_drops_elements() {
        let mut q = queue_of(0..10);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "dropped a JobQueue still holding 2 job(s)")]
    fn test_drop_non_empty_asserts() {
        let _q = queue_of([1, 2]);
    }
}
