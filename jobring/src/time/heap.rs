/// An array-backed N-ary min-heap.
///
/// Each node has `N` children, which flattens the tree and keeps siblings on
/// the same cache lines. Any `N >= 2` is correct; 4 is a good default for the
/// small entries the timer manager stores.
#[derive(Debug, Clone)]
pub struct NaryHeap<T, const N: usize> {
    data: Vec<T>,
}

impl<T: Ord, const N: usize> NaryHeap<T, N> {
    const ARITY_OK: () = assert!(N >= 2, "heap arity must be at least 2");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::ARITY_OK;
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::ARITY_OK;
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Smallest element, if any.
    pub fn peek(&self) -> Option<&T> {
        self.data.first()
    }

    pub fn push(&mut self, item: T) {
        self.data.push(item);
        self.sift_up(self.data.len() - 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        let last = self.data.pop()?;

        if self.data.is_empty() {
            return Some(last);
        }

        let top = std::mem::replace(&mut self.data[0], last);
        self.sift_down(0);
        Some(top)
    }

    /// Pops the smallest element only if `pred` accepts it.
    pub fn pop_if(&mut self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        if self.peek().is_some_and(pred) {
            self.pop()
        } else {
            None
        }
    }

    /// Removes every element, in no particular order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.data.drain(..)
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / N;
            if self.data[pos] >= self.data[parent] {
                break;
            }
            self.data.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.data.len();

        loop {
            let first = pos * N + 1;
            if first >= len {
                break;
            }

            let last = (first + N).min(len);
            let mut min = first;
            for child in first + 1..last {
                if self.data[child] < self.data[min] {
                    min = child;
                }
            }

            if self.data[min] >= self.data[pos] {
                break;
            }

            self.data.swap(pos, min);
            pos = min;
        }
    }
}

impl<T: Ord, const N: usize> Default for NaryHeap<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord, const N: usize> Extend<T> for NaryHeap<T, N> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}
