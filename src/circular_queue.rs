use std::collections::VecDeque;
use std::fmt;

/// Fixed-capacity history. The newest item sits at the front; pushing into a
/// full queue evicts the oldest one.
pub struct CircularQueue<T> {
    deque: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> Clone for CircularQueue<T> {
    fn clone(&self) -> Self {
        Self {
            deque: self.deque.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CircularQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.asc_iter()).finish()
    }
}

impl<T> CircularQueue<T> {
    /// # Panics
    /// If `cap` is zero.
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        assert!(cap > 0, "CircularQueue capacity must be non-zero");

        Self {
            deque: VecDeque::with_capacity(cap),
            capacity: cap,
        }
    }

    #[inline]
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.is_full() {
            self.deque.pop_back()
        } else {
            None
        };

        self.deque.push_front(item);

        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.deque.len() == self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn clear(&mut self) {
        self.deque.clear()
    }

    /// Most recently pushed item.
    #[inline]
    pub fn latest(&self) -> Option<&T> {
        self.deque.front()
    }

    /// `n` pushes back from the latest; `nth_latest(0) == latest()`.
    #[inline]
    pub fn nth_latest(&self, n: usize) -> Option<&T> {
        self.deque.get(n)
    }

    /// Newest first.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'_ T> {
        self.deque.iter()
    }

    /// Oldest first.
    #[inline]
    pub fn asc_iter(&self) -> impl Iterator<Item = &'_ T> {
        self.deque.iter().rev()
    }
}
