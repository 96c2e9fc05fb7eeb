//! Bounded newest-first history used for frames and messages

use std::collections::vec_deque::{self, VecDeque};

/// Default capacity for both the frame and the message history
pub const MAX_BUFFER_SIZE: usize = 20;

/// Keeps the most recent items of one kind, newest at index 0
///
/// Pushing onto a full buffer evicts the oldest entry, so the length never
/// exceeds the capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RecentBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Inserts at the front, returning the evicted entry if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_back()
        } else {
            None
        };
        self.items.push_front(item);
        evicted
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Newest first
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for RecentBuffer<T> {
    fn default() -> Self {
        Self::new(MAX_BUFFER_SIZE)
    }
}

impl<'a, T> IntoIterator for &'a RecentBuffer<T> {
    type Item = &'a T;
    type IntoIter = vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
