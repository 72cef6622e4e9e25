//! Fixed-capacity FIFO that overwrites the oldest entry when full.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    deque: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be greater than zero");
        Self {
            deque: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
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

    /// Append `value`, returning the displaced oldest entry when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let displaced = if self.is_full() {
            self.deque.pop_front()
        } else {
            None
        };
        self.deque.push_back(value);
        displaced
    }

    pub fn pop(&mut self) -> Option<T> {
        self.deque.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.deque.front()
    }

    pub fn clear(&mut self) {
        self.deque.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.deque.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "RingBuffer capacity must be greater than zero")]
    fn zero_capacity_panics() {
        let _buffer: RingBuffer<i32> = RingBuffer::with_capacity(0);
    }

    #[test]
    fn push_and_pop_in_fifo_order() {
        let mut buffer = RingBuffer::with_capacity(3);
        buffer.push(1);
        buffer.push(2);
        buffer.push(3);

        assert_eq!(buffer.pop(), Some(1));
        assert_eq!(buffer.pop(), Some(2));
        assert_eq!(buffer.pop(), Some(3));
        assert!(buffer.is_empty());
    }

    #[test]
    fn push_returns_displaced_entry_when_full() {
        let mut buffer = RingBuffer::with_capacity(2);
        assert!(buffer.push(1).is_none());
        assert!(buffer.push(2).is_none());
        assert_eq!(buffer.push(3), Some(1));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.peek(), Some(&2));
        assert_eq!(buffer.pop(), Some(2));
        assert_eq!(buffer.pop(), Some(3));
    }
}
