//! Fixed-capacity ring of free buffer handles
//!
//! The streaming scheduler keeps every buffer that is neither queued on the
//! source nor being filled in this ring. Handles are taken from the head and
//! returned at the tail, so buffers are reused in the order the device gave
//! them back.
//!
//! Unlike a bare start/end index pair, the ring tracks its length, which lets
//! it hold all `capacity` entries at once.

use std::fmt;

/// Error type for free queue operations
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Requested capacity was zero
    #[error("Free buffer queue capacity must be greater than 0")]
    ZeroCapacity,
    /// Every slot is occupied
    #[error("Free buffer queue is full ({0} entries)")]
    Full(usize),
    /// The entry is already in the queue
    #[error("Entry is already in the free buffer queue")]
    Duplicate,
}

/// Bounded FIFO ring
///
/// `start` and `end` always lie in `[0, capacity)`, and
/// `(end - start) mod capacity == len` except when the ring is full, where
/// `end == start`.
#[derive(Clone)]
pub struct FreeBufferQueue<T> {
    slots: Vec<Option<T>>,
    start: usize,
    len: usize,
}

impl<T: Copy + PartialEq> FreeBufferQueue<T> {
    /// Create an empty ring with room for `capacity` entries
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ZeroCapacity`] if `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        Ok(FreeBufferQueue {
            slots: vec![None; capacity],
            start: 0,
            len: 0,
        })
    }

    /// Create a full ring holding `items` in order
    pub fn from_items(items: &[T]) -> Result<Self, QueueError> {
        let mut queue = Self::with_capacity(items.len())?;
        for item in items {
            queue.push(*item)?;
        }
        Ok(queue)
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the ring holds nothing
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if every slot is occupied
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Index of the head slot
    pub fn start(&self) -> usize {
        self.start
    }

    /// Index of the next slot to be written
    pub fn end(&self) -> usize {
        (self.start + self.len) % self.capacity()
    }

    /// Append `item` at the tail
    pub fn push(&mut self, item: T) -> Result<(), QueueError> {
        if self.is_full() {
            return Err(QueueError::Full(self.capacity()));
        }
        if self.contains(&item) {
            return Err(QueueError::Duplicate);
        }
        let end = self.end();
        self.slots[end] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the head entry
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.start].take();
        self.start = (self.start + 1) % self.capacity();
        self.len -= 1;
        item
    }

    /// Check if `item` is currently held
    pub fn contains(&self, item: &T) -> bool {
        self.iter().any(|held| held == *item)
    }

    /// Entries from head to tail
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).filter_map(move |i| self.slots[(self.start + i) % self.capacity()])
    }
}

impl<T: Copy + PartialEq + fmt::Debug> fmt::Debug for FreeBufferQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeBufferQueue")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("entries", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_creation() {
        let queue = FreeBufferQueue::<u32>::with_capacity(3).unwrap();
        assert_eq!(queue.capacity(), 3);
        assert!(queue.is_empty());
        assert!(!queue.is_full());
    }

    #[test]
    fn test_zero_capacity_error() {
        let result = FreeBufferQueue::<u32>::with_capacity(0);
        assert_eq!(result.unwrap_err(), QueueError::ZeroCapacity);
        assert!(QueueError::ZeroCapacity
            .to_string()
            .contains("greater than 0"));
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = FreeBufferQueue::from_items(&[10u32, 11, 12]).unwrap();
        assert!(queue.is_full());
        assert_eq!(queue.pop(), Some(10));
        assert_eq!(queue.pop(), Some(11));
        queue.push(10).unwrap();
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec![12, 10]);
    }

    #[test]
    fn test_full_and_duplicate_rejected() {
        let mut queue = FreeBufferQueue::with_capacity(2).unwrap();
        queue.push(1u32).unwrap();
        assert_eq!(queue.push(1), Err(QueueError::Duplicate));
        queue.push(2).unwrap();
        assert_eq!(queue.push(3), Err(QueueError::Full(2)));
    }

    #[test]
    fn test_indices_wrap() {
        let mut queue = FreeBufferQueue::with_capacity(3).unwrap();
        for round in 0..10u32 {
            queue.push(round).unwrap();
            queue.push(round + 100).unwrap();
            assert!(queue.start() < 3 && queue.end() < 3);
            assert_eq!((queue.end() + 3 - queue.start()) % 3, queue.len());

            assert_eq!(queue.pop(), Some(round));
            assert_eq!(queue.pop(), Some(round + 100));
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn test_pop_empty() {
        let mut queue = FreeBufferQueue::<u32>::with_capacity(1).unwrap();
        assert_eq!(queue.pop(), None);
        queue.push(5).unwrap();
        assert!(queue.is_full());
        assert_eq!(queue.end(), queue.start());
        assert_eq!(queue.pop(), Some(5));
        assert_eq!(queue.pop(), None);
    }
}
