//! LRU bookkeeping for resident shards.
//!
//! Only tracks indices; the caller performs the actual unload. Eviction
//! takes the victim shard's exclusive lock, and readers reload a shard they
//! find cold, so the deque may briefly disagree with which shards are loaded
//! without affecting correctness.

use std::collections::VecDeque;

use parking_lot::Mutex;

pub struct Residency {
    capacity: usize,
    order: Mutex<VecDeque<usize>>,
}

impl Residency {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: Mutex::new(VecDeque::with_capacity(capacity + 1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mark `shard` most recently used. Returns the least recently used
    /// shard if the cap is now exceeded; it has already been dropped from
    /// the deque and must be unloaded by the caller.
    pub fn touch(&self, shard: usize) -> Option<usize> {
        let mut order = self.order.lock();
        if order.front() == Some(&shard) {
            return None;
        }
        if let Some(pos) = order.iter().position(|&s| s == shard) {
            order.remove(pos);
        }
        order.push_front(shard);

        if order.len() > self.capacity {
            order.pop_back()
        } else {
            None
        }
    }

    /// Most recent first
    pub fn snapshot(&self) -> Vec<usize> {
        self.order.lock().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.order.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recent() {
        let lru = Residency::new(2);
        assert_eq!(lru.touch(0), None);
        assert_eq!(lru.touch(1), None);
        assert_eq!(lru.touch(2), Some(0));
        assert_eq!(lru.snapshot(), vec![2, 1]);
    }

    #[test]
    fn test_touch_refreshes_position() {
        let lru = Residency::new(2);
        lru.touch(0);
        lru.touch(1);
        lru.touch(0);
        assert_eq!(lru.touch(2), Some(1));
        assert_eq!(lru.snapshot(), vec![2, 0]);
    }

    #[test]
    fn test_repeated_touch_is_stable() {
        let lru = Residency::new(1);
        assert_eq!(lru.touch(3), None);
        assert_eq!(lru.touch(3), None);
        assert_eq!(lru.snapshot().len(), 1);
        assert_eq!(lru.touch(4), Some(3));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let lru = Residency::new(4);
        for i in 0..100 {
            lru.touch(i % 16);
            assert!(lru.snapshot().len() <= 4);
        }
        lru.clear();
        assert!(lru.snapshot().is_empty());
    }
}
