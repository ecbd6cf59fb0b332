use std::collections::VecDeque;

/// Fixed-capacity FIFO log. Pushing past capacity drops the oldest entry; iteration is
/// oldest-first.
#[derive(Clone, Debug)]
pub(in crate::ingest) struct BoundedLog<T> {
    capacity: usize,
    buffer: VecDeque<T>,
}

impl<T: Clone> BoundedLog<T> {
    pub(in crate::ingest) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns the evicted entry, if any.
    pub(in crate::ingest) fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.buffer.len() >= self.capacity {
            self.buffer.pop_front()
        } else {
            None
        };
        self.buffer.push_back(item);
        evicted
    }

    pub(in crate::ingest) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(in crate::ingest) fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub(in crate::ingest) fn last(&self) -> Option<&T> {
        self.buffer.back()
    }

    pub(in crate::ingest) fn snapshot(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }

    /// Up to `limit` newest entries, still oldest-first.
    pub(in crate::ingest) fn tail(&self, limit: usize) -> Vec<T> {
        let skip = self.buffer.len().saturating_sub(limit);
        self.buffer.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::BoundedLog;

    #[test]
    fn push_evicts_oldest_in_order() {
        let mut log = BoundedLog::new(3);
        assert_eq!(log.push(1), None);
        assert_eq!(log.push(2), None);
        assert!(!log.is_full());
        assert_eq!(log.push(3), None);
        assert!(log.is_full());
        assert_eq!(log.push(4), Some(1));
        assert_eq!(log.push(5), Some(2));
        assert_eq!(log.snapshot(), vec![3, 4, 5]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.last(), Some(&5));
    }

    #[test]
    fn tail_keeps_chronological_order() {
        let mut log = BoundedLog::new(5);
        for value in 0..5 {
            log.push(value);
        }
        assert_eq!(log.tail(2), vec![3, 4]);
        assert_eq!(log.tail(10), vec![0, 1, 2, 3, 4]);
        assert!(log.tail(0).is_empty());
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let mut log = BoundedLog::new(0);
        log.push("a");
        log.push("b");
        assert_eq!(log.snapshot(), vec!["b"]);
    }
}
