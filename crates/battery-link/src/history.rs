use std::collections::VecDeque;

/// Bounded, insertion-ordered buffer. Oldest entries are evicted first.
#[derive(Clone, Debug)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_first() {
        let mut history = HistoryBuffer::new(3);
        for i in 0..5 {
            history.push(i);
        }
        assert_eq!(history.to_vec(), vec![2, 3, 4]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut history = HistoryBuffer::new(0);
        history.push("a");
        history.push("b");
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.to_vec(), vec!["b"]);
    }
}
