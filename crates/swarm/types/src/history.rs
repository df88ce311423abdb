//! Capped history of terminated entities.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// FIFO history that evicts its oldest entry once full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedHistory<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    /// Append an item, returning the evicted one if the history was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Change the capacity, evicting from the front if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<&T> {
        self.items.iter().rev().find(|item| predicate(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_evicts_oldest() {
        let mut history = BoundedHistory::new(2);
        assert!(history.push(1).is_none());
        assert!(history.push(2).is_none());
        assert_eq!(history.push(3), Some(1));
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_shrinking_capacity() {
        let mut history = BoundedHistory::new(5);
        for i in 0..5 {
            history.push(i);
        }
        history.set_capacity(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history.find(|i| *i == 4), Some(&4));
        assert!(history.find(|i| *i == 0).is_none());
    }

    proptest! {
        #[test]
        fn property_keeps_newest_within_capacity(
            capacity in 1usize..16,
            items in proptest::collection::vec(any::<u32>(), 0..64),
        ) {
            let mut history = BoundedHistory::new(capacity);
            for item in &items {
                history.push(*item);
            }

            prop_assert!(history.len() <= capacity);
            let kept: Vec<u32> = history.iter().copied().collect();
            let start = items.len().saturating_sub(capacity);
            prop_assert_eq!(kept, items[start..].to_vec());
        }
    }
}
