use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::Direction;

/// Permutation of track indices with a cursor into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleOrder {
    order: Vec<usize>,
    cursor: usize,
}

impl ShuffleOrder {
    /// Fisher–Yates permutation of `0..len`, with `first` moved to the front
    /// so the current track keeps playing.
    pub fn generate<R: Rng + ?Sized>(len: usize, first: Option<usize>, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(rng);

        if let Some(pos) = first.and_then(|index| order.iter().position(|&i| i == index)) {
            order.swap(0, pos);
        }

        Self { order, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Track index under the cursor
    pub fn current(&self) -> Option<usize> {
        self.order.get(self.cursor).copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }

    /// Move the cursor one step with wrap. Returns the new track index and
    /// whether the cursor wrapped.
    pub fn step(&mut self, direction: Direction) -> Option<(usize, bool)> {
        let len = self.order.len();
        if len == 0 {
            return None;
        }

        let (cursor, wrapped) = step_index(self.cursor, len, direction);
        self.cursor = cursor;
        Some((self.order[cursor], wrapped))
    }

    /// Point the cursor at `index`. Returns false if `index` is not in the order.
    pub fn seek(&mut self, index: usize) -> bool {
        match self.order.iter().position(|&i| i == index) {
            Some(pos) => {
                self.cursor = pos;
                true
            }
            None => false,
        }
    }
}

/// One step through `0..len` with wrap-around
pub(crate) fn step_index(current: usize, len: usize, direction: Direction) -> (usize, bool) {
    match direction {
        Direction::Forward if current + 1 >= len => (0, true),
        Direction::Forward => (current + 1, false),
        Direction::Backward if current == 0 => (len - 1, true),
        Direction::Backward => (current - 1, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_generate_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let order = ShuffleOrder::generate(25, None, &mut rng);

        let seen: HashSet<usize> = order.as_slice().iter().copied().collect();
        assert_eq!(order.len(), 25);
        assert_eq!(seen.len(), 25);
        assert!(seen.iter().all(|&i| i < 25));
    }

    #[test]
    fn test_generate_keeps_first_at_front() {
        let mut rng = StdRng::seed_from_u64(11);
        let order = ShuffleOrder::generate(10, Some(6), &mut rng);
        assert_eq!(order.current(), Some(6));
        assert_eq!(order.cursor(), 0);
    }

    #[test]
    fn test_step_wraps_both_ways() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut order = ShuffleOrder::generate(3, None, &mut rng);
        let slice = order.as_slice().to_vec();

        assert_eq!(order.step(Direction::Backward), Some((slice[2], true)));
        assert_eq!(order.step(Direction::Forward), Some((slice[0], true)));
        assert_eq!(order.step(Direction::Forward), Some((slice[1], false)));
    }

    #[test]
    fn test_seek_moves_cursor() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut order = ShuffleOrder::generate(8, None, &mut rng);
        assert!(order.seek(4));
        assert_eq!(order.current(), Some(4));
        assert!(!order.seek(8));
    }

    #[test]
    fn test_empty_order_does_not_step() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut order = ShuffleOrder::generate(0, None, &mut rng);
        assert!(order.is_empty());
        assert_eq!(order.step(Direction::Forward), None);
    }
}
