//! Totally ordered `f32` wrapper for heap keys.

use std::cmp::Ordering;

/// `f32` ordered by [`f32::total_cmp`], so it can key a `BinaryHeap`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OrderedFloat(pub f32);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn test_heap_pops_highest_first() {
        let mut heap: BinaryHeap<OrderedFloat> =
            [0.5, f32::NEG_INFINITY, 0.9, 0.1].into_iter().map(OrderedFloat).collect();
        assert_eq!(heap.pop().map(|f| f.0), Some(0.9));
        assert_eq!(heap.pop().map(|f| f.0), Some(0.5));
    }
}
