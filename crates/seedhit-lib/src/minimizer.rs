//! Minimizer selection over seed keys
//!
//! Given the seed keys at consecutive offsets of a sequence (with `None` for
//! offsets that produced no valid seed), a minimizer window of `w` offsets
//! selects the smallest key in every window of `w` consecutive offsets. The
//! leftmost occurrence wins ties. Consecutive windows usually select the
//! same offset, so an offset is reported only the first time it is selected.

use std::collections::VecDeque;

/// Sliding-window minimizer selector
///
/// Keeps a monotone queue of candidate offsets whose keys increase from front
/// to back, so each offset is pushed and popped at most once.
pub struct MinimizerIterator<'a> {
    keys: &'a [Option<u64>],
    window: usize,
    queue: VecDeque<usize>,
    next_offset: usize,
    last_selected: Option<usize>,
}

impl<'a> MinimizerIterator<'a> {
    /// Create a selector over `keys` with a window of `window` offsets
    ///
    /// A window of 0 is treated as 1. Sequences with fewer offsets than the
    /// window form a single window.
    pub fn new(keys: &'a [Option<u64>], window: usize) -> Self {
        Self {
            keys,
            window: window.max(1),
            queue: VecDeque::new(),
            next_offset: 0,
            last_selected: None,
        }
    }

    fn push_offset(&mut self, offset: usize) {
        if let Some(key) = self.keys[offset] {
            // strict comparison keeps the leftmost of equal keys
            while let Some(&back) = self.queue.back() {
                if self.keys[back] > Some(key) {
                    self.queue.pop_back();
                } else {
                    break;
                }
            }
            self.queue.push_back(offset);
        }
    }
}

impl Iterator for MinimizerIterator<'_> {
    /// Offset of the selected seed
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let n = self.keys.len();
        while self.next_offset < n {
            let end = self.next_offset;
            self.push_offset(end);
            self.next_offset += 1;
            // a partial window counts only at the end of a short sequence
            if end + 1 < self.window && end + 1 < n {
                continue;
            }
            let start = (end + 1).saturating_sub(self.window);
            while let Some(&front) = self.queue.front() {
                if front < start {
                    self.queue.pop_front();
                } else {
                    break;
                }
            }
            if let Some(&selected) = self.queue.front() {
                if self.last_selected != Some(selected) {
                    self.last_selected = Some(selected);
                    return Some(selected);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(keys: &[Option<u64>], w: usize) -> Vec<usize> {
        MinimizerIterator::new(keys, w).collect()
    }

    #[test]
    fn test_window_of_one_selects_every_valid_offset() {
        let keys = [Some(5), None, Some(3), Some(3)];
        assert_eq!(select(&keys, 1), vec![0, 2, 3]);
    }

    #[test]
    fn test_leftmost_minimum_and_dedup() {
        // windows of 3: [4,2,7] -> 1, [2,7,2] -> 1, [7,2,9] -> 3, [2,9,1] -> 5
        let keys = [Some(4), Some(2), Some(7), Some(2), Some(9), Some(1)];
        assert_eq!(select(&keys, 3), vec![1, 3, 5]);
    }

    #[test]
    fn test_short_sequence_is_one_window() {
        let keys = [Some(8), Some(6)];
        assert_eq!(select(&keys, 5), vec![1]);
        assert!(select(&[], 5).is_empty());
    }

    #[test]
    fn test_all_invalid_window_selects_nothing() {
        let keys = [None, None, None, Some(1)];
        assert_eq!(select(&keys, 2), vec![3]);
    }

    #[test]
    fn test_output_is_strictly_increasing() {
        let keys: Vec<Option<u64>> = (0..200u64).map(|i| Some((i * 7919) % 13)).collect();
        let selected = select(&keys, 4);
        assert!(selected.windows(2).all(|w| w[0] < w[1]));
    }
}
