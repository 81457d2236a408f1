//! Memoization of search states already proven to fail.

use std::collections::HashSet;

/// Partial assignments (sorted candidate ids) whose whole subtree failed.
///
/// The domains after propagation are a function of the assigned candidates,
/// so revisiting a recorded assignment cannot succeed.
#[derive(Debug, Default)]
pub struct FailedStates {
    failed: HashSet<Vec<usize>>,
}

impl FailedStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed assignment. Returns `false` if it was already known.
    pub fn insert(&mut self, signature: Vec<usize>) -> bool {
        self.failed.insert(signature)
    }

    pub fn contains(&self, signature: &[usize]) -> bool {
        self.failed.contains(signature)
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_state_tracking() {
        let mut memo = FailedStates::new();
        assert!(memo.insert(vec![1, 4]));
        assert!(!memo.insert(vec![1, 4]));
        assert!(memo.contains(&[1, 4]));
        assert!(!memo.contains(&[1]));
        assert_eq!(memo.len(), 1);
    }
}
