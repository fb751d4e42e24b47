//! Bounded rewind history.
//!
//! Snapshots are addressed by *absolute* index (position in the sequence of
//! pushes since the last clear). Evicting the oldest entries only moves
//! `evicted` forward, so a rewind target computed from `len()` keeps pointing
//! at the same snapshot no matter how much was evicted before it.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::engine::AgentState;
use crate::grid::Grid;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Shared with the live state until either side mutates (copy-on-write).
    pub grid: Arc<Grid>,
    pub agent: AgentState,
    pub score: i32,
    /// Length of the active path when the snapshot was taken.
    pub path_len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStore {
    ring: VecDeque<Snapshot>,
    capacity: usize,
    evicted: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: VecDeque::new(),
            capacity,
            evicted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Absolute length: every snapshot pushed and not truncated away.
    pub fn len(&self) -> usize {
        self.evicted + self.ring.len()
    }

    /// No snapshot is retained (nothing to rewind to).
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Snapshots currently held in memory.
    pub fn retained(&self) -> usize {
        self.ring.len()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
            self.evicted += 1;
        }
        self.ring.push_back(snapshot);
    }

    /// Index a rewind of `steps` lands on: `max(oldest, len - steps)`.
    pub fn rewind_target(&self, steps: usize) -> Option<usize> {
        if self.ring.is_empty() {
            return None;
        }
        Some(self.len().saturating_sub(steps).max(self.evicted))
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        index
            .checked_sub(self.evicted)
            .and_then(|i| self.ring.get(i))
    }

    /// Drop `index` and everything after it.
    pub fn truncate(&mut self, index: usize) {
        let keep = index.saturating_sub(self.evicted);
        self.ring.truncate(keep);
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.ring.back()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.evicted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Position;

    fn snap(grid: &Arc<Grid>, score: i32) -> Snapshot {
        let mut agent = AgentState::new(Position::new(1, 1), 100, 5);
        agent.steps_taken = score as u32;
        Snapshot {
            grid: Arc::clone(grid),
            agent,
            score,
            path_len: 1,
        }
    }

    #[test]
    fn target_clamps_to_oldest() {
        let grid = Arc::new(Grid::walled(4));
        let mut h = HistoryStore::new(16);
        assert_eq!(h.rewind_target(5), None);

        for i in 0..3 {
            h.push(snap(&grid, i));
        }
        assert_eq!(h.rewind_target(5), Some(0));
        assert_eq!(h.get(0).map(|s| s.score), Some(0));

        for i in 3..10 {
            h.push(snap(&grid, i));
        }
        assert_eq!(h.rewind_target(5), Some(5));
        assert_eq!(h.get(5).map(|s| s.score), Some(5));
    }

    #[test]
    fn eviction_keeps_absolute_indices() {
        let grid = Arc::new(Grid::walled(4));
        let mut h = HistoryStore::new(4);
        for i in 0..10 {
            h.push(snap(&grid, i));
        }
        assert_eq!(h.len(), 10);
        assert_eq!(h.retained(), 4);
        assert!(h.get(5).is_none());
        assert_eq!(h.get(6).map(|s| s.score), Some(6));
        assert_eq!(h.get(9).map(|s| s.score), Some(9));

        // Asking further back than retained lands on the oldest kept entry.
        assert_eq!(h.rewind_target(8), Some(6));
    }

    #[test]
    fn truncate_discards_the_future() {
        let grid = Arc::new(Grid::walled(4));
        let mut h = HistoryStore::new(32);
        for i in 0..8 {
            h.push(snap(&grid, i));
        }
        h.truncate(3);
        assert_eq!(h.len(), 3);
        assert_eq!(h.last().map(|s| s.score), Some(2));

        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.len(), 0);
    }
}
