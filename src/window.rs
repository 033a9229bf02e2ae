//! Fixed-capacity rolling windows.
//!
//! All three exit-signal histories share this abstraction: an ordered
//! sequence that holds at most `capacity` entries and evicts the oldest
//! entry (FIFO) when a push would overflow.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A bounded FIFO window over recent values.
///
/// # Example
///
/// ```
/// use loopguard::window::RollingWindow;
///
/// let mut window = RollingWindow::new(3);
/// for i in 0..5u64 {
///     window.push(i);
/// }
/// assert_eq!(window.len(), 3);
/// assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingWindow<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> RollingWindow<T> {
    /// Create an empty window with the given capacity.
    ///
    /// A zero capacity is clamped to 1 so a push is never a silent no-op.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Push a value, evicting the oldest entry if the window is full.
    ///
    /// Returns the evicted entry, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(value);
        evicted
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries this window retains.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent entry, if any.
    #[must_use]
    pub fn newest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest retained entry, if any.
    #[must_use]
    pub fn oldest(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Remove all entries, keeping the capacity.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> RollingWindow<T> {
    /// Snapshot the entries oldest-to-newest as a `Vec`.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T: PartialEq> RollingWindow<T> {
    /// Check whether the window contains a value.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.entries.contains(value)
    }
}
