use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::NavigationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Browsing(usize),
    ShowingResults,
}

/// Tracks the active section and the sections the learner has advanced past.
///
/// The index always stays within `[0, section_count - 1]` for the section count
/// it was last given; completion only grows until [`Navigator::retake`].
#[derive(Debug, Clone, Default)]
pub struct Navigator {
    index: usize,
    showing_results: bool,
    completed: BTreeSet<usize>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NavState {
        if self.showing_results {
            NavState::ShowingResults
        } else {
            NavState::Browsing(self.index)
        }
    }

    /// Index of the active section, also while results are shown.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_showing_results(&self) -> bool {
        self.showing_results
    }

    pub fn completed(&self) -> &BTreeSet<usize> {
        &self.completed
    }

    pub fn is_completed(&self, index: usize) -> bool {
        self.completed.contains(&index)
    }

    pub fn advance(&mut self, section_count: usize) -> Result<NavState, NavigationError> {
        if self.showing_results {
            return Err(NavigationError::ShowingResults);
        }
        if self.index >= section_count {
            return Err(NavigationError::OutOfRange {
                index: self.index,
                len: section_count,
            });
        }
        self.completed.insert(self.index);
        if self.index + 1 < section_count {
            self.index += 1;
            debug!("advanced to section {}", self.index);
        } else {
            self.showing_results = true;
            info!("all {} sections completed, showing results", section_count);
        }
        Ok(self.state())
    }

    pub fn retreat(&mut self) -> Result<NavState, NavigationError> {
        if self.index == 0 {
            return Err(NavigationError::AtFirstSection);
        }
        self.index -= 1;
        self.showing_results = false;
        Ok(self.state())
    }

    pub fn jump_to(&mut self, index: usize, section_count: usize) -> Result<NavState, NavigationError> {
        if index >= section_count {
            return Err(NavigationError::OutOfRange {
                index,
                len: section_count,
            });
        }
        self.index = index;
        self.showing_results = false;
        Ok(self.state())
    }

    pub fn retake(&mut self) {
        self.index = 0;
        self.showing_results = false;
        self.completed.clear();
    }

    /// Keep pointing at the same section after section `deleted` was removed.
    /// A cursor on the deleted section moves to its predecessor.
    pub fn relocate_after_delete(&mut self, deleted: usize) {
        if self.index == deleted {
            self.index = deleted.saturating_sub(1);
        } else if self.index > deleted {
            self.index -= 1;
        }
        self.completed = self
            .completed
            .iter()
            .filter(|i| **i != deleted)
            .map(|i| if *i > deleted { i - 1 } else { *i })
            .collect();
    }

    /// Follow the active section when sections `a` and `b` trade places.
    pub fn follow_swap(&mut self, a: usize, b: usize) {
        if self.index == a {
            self.index = b;
        } else if self.index == b {
            self.index = a;
        }
        let has_a = self.completed.remove(&a);
        let has_b = self.completed.remove(&b);
        if has_a {
            self.completed.insert(b);
        }
        if has_b {
            self.completed.insert(a);
        }
    }

    /// Pull the cursor back in range after the section count shrank.
    pub fn clamp(&mut self, section_count: usize) {
        let last = section_count.saturating_sub(1);
        if self.index > last {
            self.index = last;
        }
        self.completed.retain(|i| *i < section_count);
    }
}
