//! Progress projection for a run.

use serde::Serialize;

/// How far a run has got, as `completed` of `total` lines.
///
/// Always built from `(completed, total)` so `percent` can't drift from the
/// counts. `percent` rounds half-up but stays below 100 until every line is
/// done, so it reads 100 only once `completed == total`. With nothing to do
/// (`total == 0`) it reads 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProgressState {
    completed: usize,
    total: usize,
    percent: u8,
}

impl ProgressState {
    /// Project `(completed, total)` into a progress value.
    ///
    /// `completed` is clamped to `total`.
    pub fn new(completed: usize, total: usize) -> Self {
        let completed = completed.min(total);
        let percent = if total == 0 {
            0
        } else if completed == total {
            100
        } else {
            // round(100 * c / t), half-up, in integer arithmetic
            let (c, t) = (completed as u128, total as u128);
            let rounded = (200 * c + t) / (2 * t);
            rounded.min(99) as u8
        };

        Self {
            completed,
            total,
            percent,
        }
    }

    /// Progress before any batch has finished.
    pub fn initial(total: usize) -> Self {
        Self::new(0, total)
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    /// Progress after another `lines` have finished.
    pub fn advance(&self, lines: usize) -> Self {
        Self::new(self.completed.saturating_add(lines), self.total)
    }
}

impl std::fmt::Display for ProgressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} ({}%)", self.completed, self.total, self.percent)
    }
}
