//! Engagement counters read from a rendered project page.

use serde::{Deserialize, Serialize};

/// Likes and comments as rendered by the project page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct CounterSample {
    /// Number of likes.
    pub likes: u64,
    /// Number of comments.
    pub comments: u64,
}

impl CounterSample {
    /// Creates a new sample.
    pub fn new(likes: u64, comments: u64) -> Self {
        Self { likes, comments }
    }

    /// The all-zero sample.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns true if neither counter is set.
    pub fn is_zero(&self) -> bool {
        self.likes == 0 && self.comments == 0
    }
}
