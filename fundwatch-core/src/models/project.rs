//! Project snapshot types.
//!
//! This module contains the normalized view of one crowdfunding project:
//! - [`ProjectRecord`] - Immutable snapshot produced once per fetch
//! - [`RewardTier`] - A visible reward level of a project
//! - [`FetchSource`] - Which acquisition path produced the record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::counters::CounterSample;

/// Status string used for records that could not be fetched.
pub const UNKNOWN_STATUS: &str = "unknown";

// ============================================================================
// Fetch Source
// ============================================================================

/// How a project record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    /// Signed API / JSONP endpoints.
    Api,
    /// API record with counters read from the rendered page.
    Browser,
    /// Fail-soft default, nothing could be fetched.
    #[default]
    Default,
}

impl FetchSource {
    /// Returns a short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Browser => "browser",
            Self::Default => "default",
        }
    }
}

// ============================================================================
// Reward Tier
// ============================================================================

/// A single reward level shown on a project page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RewardTier {
    /// Tier title.
    pub title: String,
    /// Price per unit.
    pub price: f64,
    /// Maximum number of units, if capped.
    pub cap: Option<u64>,
    /// Units already sold.
    pub sold: u64,
    /// Units still available when the tier is capped.
    pub remaining: Option<u64>,
    /// Plain-text description.
    pub description: String,
}

impl RewardTier {
    /// Returns true if a capped tier has nothing left.
    pub fn is_sold_out(&self) -> bool {
        self.remaining == Some(0)
    }
}

// ============================================================================
// Project Record
// ============================================================================

/// Immutable snapshot of one project's public metrics.
///
/// Records are superseded by newer fetches and never mutated in place;
/// [`ProjectRecord::with_counters`] consumes the old record and returns a
/// new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Upstream project id.
    pub id: String,
    /// Project name.
    pub name: String,
    /// Upstream status, verbatim.
    pub status: String,
    /// Funding goal.
    pub target_amount: f64,
    /// Amount raised so far.
    pub raised_amount: f64,
    /// Raised / target in percent.
    pub completion_rate: f64,
    /// Number of backers.
    pub backer_count: u64,
    /// Number of "likes" (upstream `bull_count`).
    pub like_count: u64,
    /// Number of comments.
    pub comment_count: u64,
    /// Visible reward tiers.
    #[serde(default)]
    pub reward_tiers: Vec<RewardTier>,
    /// Start time as reported upstream.
    pub start_time: Option<String>,
    /// End time as reported upstream.
    pub end_time: Option<String>,
    /// Acquisition path.
    #[serde(default)]
    pub source: FetchSource,
    /// When this snapshot was taken.
    pub fetched_at: DateTime<Utc>,
}

impl ProjectRecord {
    /// Creates the fully-populated default record for an id.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            status: UNKNOWN_STATUS.to_string(),
            target_amount: 0.0,
            raised_amount: 0.0,
            completion_rate: 0.0,
            backer_count: 0,
            like_count: 0,
            comment_count: 0,
            reward_tiers: Vec::new(),
            start_time: None,
            end_time: None,
            source: FetchSource::Default,
            fetched_at: Utc::now(),
        }
    }

    /// Returns true if this is the fail-soft default record.
    pub fn is_default(&self) -> bool {
        self.source == FetchSource::Default
    }

    /// Returns true if both engagement counters are zero.
    pub fn has_zero_counters(&self) -> bool {
        self.like_count == 0 && self.comment_count == 0
    }

    /// Returns the engagement counters as a sample.
    pub fn counters(&self) -> CounterSample {
        CounterSample::new(self.like_count, self.comment_count)
    }

    /// Returns a new record with counters taken from the rendered page.
    pub fn with_counters(self, sample: CounterSample) -> Self {
        Self {
            like_count: sample.likes,
            comment_count: sample.comments,
            source: FetchSource::Browser,
            fetched_at: Utc::now(),
            ..self
        }
    }
}

/// Computes raised / target in percent, zero when there is no target.
pub fn completion_rate(raised: f64, target: f64) -> f64 {
    if target > 0.0 { raised / target * 100.0 } else { 0.0 }
}
