//! Data models for the reviewer engine.
//!
//! These models are shared by every store implementation. They derive
//! Serialize for transport adapters and FromRow for SQLx queries.

pub mod pull_request;
pub mod stats;
pub mod team;
pub mod user;

// Re-exports for convenient access
pub use pull_request::{PrStatus, PullRequest, Reviewer, MAX_REVIEWERS};
pub use stats::ReviewStat;
pub use team::Team;
pub use user::User;

/// Collect the user IDs of a reviewer list.
pub fn reviewer_ids(reviewers: &[Reviewer]) -> Vec<String> {
    reviewers.iter().map(|r| r.user_id.clone()).collect()
}

/// Current Unix timestamp in seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
