//! Pull request and reviewer assignment models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// Maximum number of reviewers on an open pull request.
pub const MAX_REVIEWERS: usize = 2;

/// Lifecycle state of a pull request. `Merged` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrStatus {
    Open,
    Merged,
}

impl TryFrom<&str> for PrStatus {
    type Error = AppError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "MERGED" => Ok(Self::Merged),
            _ => Err(AppError::validation_field(
                format!("Unknown pull request status '{}'", s),
                "status",
            )),
        }
    }
}

impl std::fmt::Display for PrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Merged => write!(f, "MERGED"),
        }
    }
}

/// A user currently assigned to review a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Reviewer {
    pub user_id: String,
    pub username: String,
}

/// A pull request awaiting (or done with) review.
///
/// Note: `status` is stored as a string in SQLite; use `status_enum()`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PullRequest {
    /// Opaque PR ID.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Author's user ID.
    pub author_id: String,

    /// Current status: `OPEN` or `MERGED`.
    pub status: String,

    /// Creation timestamp (Unix).
    pub created_at: i64,

    /// Merge timestamp (Unix, if merged).
    pub merged_at: Option<i64>,

    /// Current reviewers, filled in by detailed lookups.
    #[sqlx(skip)]
    #[serde(default)]
    pub reviewers: Vec<Reviewer>,
}

impl PullRequest {
    /// Parse the status string into an enum.
    ///
    /// An unrecognised status is logged and treated as `Merged`, so a
    /// corrupt row is frozen rather than handed new reviewers.
    pub fn status_enum(&self) -> PrStatus {
        PrStatus::try_from(self.status.as_str()).unwrap_or_else(|_| {
            log::warn!("[pr] {} has unknown status '{}'", self.id, self.status);
            PrStatus::Merged
        })
    }

    /// Check if the PR is still open.
    pub fn is_open(&self) -> bool {
        self.status_enum() == PrStatus::Open
    }

    pub fn has_reviewer(&self, user_id: &str) -> bool {
        self.reviewers.iter().any(|r| r.user_id == user_id)
    }

    pub fn reviewer_ids(&self) -> Vec<String> {
        super::reviewer_ids(&self.reviewers)
    }
}
