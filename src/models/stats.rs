//! Review statistics models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Number of review assignments a user holds across all pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ReviewStat {
    pub user_id: String,
    pub review_count: i64,
}
