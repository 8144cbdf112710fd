//! User model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A team member who can author pull requests and review them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Opaque, globally unique ID.
    pub id: String,

    pub username: String,

    /// Owning team.
    pub team_id: i64,

    /// Owning team name, only populated by lookups that join on teams.
    #[sqlx(default)]
    #[serde(default)]
    pub team_name: String,

    /// Inactive users never receive new or continued review duty.
    pub is_active: bool,
}

impl User {
    /// Whether the user may be moved to another team.
    pub fn can_be_moved(&self) -> bool {
        self.is_active
    }

    pub fn reviewer(&self) -> super::Reviewer {
        super::Reviewer {
            user_id: self.id.clone(),
            username: self.username.clone(),
        }
    }
}
