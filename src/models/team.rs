//! Team model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::User;

/// A team of users that review each other's pull requests.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Team {
    pub id: i64,

    /// Unique, case-sensitive team name.
    pub name: String,

    /// Deactivation is terminal.
    pub is_active: bool,

    /// Members, filled in when the team is loaded with its users.
    #[sqlx(skip)]
    #[serde(default)]
    pub members: Vec<User>,
}

impl Team {
    /// Whether users may be moved into this team.
    pub fn accepts_members(&self) -> bool {
        self.is_active
    }
}
