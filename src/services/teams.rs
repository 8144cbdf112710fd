//! Team lifecycle: creation with members, rename and deactivation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::assignment::AssignmentEngine;
use super::unit_of_work::{finish, with_deadline};
use crate::error::AppError;
use crate::models::{Team, User};
use crate::repository::Store;

/// Result of deactivating a team.
#[derive(Debug, Clone, Serialize)]
pub struct TeamDeactivation {
    pub team: Team,
    /// Members marked inactive.
    pub deactivated_users: usize,
    /// Open PRs that received at least one replacement reviewer.
    pub reassigned_prs: usize,
}

pub struct TeamService<S> {
    store: Arc<S>,
    engine: AssignmentEngine<S>,
    timeout: Duration,
}

impl<S: Store> TeamService<S> {
    pub fn new(store: Arc<S>, engine: AssignmentEngine<S>, timeout: Duration) -> Self {
        Self {
            store,
            engine,
            timeout,
        }
    }

    /// Create an active team and its active members in one unit of work.
    ///
    /// # Arguments
    /// * `name` - Unique team name
    /// * `usernames` - Members to create, each with a generated ID
    ///
    /// # Returns
    /// The team with its members
    pub async fn create_team(&self, name: &str, usernames: &[String]) -> Result<Team, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::validation_field("team name is required", "team_name"));
        }
        if usernames.iter().any(|u| u.trim().is_empty()) {
            return Err(AppError::validation_field("username is required", "username"));
        }

        let team = with_deadline(self.timeout, "create_team", async {
            let mut tx = self.store.begin().await?;
            let result = self.create_team_in_tx(&mut tx, name, usernames).await;
            finish(self.store.as_ref(), tx, result, "create_team").await
        })
        .await?;

        log::info!(
            "[team] Created {} with {} member(s)",
            team.name,
            team.members.len()
        );
        Ok(team)
    }

    async fn create_team_in_tx(
        &self,
        tx: &mut S::Tx,
        name: &str,
        usernames: &[String],
    ) -> Result<Team, AppError> {
        let mut team = self.store.create_team(Some(&mut *tx), name).await?;

        for username in usernames {
            let user = User {
                id: uuid::Uuid::new_v4().to_string(),
                username: username.clone(),
                team_id: team.id,
                team_name: team.name.clone(),
                is_active: true,
            };
            let mut created = self.store.create_user(Some(&mut *tx), &user).await?;
            created.team_name = team.name.clone();
            team.members.push(created);
        }

        Ok(team)
    }

    /// Look up a team with its members, ordered by username.
    pub async fn get_team(&self, name: &str) -> Result<Team, AppError> {
        let mut team = self.store.get_team_by_name(None, name).await?;
        team.members = self.store.list_users_by_team(None, team.id).await?;
        for member in &mut team.members {
            member.team_name = team.name.clone();
        }
        Ok(team)
    }

    pub async fn rename_team(&self, old_name: &str, new_name: &str) -> Result<Team, AppError> {
        if new_name.trim().is_empty() {
            return Err(AppError::validation_field("team name is required", "team_name"));
        }

        let team = with_deadline(self.timeout, "rename_team", async {
            let mut tx = self.store.begin().await?;
            let result = self.store.rename_team(Some(&mut tx), old_name, new_name).await;
            finish(self.store.as_ref(), tx, result, "rename_team").await
        })
        .await?;

        log::info!("[team] Renamed {} to {}", old_name, team.name);
        Ok(team)
    }

    /// Deactivate a team, all of its members, and rebalance the open PRs
    /// they were reviewing, atomically.
    pub async fn deactivate_team(&self, name: &str) -> Result<TeamDeactivation, AppError> {
        let outcome = with_deadline(self.timeout, "deactivate_team", async {
            let mut tx = self.store.begin().await?;
            let result = self.deactivate_team_in_tx(&mut tx, name).await;
            finish(self.store.as_ref(), tx, result, "deactivate_team").await
        })
        .await?;

        log::info!(
            "[team] Deactivated {}: {} user(s), {} PR(s) reassigned",
            outcome.team.name,
            outcome.deactivated_users,
            outcome.reassigned_prs
        );
        Ok(outcome)
    }

    async fn deactivate_team_in_tx(
        &self,
        tx: &mut S::Tx,
        name: &str,
    ) -> Result<TeamDeactivation, AppError> {
        let team = self.store.deactivate_team(Some(&mut *tx), name).await?;
        let user_ids = self
            .store
            .deactivate_users_by_team(Some(&mut *tx), team.id)
            .await?;
        let reassigned_prs = self.engine.rebalance_for_users(tx, &user_ids).await?;

        Ok(TeamDeactivation {
            team,
            deactivated_users: user_ids.len(),
            reassigned_prs,
        })
    }
}
