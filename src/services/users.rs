//! User lifecycle: creation, updates, (de)activation and team transfers.

use std::sync::Arc;
use std::time::Duration;

use super::assignment::AssignmentEngine;
use super::unit_of_work::{finish, with_deadline};
use crate::error::AppError;
use crate::models::User;
use crate::repository::Store;

pub struct UserService<S> {
    store: Arc<S>,
    engine: AssignmentEngine<S>,
    timeout: Duration,
}

impl<S: Store> UserService<S> {
    pub fn new(store: Arc<S>, engine: AssignmentEngine<S>, timeout: Duration) -> Self {
        Self {
            store,
            engine,
            timeout,
        }
    }

    /// Add a user to an existing team under a generated ID.
    ///
    /// An active user cannot join an inactive team.
    pub async fn add_user(
        &self,
        username: &str,
        team_name: &str,
        is_active: bool,
    ) -> Result<User, AppError> {
        if username.trim().is_empty() || team_name.trim().is_empty() {
            return Err(AppError::validation(
                "username and team name are required",
            ));
        }

        let user = with_deadline(self.timeout, "add_user", async {
            let mut tx = self.store.begin().await?;
            let result = self
                .add_user_in_tx(&mut tx, username, team_name, is_active)
                .await;
            finish(self.store.as_ref(), tx, result, "add_user").await
        })
        .await?;

        log::info!("[user] Added {} ({}) to {}", user.username, user.id, team_name);
        Ok(user)
    }

    async fn add_user_in_tx(
        &self,
        tx: &mut S::Tx,
        username: &str,
        team_name: &str,
        is_active: bool,
    ) -> Result<User, AppError> {
        let team = self.store.get_team_by_name(Some(&mut *tx), team_name).await?;
        if is_active && !team.is_active {
            return Err(AppError::validation_field(
                format!("team {} is not active", team_name),
                "team_name",
            ));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            team_id: team.id,
            team_name: team.name.clone(),
            is_active,
        };
        let mut created = self.store.create_user(Some(&mut *tx), &user).await?;
        created.team_name = team.name;
        Ok(created)
    }

    pub async fn get_user(&self, id: &str) -> Result<User, AppError> {
        self.store.get_user_by_id(None, id).await
    }

    /// Update username and active flag. Team membership is changed through
    /// [`UserService::move_user_to_team`] only.
    ///
    /// Deactivating a user here rebalances their open reviews like
    /// [`UserService::set_user_active`] does.
    pub async fn update_user(&self, user: &User) -> Result<User, AppError> {
        if user.id.trim().is_empty() {
            return Err(AppError::validation_field("user id is required", "user_id"));
        }
        if user.username.trim().is_empty() {
            return Err(AppError::validation_field("username is required", "username"));
        }

        let updated = with_deadline(self.timeout, "update_user", async {
            let mut tx = self.store.begin().await?;
            let result = self.update_user_in_tx(&mut tx, user).await;
            finish(self.store.as_ref(), tx, result, "update_user").await
        })
        .await?;

        log::info!("[user] Updated {}", updated.id);
        Ok(updated)
    }

    async fn update_user_in_tx(&self, tx: &mut S::Tx, user: &User) -> Result<User, AppError> {
        let existing = self.store.get_user_by_id(Some(&mut *tx), &user.id).await?;
        if user.is_active && !existing.is_active {
            self.ensure_team_active(tx, &existing).await?;
        }

        let changes = User {
            team_id: existing.team_id,
            ..user.clone()
        };
        let mut updated = self.store.update_user(Some(&mut *tx), &changes).await?;
        updated.team_name = existing.team_name;

        if existing.is_active && !updated.is_active {
            self.engine
                .rebalance_for_users(tx, &[updated.id.clone()])
                .await?;
        }
        Ok(updated)
    }

    /// Activate or deactivate a user.
    ///
    /// Deactivation removes the user from every open PR they review and
    /// tops up PRs left without reviewers, in the same unit of work.
    pub async fn set_user_active(&self, id: &str, is_active: bool) -> Result<User, AppError> {
        let user = with_deadline(self.timeout, "set_user_active", async {
            let mut tx = self.store.begin().await?;
            let result = self.set_user_active_in_tx(&mut tx, id, is_active).await;
            finish(self.store.as_ref(), tx, result, "set_user_active").await
        })
        .await?;

        log::info!(
            "[user] {} is now {}",
            user.id,
            if user.is_active { "active" } else { "inactive" }
        );
        Ok(user)
    }

    async fn set_user_active_in_tx(
        &self,
        tx: &mut S::Tx,
        id: &str,
        is_active: bool,
    ) -> Result<User, AppError> {
        let existing = self.store.get_user_by_id(Some(&mut *tx), id).await?;
        if is_active && !existing.is_active {
            self.ensure_team_active(tx, &existing).await?;
        }

        let mut user = self.store.set_user_active(Some(&mut *tx), id, is_active).await?;
        user.team_name = existing.team_name;

        if !is_active {
            self.engine.rebalance_for_users(tx, &[id.to_string()]).await?;
        }
        Ok(user)
    }

    /// Move an active user into another active team.
    ///
    /// Existing review assignments are left as they are.
    pub async fn move_user_to_team(&self, id: &str, team_name: &str) -> Result<User, AppError> {
        // Advisory checks; repeated inside the transaction.
        let user = self.store.get_user_by_id(None, id).await?;
        if !user.can_be_moved() {
            return Err(AppError::validation_field(
                format!("user {} is not active", id),
                "user_id",
            ));
        }
        let team = self.store.get_team_by_name(None, team_name).await?;
        if !team.accepts_members() {
            return Err(AppError::validation_field(
                format!("team {} is not active", team_name),
                "team_name",
            ));
        }

        let moved = with_deadline(self.timeout, "move_user_to_team", async {
            let mut tx = self.store.begin().await?;
            let result = self.move_user_in_tx(&mut tx, id, team_name).await;
            finish(self.store.as_ref(), tx, result, "move_user_to_team").await
        })
        .await?;

        log::info!("[user] Moved {} to {}", moved.id, moved.team_name);
        Ok(moved)
    }

    async fn move_user_in_tx(
        &self,
        tx: &mut S::Tx,
        id: &str,
        team_name: &str,
    ) -> Result<User, AppError> {
        let user = self.store.get_user_by_id(Some(&mut *tx), id).await?;
        if !user.can_be_moved() {
            return Err(AppError::validation_field(
                format!("user {} is not active", id),
                "user_id",
            ));
        }
        let team = self.store.get_team_by_name(Some(&mut *tx), team_name).await?;
        if !team.accepts_members() {
            return Err(AppError::validation_field(
                format!("team {} is not active", team_name),
                "team_name",
            ));
        }

        let mut moved = self
            .store
            .move_user_to_team(Some(&mut *tx), id, team.id)
            .await?;
        moved.team_name = team.name;
        Ok(moved)
    }

    async fn ensure_team_active(&self, tx: &mut S::Tx, user: &User) -> Result<(), AppError> {
        let team = self.store.get_team_by_id(Some(&mut *tx), user.team_id).await?;
        if !team.is_active {
            return Err(AppError::validation_field(
                format!("team {} is not active", team.name),
                "team_name",
            ));
        }
        Ok(())
    }
}
