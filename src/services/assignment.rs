//! Reviewer assignment engine.
//!
//! Decides who reviews a pull request and keeps reviewer sets valid as users
//! leave active duty. Every method that writes takes the caller's open
//! transaction; committing is the caller's job.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::{self, PullRequest, Reviewer, User, MAX_REVIEWERS};
use crate::repository::Store;

/// Assignment logic over a store.
pub struct AssignmentEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for AssignmentEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> AssignmentEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Up to `limit` active members of `team_id`, excluding the author and
    /// `exclude`. A short or empty result is not an error.
    pub async fn find_candidates(
        &self,
        tx: Option<&mut S::Tx>,
        team_id: i64,
        author_id: &str,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<User>, AppError> {
        let candidates = self
            .store
            .find_candidates(tx, team_id, author_id, exclude, limit)
            .await?;
        log::debug!(
            "[assignment] {} of {} candidate(s) found in team {}",
            candidates.len(),
            limit,
            team_id
        );
        Ok(candidates)
    }

    /// Draw up to `MAX_REVIEWERS` reviewers for a freshly created PR.
    ///
    /// # Arguments
    /// * `tx` - Transaction the PR row was inserted in
    /// * `pr` - The new pull request
    /// * `author` - Its author, read inside `tx`
    ///
    /// # Returns
    /// The reviewers assigned, possibly none
    pub async fn assign_initial(
        &self,
        tx: &mut S::Tx,
        pr: &PullRequest,
        author: &User,
    ) -> Result<Vec<Reviewer>, AppError> {
        let candidates = self
            .find_candidates(Some(&mut *tx), author.team_id, &author.id, &[], MAX_REVIEWERS)
            .await?;
        if candidates.is_empty() {
            log::info!("[assignment] No reviewers available for {}", pr.id);
            return Ok(Vec::new());
        }

        let ids: Vec<String> = candidates.iter().map(|u| u.id.clone()).collect();
        self.store.add_reviewers(Some(&mut *tx), &pr.id, &ids).await?;
        log::info!("[assignment] Assigned {:?} to {}", ids, pr.id);

        Ok(candidates.iter().map(User::reviewer).collect())
    }

    /// Add `user_id` as a reviewer of the locked, open `pr`.
    ///
    /// Returns `false` when the user already reviews the PR.
    pub async fn assign_reviewer_in_tx(
        &self,
        tx: &mut S::Tx,
        pr: &PullRequest,
        user_id: &str,
    ) -> Result<bool, AppError> {
        let user = self.store.get_user_by_id(Some(&mut *tx), user_id).await?;
        if !user.is_active {
            return Err(AppError::validation_field(
                format!("user {} is not active", user_id),
                "user_id",
            ));
        }
        if !pr.is_open() {
            return Err(AppError::pr_merged(&pr.id));
        }
        if pr.author_id == user_id {
            return Err(AppError::validation_field(
                "author cannot review their own pull request",
                "user_id",
            ));
        }

        let reviewers = self.store.list_reviewers(Some(&mut *tx), &pr.id).await?;
        if reviewers.iter().any(|r| r.user_id == user_id) {
            return Ok(false);
        }
        if reviewers.len() >= MAX_REVIEWERS {
            return Err(AppError::validation(format!(
                "pull request {} already has {} reviewers",
                pr.id, MAX_REVIEWERS
            )));
        }

        self.store
            .add_reviewers(Some(&mut *tx), &pr.id, &[user_id.to_string()])
            .await?;
        log::info!("[assignment] Assigned {} to {}", user_id, pr.id);
        Ok(true)
    }

    /// Replace `old_user_id` on `pr` with one new reviewer.
    ///
    /// The removal stands even when no replacement exists; `None` is
    /// returned in that case.
    pub async fn reassign_in_tx(
        &self,
        tx: &mut S::Tx,
        pr: &PullRequest,
        old_user_id: &str,
    ) -> Result<Option<String>, AppError> {
        self.store
            .remove_reviewer(Some(&mut *tx), &pr.id, old_user_id)
            .await?;

        let remaining = self.store.list_reviewers(Some(&mut *tx), &pr.id).await?;
        let mut exclude: Vec<String> = models::reviewer_ids(&remaining)
            .into_iter()
            .filter(|id| id != old_user_id)
            .collect();
        exclude.push(old_user_id.to_string());

        let author = self.store.get_user_by_id(Some(&mut *tx), &pr.author_id).await?;
        let candidates = self
            .find_candidates(Some(&mut *tx), author.team_id, &author.id, &exclude, 1)
            .await?;

        let Some(replacement) = candidates.into_iter().next() else {
            log::warn!(
                "[assignment] No replacement for {} on {}",
                old_user_id,
                pr.id
            );
            return Ok(None);
        };

        self.store
            .add_reviewers(Some(&mut *tx), &pr.id, &[replacement.id.clone()])
            .await?;
        log::info!(
            "[assignment] Replaced {} with {} on {}",
            old_user_id,
            replacement.id,
            pr.id
        );
        Ok(Some(replacement.id))
    }

    /// Drop the given (already inactive) users from every open PR they
    /// review and top up PRs left without reviewers.
    ///
    /// # Returns
    /// Number of distinct PRs that received at least one new reviewer
    pub async fn rebalance_for_users(
        &self,
        tx: &mut S::Tx,
        user_ids: &[String],
    ) -> Result<usize, AppError> {
        let mut topped_up: HashSet<String> = HashSet::new();

        for user_id in user_ids {
            let prs = self
                .store
                .list_open_prs_by_reviewer(Some(&mut *tx), user_id)
                .await?;

            for pr in prs {
                self.store
                    .remove_reviewer(Some(&mut *tx), &pr.id, user_id)
                    .await?;

                let remaining = self.store.list_reviewers(Some(&mut *tx), &pr.id).await?;
                if !remaining.is_empty() {
                    continue;
                }

                if self.top_up(tx, &pr, &remaining).await? {
                    topped_up.insert(pr.id.clone());
                }
            }
        }

        log::info!(
            "[assignment] Rebalanced reviews of {} user(s), {} PR(s) topped up",
            user_ids.len(),
            topped_up.len()
        );
        Ok(topped_up.len())
    }

    /// Fill `pr` up to `MAX_REVIEWERS` from its author's team, if that team
    /// is still active.
    async fn top_up(
        &self,
        tx: &mut S::Tx,
        pr: &PullRequest,
        remaining: &[Reviewer],
    ) -> Result<bool, AppError> {
        let author = self.store.get_user_by_id(Some(&mut *tx), &pr.author_id).await?;
        let team = self.store.get_team_by_id(Some(&mut *tx), author.team_id).await?;
        if !team.is_active {
            log::debug!(
                "[assignment] {} left without reviewers, team {} is inactive",
                pr.id,
                team.name
            );
            return Ok(false);
        }

        let exclude = models::reviewer_ids(remaining);
        let limit = MAX_REVIEWERS.saturating_sub(remaining.len());
        let candidates = self
            .find_candidates(Some(&mut *tx), team.id, &author.id, &exclude, limit)
            .await?;
        if candidates.is_empty() {
            log::warn!("[assignment] No candidates to top up {}", pr.id);
            return Ok(false);
        }

        let ids: Vec<String> = candidates.into_iter().map(|u| u.id).collect();
        self.store.add_reviewers(Some(&mut *tx), &pr.id, &ids).await?;
        Ok(true)
    }
}
