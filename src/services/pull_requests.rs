//! Pull request lifecycle: creation with reviewer assignment, merge and
//! explicit reviewer changes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::assignment::AssignmentEngine;
use super::unit_of_work::{finish, with_deadline};
use crate::error::AppError;
use crate::models::{self, PrStatus, PullRequest};
use crate::repository::Store;

/// Outcome of a successful reviewer replacement.
#[derive(Debug, Clone, Serialize)]
pub struct Reassignment {
    /// The pull request after the change.
    pub pr: PullRequest,
    /// ID of the reviewer who took over.
    pub replaced_by: String,
}

pub struct PullRequestService<S> {
    store: Arc<S>,
    engine: AssignmentEngine<S>,
    timeout: Duration,
}

impl<S: Store> PullRequestService<S> {
    pub fn new(store: Arc<S>, engine: AssignmentEngine<S>, timeout: Duration) -> Self {
        Self {
            store,
            engine,
            timeout,
        }
    }

    /// Open a PR under a generated ID and assign its initial reviewers.
    pub async fn create_pr(&self, name: &str, author_id: &str) -> Result<PullRequest, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.create_pr_with_id(&id, name, author_id).await
    }

    /// Open a PR under a caller-chosen ID and assign its initial reviewers.
    ///
    /// Fails with `PrExists` if the ID is taken. If no teammate is available
    /// the PR is still created, with no reviewers.
    pub async fn create_pr_with_id(
        &self,
        id: &str,
        name: &str,
        author_id: &str,
    ) -> Result<PullRequest, AppError> {
        if id.trim().is_empty() {
            return Err(AppError::validation_field("pull request id is required", "id"));
        }
        if name.trim().is_empty() || author_id.trim().is_empty() {
            return Err(AppError::validation(
                "pull request name and author are required",
            ));
        }

        // Fail fast on an unknown author before opening a transaction
        self.store.get_user_by_id(None, author_id).await?;

        let draft = PullRequest {
            id: id.to_string(),
            name: name.to_string(),
            author_id: author_id.to_string(),
            status: PrStatus::Open.to_string(),
            created_at: models::unix_now(),
            merged_at: None,
            reviewers: Vec::new(),
        };

        let pr = with_deadline(self.timeout, "create_pr", async {
            let mut tx = self.store.begin().await?;
            let result = self.create_pr_in_tx(&mut tx, &draft).await;
            finish(self.store.as_ref(), tx, result, "create_pr").await
        })
        .await?;

        log::info!(
            "[pr] Created {} by {} with {} reviewer(s)",
            pr.id,
            pr.author_id,
            pr.reviewers.len()
        );
        Ok(pr)
    }

    async fn create_pr_in_tx(
        &self,
        tx: &mut S::Tx,
        draft: &PullRequest,
    ) -> Result<PullRequest, AppError> {
        let author = self
            .store
            .get_user_by_id(Some(&mut *tx), &draft.author_id)
            .await?;
        let mut pr = self.store.create_pull_request(Some(&mut *tx), draft).await?;
        pr.reviewers = self.engine.assign_initial(tx, &pr, &author).await?;
        Ok(pr)
    }

    /// Look up a PR with its current reviewers. Works in any status.
    ///
    /// The PR row and its reviewer set come from one unit of work, so the
    /// result never straddles a concurrent commit. The read therefore waits
    /// behind an in-flight write like any mutation does.
    pub async fn get_pr(&self, id: &str) -> Result<PullRequest, AppError> {
        with_deadline(self.timeout, "get_pr", async {
            let mut tx = self.store.begin().await?;
            let result = self.get_pr_in_tx(&mut tx, id).await;
            finish(self.store.as_ref(), tx, result, "get_pr").await
        })
        .await
    }

    async fn get_pr_in_tx(&self, tx: &mut S::Tx, id: &str) -> Result<PullRequest, AppError> {
        let mut pr = self.store.get_pull_request(Some(&mut *tx), id).await?;
        pr.reviewers = self.store.list_reviewers(Some(tx), id).await?;
        Ok(pr)
    }

    /// Close a PR. Merging twice fails with `PrMerged`.
    pub async fn merge_pr(&self, id: &str) -> Result<PullRequest, AppError> {
        let pr = with_deadline(self.timeout, "merge_pr", async {
            let mut tx = self.store.begin().await?;
            let result = self.merge_pr_in_tx(&mut tx, id).await;
            finish(self.store.as_ref(), tx, result, "merge_pr").await
        })
        .await?;

        log::info!("[pr] Merged {}", pr.id);
        Ok(pr)
    }

    async fn merge_pr_in_tx(&self, tx: &mut S::Tx, id: &str) -> Result<PullRequest, AppError> {
        let current = self.store.lock_pull_request(tx, id).await?;
        if !current.is_open() {
            return Err(AppError::pr_merged(id));
        }

        let mut pr = self.store.merge_pull_request(Some(&mut *tx), id).await?;
        pr.reviewers = self.store.list_reviewers(Some(&mut *tx), id).await?;
        Ok(pr)
    }

    /// Add a specific user as reviewer.
    ///
    /// Assigning someone who already reviews the PR is a no-op.
    pub async fn assign_reviewer(&self, pr_id: &str, user_id: &str) -> Result<PullRequest, AppError> {
        let pr = with_deadline(self.timeout, "assign_reviewer", async {
            let mut tx = self.store.begin().await?;
            let result = self.assign_reviewer_in_tx(&mut tx, pr_id, user_id).await;
            finish(self.store.as_ref(), tx, result, "assign_reviewer").await
        })
        .await?;

        Ok(pr)
    }

    async fn assign_reviewer_in_tx(
        &self,
        tx: &mut S::Tx,
        pr_id: &str,
        user_id: &str,
    ) -> Result<PullRequest, AppError> {
        let mut pr = self.store.lock_pull_request(tx, pr_id).await?;
        let added = self.engine.assign_reviewer_in_tx(tx, &pr, user_id).await?;
        if !added {
            log::debug!("[pr] {} already reviews {}", user_id, pr_id);
        }
        pr.reviewers = self.store.list_reviewers(Some(&mut *tx), pr_id).await?;
        Ok(pr)
    }

    /// Replace one reviewer with another teammate.
    ///
    /// When nobody eligible is left, the old reviewer is still removed and
    /// `NoCandidate` is returned.
    pub async fn reassign_reviewer(
        &self,
        pr_id: &str,
        old_user_id: &str,
    ) -> Result<Reassignment, AppError> {
        let replaced_by = with_deadline(self.timeout, "reassign_reviewer", async {
            let mut tx = self.store.begin().await?;
            let result = self.reassign_in_tx(&mut tx, pr_id, old_user_id).await;
            finish(self.store.as_ref(), tx, result, "reassign_reviewer").await
        })
        .await?;

        match replaced_by {
            Some(replaced_by) => Ok(Reassignment {
                pr: self.get_pr(pr_id).await?,
                replaced_by,
            }),
            None => Err(AppError::no_candidate(pr_id)),
        }
    }

    async fn reassign_in_tx(
        &self,
        tx: &mut S::Tx,
        pr_id: &str,
        old_user_id: &str,
    ) -> Result<Option<String>, AppError> {
        let pr = self.store.lock_pull_request(tx, pr_id).await?;
        if !pr.is_open() {
            return Err(AppError::pr_merged(pr_id));
        }

        let reviewers = self.store.list_reviewers(Some(&mut *tx), pr_id).await?;
        if !reviewers.iter().any(|r| r.user_id == old_user_id) {
            return Err(AppError::not_assigned(pr_id, old_user_id));
        }

        self.engine.reassign_in_tx(tx, &pr, old_user_id).await
    }

    /// Every PR the user reviews, open or merged.
    pub async fn reviews_for_user(&self, user_id: &str) -> Result<Vec<PullRequest>, AppError> {
        self.store.get_user_by_id(None, user_id).await?;
        self.store.list_prs_by_reviewer(None, user_id).await
    }

    pub async fn open_prs_without_reviewers(&self) -> Result<Vec<PullRequest>, AppError> {
        self.store.list_open_prs_without_reviewers(None).await
    }
}
