//! Review statistics.

use std::sync::Arc;

use crate::error::AppError;
use crate::models::{PrStatus, ReviewStat};
use crate::repository::Store;

pub struct StatsService<S> {
    store: Arc<S>,
}

impl<S: Store> StatsService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Assignment count per user, highest first.
    pub async fn review_stats(&self) -> Result<Vec<ReviewStat>, AppError> {
        self.store.review_stats().await
    }

    pub async fn open_review_count_for_team(&self, team_name: &str) -> Result<i64, AppError> {
        self.team_count(team_name, PrStatus::Open).await
    }

    pub async fn merged_review_count_for_team(&self, team_name: &str) -> Result<i64, AppError> {
        self.team_count(team_name, PrStatus::Merged).await
    }

    pub async fn open_review_count_for_user(&self, user_id: &str) -> Result<i64, AppError> {
        self.user_count(user_id, PrStatus::Open).await
    }

    pub async fn merged_review_count_for_user(&self, user_id: &str) -> Result<i64, AppError> {
        self.user_count(user_id, PrStatus::Merged).await
    }

    async fn team_count(&self, team_name: &str, status: PrStatus) -> Result<i64, AppError> {
        let team = self.store.get_team_by_name(None, team_name).await?;
        self.store.count_team_reviews(team.id, status).await
    }

    async fn user_count(&self, user_id: &str, status: PrStatus) -> Result<i64, AppError> {
        self.store.get_user_by_id(None, user_id).await?;
        self.store.count_user_reviews(user_id, status).await
    }
}
