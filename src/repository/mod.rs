//! Data-access contract for the reviewer engine.
//!
//! Services only talk to storage through these traits, so the same
//! assignment logic runs against SQLite in production and against the
//! in-memory store in tests.
//!
//! Every operation takes `tx: Option<&mut Self::Tx>`. `Some` runs the call
//! inside an open unit of work; `None` runs it on its own, outside any
//! transaction. Reads made with `None` are advisory only: anything a
//! mutation depends on must be re-read inside the transaction.

pub mod memory;
pub mod selection;

pub use memory::InMemoryStore;
pub use selection::{OrderedSelector, RandomSelector, ReviewerSelector};

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{PrStatus, PullRequest, ReviewStat, Reviewer, Team, User};

/// Begin/commit/rollback for a unit of work.
///
/// Dropping a transaction without committing it discards its writes.
#[async_trait]
pub trait Transactor: Send + Sync {
    /// Transaction handle owned by the operation that opened it.
    type Tx: Send + 'static;

    async fn begin(&self) -> Result<Self::Tx, AppError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), AppError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), AppError>;
}

#[async_trait]
pub trait TeamRepository: Transactor {
    /// Create an active team. Fails with `TeamExists` on a duplicate name.
    async fn create_team(&self, tx: Option<&mut Self::Tx>, name: &str) -> Result<Team, AppError>;

    async fn get_team_by_name(
        &self,
        tx: Option<&mut Self::Tx>,
        name: &str,
    ) -> Result<Team, AppError>;

    async fn get_team_by_id(&self, tx: Option<&mut Self::Tx>, id: i64) -> Result<Team, AppError>;

    async fn rename_team(
        &self,
        tx: Option<&mut Self::Tx>,
        old_name: &str,
        new_name: &str,
    ) -> Result<Team, AppError>;

    /// Mark the team inactive. Members are left untouched.
    async fn deactivate_team(&self, tx: Option<&mut Self::Tx>, name: &str)
        -> Result<Team, AppError>;
}

#[async_trait]
pub trait UserRepository: Transactor {
    /// Insert a user. Duplicate IDs or usernames fail with `Validation`,
    /// an unknown team with `NotFound`.
    async fn create_user(&self, tx: Option<&mut Self::Tx>, user: &User) -> Result<User, AppError>;

    /// Look up a user, with `team_name` populated.
    async fn get_user_by_id(&self, tx: Option<&mut Self::Tx>, id: &str)
        -> Result<User, AppError>;

    /// Members of a team, ordered by username.
    async fn list_users_by_team(
        &self,
        tx: Option<&mut Self::Tx>,
        team_id: i64,
    ) -> Result<Vec<User>, AppError>;

    /// Overwrite username, team and active flag.
    async fn update_user(&self, tx: Option<&mut Self::Tx>, user: &User) -> Result<User, AppError>;

    async fn set_user_active(
        &self,
        tx: Option<&mut Self::Tx>,
        id: &str,
        is_active: bool,
    ) -> Result<User, AppError>;

    async fn move_user_to_team(
        &self,
        tx: Option<&mut Self::Tx>,
        id: &str,
        team_id: i64,
    ) -> Result<User, AppError>;

    /// Mark every member of the team inactive and return their IDs.
    async fn deactivate_users_by_team(
        &self,
        tx: Option<&mut Self::Tx>,
        team_id: i64,
    ) -> Result<Vec<String>, AppError>;

    /// Up to `limit` active members of `team_id`, never `author_id` nor any
    /// of `exclude`. Returning fewer than `limit` is not an error.
    async fn find_candidates(
        &self,
        tx: Option<&mut Self::Tx>,
        team_id: i64,
        author_id: &str,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<User>, AppError>;
}

#[async_trait]
pub trait PullRequestRepository: Transactor {
    /// Insert an open PR. Fails with `PrExists` on a duplicate ID and
    /// `NotFound` when the author does not exist.
    async fn create_pull_request(
        &self,
        tx: Option<&mut Self::Tx>,
        pr: &PullRequest,
    ) -> Result<PullRequest, AppError>;

    /// Look up a PR without its reviewers.
    async fn get_pull_request(
        &self,
        tx: Option<&mut Self::Tx>,
        id: &str,
    ) -> Result<PullRequest, AppError>;

    /// Re-read a PR inside `tx` and hold it against concurrent writers
    /// until the transaction ends. Call this before any other statement of a
    /// PR-mutating unit of work.
    async fn lock_pull_request(&self, tx: &mut Self::Tx, id: &str)
        -> Result<PullRequest, AppError>;

    /// Set status to `MERGED` and stamp `merged_at`.
    async fn merge_pull_request(
        &self,
        tx: Option<&mut Self::Tx>,
        id: &str,
    ) -> Result<PullRequest, AppError>;

    /// Current reviewers, ordered by username.
    async fn list_reviewers(
        &self,
        tx: Option<&mut Self::Tx>,
        pr_id: &str,
    ) -> Result<Vec<Reviewer>, AppError>;

    async fn remove_reviewer(
        &self,
        tx: Option<&mut Self::Tx>,
        pr_id: &str,
        user_id: &str,
    ) -> Result<(), AppError>;

    /// Insert one assignment row per user. A duplicate (PR, user) pair is a
    /// storage error.
    async fn add_reviewers(
        &self,
        tx: Option<&mut Self::Tx>,
        pr_id: &str,
        user_ids: &[String],
    ) -> Result<(), AppError>;

    async fn list_open_prs_by_reviewer(
        &self,
        tx: Option<&mut Self::Tx>,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError>;

    /// Every PR the user reviews, open or merged.
    async fn list_prs_by_reviewer(
        &self,
        tx: Option<&mut Self::Tx>,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError>;

    async fn list_open_prs_without_reviewers(
        &self,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Vec<PullRequest>, AppError>;
}

/// Read-only reporting queries.
#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Assignment count per user, highest first.
    async fn review_stats(&self) -> Result<Vec<ReviewStat>, AppError>;

    /// Assignments held by members of `team_id` on PRs with `status`.
    async fn count_team_reviews(&self, team_id: i64, status: PrStatus) -> Result<i64, AppError>;

    /// Assignments held by `user_id` on PRs with `status`.
    async fn count_user_reviews(&self, user_id: &str, status: PrStatus) -> Result<i64, AppError>;
}

/// Everything the services need from storage.
pub trait Store: TeamRepository + UserRepository + PullRequestRepository + StatsRepository {}

impl<T> Store for T where T: TeamRepository + UserRepository + PullRequestRepository + StatsRepository
{}
