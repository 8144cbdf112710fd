//! Failures and deadlines that strike after a unit of work has written.
//!
//! `FaultyStore` wraps the in-memory store and lets the test make
//! `add_reviewers` fail or hang after the rows are already staged, so every
//! case here rolls back real writes rather than an empty transaction.
//!
//! Covered:
//! 1. A failed reviewer insert discards the PR insert
//! 2. A deadline during PR creation discards the PR insert
//! 3. A deadline during team deactivation discards every cascade step

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pr_reviewer::models::{PrStatus, PullRequest, ReviewStat, Reviewer, Team, User};
use pr_reviewer::repository::memory::InMemoryTx;
use pr_reviewer::repository::{
    PullRequestRepository, StatsRepository, TeamRepository, Transactor, UserRepository,
};
use pr_reviewer::{AppError, EngineConfig, InMemoryStore, Services};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    /// Stage the rows, then fail.
    Fail,
    /// Stage the rows, then never return.
    Stall,
}

struct FaultyStore {
    inner: InMemoryStore,
    fault: Mutex<Fault>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            fault: Mutex::new(Fault::None),
        }
    }

    fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
    }

    fn fault(&self) -> Fault {
        *self.fault.lock().unwrap()
    }
}

#[async_trait]
impl Transactor for FaultyStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, AppError> {
        self.inner.begin().await
    }

    async fn commit(&self, tx: InMemoryTx) -> Result<(), AppError> {
        self.inner.commit(tx).await
    }

    async fn rollback(&self, tx: InMemoryTx) -> Result<(), AppError> {
        self.inner.rollback(tx).await
    }
}

#[async_trait]
impl TeamRepository for FaultyStore {
    async fn create_team(&self, tx: Option<&mut InMemoryTx>, name: &str) -> Result<Team, AppError> {
        self.inner.create_team(tx, name).await
    }

    async fn get_team_by_name(
        &self,
        tx: Option<&mut InMemoryTx>,
        name: &str,
    ) -> Result<Team, AppError> {
        self.inner.get_team_by_name(tx, name).await
    }

    async fn get_team_by_id(&self, tx: Option<&mut InMemoryTx>, id: i64) -> Result<Team, AppError> {
        self.inner.get_team_by_id(tx, id).await
    }

    async fn rename_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        old_name: &str,
        new_name: &str,
    ) -> Result<Team, AppError> {
        self.inner.rename_team(tx, old_name, new_name).await
    }

    async fn deactivate_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        name: &str,
    ) -> Result<Team, AppError> {
        self.inner.deactivate_team(tx, name).await
    }
}

#[async_trait]
impl UserRepository for FaultyStore {
    async fn create_user(&self, tx: Option<&mut InMemoryTx>, user: &User) -> Result<User, AppError> {
        self.inner.create_user(tx, user).await
    }

    async fn get_user_by_id(&self, tx: Option<&mut InMemoryTx>, id: &str) -> Result<User, AppError> {
        self.inner.get_user_by_id(tx, id).await
    }

    async fn list_users_by_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        team_id: i64,
    ) -> Result<Vec<User>, AppError> {
        self.inner.list_users_by_team(tx, team_id).await
    }

    async fn update_user(&self, tx: Option<&mut InMemoryTx>, user: &User) -> Result<User, AppError> {
        self.inner.update_user(tx, user).await
    }

    async fn set_user_active(
        &self,
        tx: Option<&mut InMemoryTx>,
        id: &str,
        is_active: bool,
    ) -> Result<User, AppError> {
        self.inner.set_user_active(tx, id, is_active).await
    }

    async fn move_user_to_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        id: &str,
        team_id: i64,
    ) -> Result<User, AppError> {
        self.inner.move_user_to_team(tx, id, team_id).await
    }

    async fn deactivate_users_by_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        team_id: i64,
    ) -> Result<Vec<String>, AppError> {
        self.inner.deactivate_users_by_team(tx, team_id).await
    }

    async fn find_candidates(
        &self,
        tx: Option<&mut InMemoryTx>,
        team_id: i64,
        author_id: &str,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<User>, AppError> {
        self.inner
            .find_candidates(tx, team_id, author_id, exclude, limit)
            .await
    }
}

#[async_trait]
impl PullRequestRepository for FaultyStore {
    async fn create_pull_request(
        &self,
        tx: Option<&mut InMemoryTx>,
        pr: &PullRequest,
    ) -> Result<PullRequest, AppError> {
        self.inner.create_pull_request(tx, pr).await
    }

    async fn get_pull_request(
        &self,
        tx: Option<&mut InMemoryTx>,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        self.inner.get_pull_request(tx, id).await
    }

    async fn lock_pull_request(
        &self,
        tx: &mut InMemoryTx,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        self.inner.lock_pull_request(tx, id).await
    }

    async fn merge_pull_request(
        &self,
        tx: Option<&mut InMemoryTx>,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        self.inner.merge_pull_request(tx, id).await
    }

    async fn list_reviewers(
        &self,
        tx: Option<&mut InMemoryTx>,
        pr_id: &str,
    ) -> Result<Vec<Reviewer>, AppError> {
        self.inner.list_reviewers(tx, pr_id).await
    }

    async fn remove_reviewer(
        &self,
        tx: Option<&mut InMemoryTx>,
        pr_id: &str,
        user_id: &str,
    ) -> Result<(), AppError> {
        self.inner.remove_reviewer(tx, pr_id, user_id).await
    }

    async fn add_reviewers(
        &self,
        tx: Option<&mut InMemoryTx>,
        pr_id: &str,
        user_ids: &[String],
    ) -> Result<(), AppError> {
        self.inner.add_reviewers(tx, pr_id, user_ids).await?;
        match self.fault() {
            Fault::None => Ok(()),
            Fault::Fail => Err(AppError::database_with_op("disk I/O error", "add_reviewers")),
            Fault::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn list_open_prs_by_reviewer(
        &self,
        tx: Option<&mut InMemoryTx>,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.inner.list_open_prs_by_reviewer(tx, user_id).await
    }

    async fn list_prs_by_reviewer(
        &self,
        tx: Option<&mut InMemoryTx>,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.inner.list_prs_by_reviewer(tx, user_id).await
    }

    async fn list_open_prs_without_reviewers(
        &self,
        tx: Option<&mut InMemoryTx>,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.inner.list_open_prs_without_reviewers(tx).await
    }
}

#[async_trait]
impl StatsRepository for FaultyStore {
    async fn review_stats(&self) -> Result<Vec<ReviewStat>, AppError> {
        self.inner.review_stats().await
    }

    async fn count_team_reviews(&self, team_id: i64, status: PrStatus) -> Result<i64, AppError> {
        self.inner.count_team_reviews(team_id, status).await
    }

    async fn count_user_reviews(&self, user_id: &str, status: PrStatus) -> Result<i64, AppError> {
        self.inner.count_user_reviews(user_id, status).await
    }
}

fn services(timeout_secs: u64) -> (Arc<FaultyStore>, Services<FaultyStore>) {
    let store = Arc::new(FaultyStore::new());
    let config = EngineConfig {
        operation_timeout_secs: timeout_secs,
        ..EngineConfig::default()
    };
    let svc = Services::new(Arc::clone(&store), &config);
    (store, svc)
}

async fn create_team(svc: &Services<FaultyStore>, name: &str, members: &[&str]) -> Team {
    let usernames: Vec<String> = members.iter().map(|m| m.to_string()).collect();
    svc.teams.create_team(name, &usernames).await.unwrap()
}

fn member(team: &Team, username: &str) -> User {
    team.members
        .iter()
        .find(|u| u.username == username)
        .cloned()
        .unwrap_or_else(|| panic!("{} is not in {}", username, team.name))
}

fn reviewer_names(pr: &PullRequest) -> Vec<String> {
    let mut names: Vec<String> = pr.reviewers.iter().map(|r| r.username.clone()).collect();
    names.sort();
    names
}

async fn assignment_count(store: &FaultyStore) -> i64 {
    store
        .review_stats()
        .await
        .unwrap()
        .iter()
        .map(|s| s.review_count)
        .sum()
}

#[tokio::test]
async fn test_failed_reviewer_insert_discards_pr() {
    let (store, svc) = services(30);
    let team = create_team(&svc, "core", &["alice", "bob", "carol"]).await;
    let alice = member(&team, "alice");

    store.set_fault(Fault::Fail);
    let err = svc
        .pull_requests
        .create_pr_with_id("pr-1", "Change", &alice.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Database { .. }));

    assert!(svc.pull_requests.get_pr("pr-1").await.unwrap_err().is_not_found());
    assert_eq!(assignment_count(&store).await, 0);
    assert!(svc
        .pull_requests
        .open_prs_without_reviewers()
        .await
        .unwrap()
        .is_empty());

    // The ID is free again once the fault clears.
    store.set_fault(Fault::None);
    let pr = svc
        .pull_requests
        .create_pr_with_id("pr-1", "Change", &alice.id)
        .await
        .unwrap();
    assert_eq!(reviewer_names(&pr), vec!["bob", "carol"]);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_after_writes_discards_pr() {
    let (store, svc) = services(1);
    let team = create_team(&svc, "core", &["alice", "bob", "carol"]).await;
    let alice = member(&team, "alice");

    store.set_fault(Fault::Stall);
    let err = svc
        .pull_requests
        .create_pr_with_id("pr-slow", "Change", &alice.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Timeout { .. }));
    store.set_fault(Fault::None);

    assert!(svc
        .pull_requests
        .get_pr("pr-slow")
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(assignment_count(&store).await, 0);

    svc.pull_requests
        .create_pr_with_id("pr-slow", "Change", &alice.id)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_team_deactivation_discards_cascade() {
    let (store, svc) = services(1);
    create_team(&svc, "core", &["alice", "bob"]).await;
    let web = create_team(&svc, "web", &["wade", "walt", "wendy"]).await;
    let pr = svc
        .pull_requests
        .create_pr("Landing page", &member(&web, "wendy").id)
        .await
        .unwrap();
    assert_eq!(reviewer_names(&pr), vec!["wade", "walt"]);

    svc.users
        .move_user_to_team(&member(&web, "wade").id, "core")
        .await
        .unwrap();
    svc.users
        .move_user_to_team(&member(&web, "walt").id, "core")
        .await
        .unwrap();
    let wes = svc.users.add_user("wes", "web", true).await.unwrap();

    // Team flag, member flags and both removals are staged before the
    // top-up hangs.
    store.set_fault(Fault::Stall);
    let err = svc.teams.deactivate_team("core").await.unwrap_err();
    assert!(matches!(err, AppError::Timeout { .. }));
    store.set_fault(Fault::None);

    let core = svc.teams.get_team("core").await.unwrap();
    assert!(core.is_active);
    assert_eq!(core.members.len(), 4);
    assert!(core.members.iter().all(|u| u.is_active));

    let stored = svc.pull_requests.get_pr(&pr.id).await.unwrap();
    assert_eq!(reviewer_names(&stored), vec!["wade", "walt"]);
    assert!(svc
        .pull_requests
        .reviews_for_user(&wes.id)
        .await
        .unwrap()
        .is_empty());

    let outcome = svc.teams.deactivate_team("core").await.unwrap();
    assert_eq!(outcome.deactivated_users, 4);
    assert_eq!(outcome.reassigned_prs, 1);
    let stored = svc.pull_requests.get_pr(&pr.id).await.unwrap();
    assert_eq!(reviewer_names(&stored), vec!["wes"]);
}
