//! In-memory implementation of the data-access contract.
//!
//! A transaction takes the store's writer lock and works on a private copy
//! of the tables; commit swaps the copy in, dropping it discards the writes.
//! Writers are therefore fully serialized while reads outside a transaction
//! always see the last committed state. All state is lost on drop.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::selection::{OrderedSelector, ReviewerSelector};
use super::{PullRequestRepository, StatsRepository, TeamRepository, Transactor, UserRepository};
use crate::error::AppError;
use crate::models::{self, PrStatus, PullRequest, ReviewStat, Reviewer, Team, User};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_team_id: i64,
    teams: BTreeMap<i64, Team>,
    users: HashMap<String, User>,
    pull_requests: HashMap<String, PullRequest>,
    /// (pr_id, user_id) pairs.
    assignments: BTreeSet<(String, String)>,
}

impl Tables {
    fn team_id_by_name(&self, name: &str) -> Result<i64, AppError> {
        self.teams
            .values()
            .find(|t| t.name == name)
            .map(|t| t.id)
            .ok_or_else(|| AppError::not_found_with_id("Team", name))
    }

    fn team(&self, id: i64) -> Result<Team, AppError> {
        self.teams
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found_with_id("Team", id.to_string()))
    }

    fn user(&self, id: &str) -> Result<User, AppError> {
        let mut user = self
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found_with_id("User", id))?;
        user.team_name = self
            .teams
            .get(&user.team_id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        Ok(user)
    }

    fn user_mut(&mut self, id: &str) -> Result<&mut User, AppError> {
        self.users
            .get_mut(id)
            .ok_or_else(|| AppError::not_found_with_id("User", id))
    }

    fn username_taken(&self, username: &str, except_id: &str) -> bool {
        self.users
            .values()
            .any(|u| u.username == username && u.id != except_id)
    }

    fn pull_request(&self, id: &str) -> Result<PullRequest, AppError> {
        self.pull_requests
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found_with_id("PullRequest", id))
    }

    fn reviewers(&self, pr_id: &str) -> Vec<Reviewer> {
        let mut reviewers: Vec<Reviewer> = self
            .assignments
            .iter()
            .filter(|(pr, _)| pr == pr_id)
            .filter_map(|(_, user_id)| self.users.get(user_id))
            .map(User::reviewer)
            .collect();
        reviewers.sort_by(|a, b| a.username.cmp(&b.username));
        reviewers
    }

    fn prs_reviewed_by(&self, user_id: &str, only_open: bool) -> Vec<PullRequest> {
        let mut prs: Vec<PullRequest> = self
            .assignments
            .iter()
            .filter(|(_, user)| user == user_id)
            .filter_map(|(pr_id, _)| self.pull_requests.get(pr_id))
            .filter(|pr| !only_open || pr.is_open())
            .cloned()
            .collect();
        sort_prs(&mut prs);
        prs
    }

    fn count_reviews<F>(&self, status: PrStatus, reviewer_matches: F) -> i64
    where
        F: Fn(&User) -> bool,
    {
        self.assignments
            .iter()
            .filter(|(pr_id, user_id)| {
                let status_matches = self
                    .pull_requests
                    .get(pr_id)
                    .is_some_and(|pr| pr.status_enum() == status);
                let user_matches = self.users.get(user_id).is_some_and(&reviewer_matches);
                status_matches && user_matches
            })
            .count() as i64
    }
}

fn sort_prs(prs: &mut [PullRequest]) {
    prs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Open unit of work on an `InMemoryStore`.
pub struct InMemoryTx {
    staged: Tables,
    _writer: OwnedMutexGuard<()>,
}

/// In-memory store.
///
/// Defaults to `OrderedSelector`, so candidate draws are deterministic
/// (alphabetical by username) unless another selector is supplied.
pub struct InMemoryStore {
    committed: RwLock<Tables>,
    writer: Arc<Mutex<()>>,
    selector: Arc<dyn ReviewerSelector>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_selector(Arc::new(OrderedSelector))
    }

    pub fn with_selector(selector: Arc<dyn ReviewerSelector>) -> Self {
        Self {
            committed: RwLock::new(Tables {
                next_team_id: 1,
                ..Tables::default()
            }),
            writer: Arc::new(Mutex::new(())),
            selector,
        }
    }

    async fn read<R, F>(&self, tx: Option<&mut InMemoryTx>, f: F) -> R
    where
        F: FnOnce(&Tables) -> R + Send,
        R: Send,
    {
        match tx {
            Some(tx) => f(&tx.staged),
            None => {
                let tables = self.committed.read().await;
                f(&tables)
            }
        }
    }

    /// Apply `f` to the transaction's tables, or autocommit it on its own.
    async fn write<R, F>(&self, tx: Option<&mut InMemoryTx>, f: F) -> Result<R, AppError>
    where
        F: FnOnce(&mut Tables) -> Result<R, AppError> + Send,
        R: Send,
    {
        match tx {
            Some(tx) => f(&mut tx.staged),
            None => {
                let mut tx = self.begin().await?;
                let value = f(&mut tx.staged)?;
                self.commit(tx).await?;
                Ok(value)
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transactor for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, AppError> {
        let writer = self.writer.clone().lock_owned().await;
        let staged = self.committed.read().await.clone();
        Ok(InMemoryTx {
            staged,
            _writer: writer,
        })
    }

    async fn commit(&self, tx: InMemoryTx) -> Result<(), AppError> {
        let InMemoryTx { staged, _writer } = tx;
        *self.committed.write().await = staged;
        Ok(())
    }

    async fn rollback(&self, tx: InMemoryTx) -> Result<(), AppError> {
        drop(tx);
        Ok(())
    }
}

#[async_trait]
impl TeamRepository for InMemoryStore {
    async fn create_team(&self, tx: Option<&mut InMemoryTx>, name: &str) -> Result<Team, AppError> {
        self.write(tx, |t| {
            if t.teams.values().any(|team| team.name == name) {
                return Err(AppError::team_exists(name));
            }
            let team = Team {
                id: t.next_team_id,
                name: name.to_string(),
                is_active: true,
                members: Vec::new(),
            };
            t.next_team_id += 1;
            t.teams.insert(team.id, team.clone());
            Ok(team)
        })
        .await
    }

    async fn get_team_by_name(
        &self,
        tx: Option<&mut InMemoryTx>,
        name: &str,
    ) -> Result<Team, AppError> {
        self.read(tx, |t| t.team_id_by_name(name).and_then(|id| t.team(id)))
            .await
    }

    async fn get_team_by_id(&self, tx: Option<&mut InMemoryTx>, id: i64) -> Result<Team, AppError> {
        self.read(tx, |t| t.team(id)).await
    }

    async fn rename_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        old_name: &str,
        new_name: &str,
    ) -> Result<Team, AppError> {
        self.write(tx, |t| {
            let id = t.team_id_by_name(old_name)?;
            if t.teams.values().any(|team| team.name == new_name && team.id != id) {
                return Err(AppError::team_exists(new_name));
            }
            let team = t
                .teams
                .get_mut(&id)
                .ok_or_else(|| AppError::not_found_with_id("Team", old_name))?;
            team.name = new_name.to_string();
            Ok(team.clone())
        })
        .await
    }

    async fn deactivate_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        name: &str,
    ) -> Result<Team, AppError> {
        self.write(tx, |t| {
            let id = t.team_id_by_name(name)?;
            let team = t
                .teams
                .get_mut(&id)
                .ok_or_else(|| AppError::not_found_with_id("Team", name))?;
            team.is_active = false;
            Ok(team.clone())
        })
        .await
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create_user(&self, tx: Option<&mut InMemoryTx>, user: &User) -> Result<User, AppError> {
        self.write(tx, |t| {
            if t.users.contains_key(&user.id) {
                return Err(AppError::validation_field(
                    format!("user '{}' already exists", user.id),
                    "user_id",
                ));
            }
            if t.username_taken(&user.username, &user.id) {
                return Err(AppError::validation_field(
                    format!("username '{}' is taken", user.username),
                    "username",
                ));
            }
            t.team(user.team_id)?;
            let stored = User {
                team_name: String::new(),
                ..user.clone()
            };
            t.users.insert(stored.id.clone(), stored);
            t.user(&user.id)
        })
        .await
    }

    async fn get_user_by_id(&self, tx: Option<&mut InMemoryTx>, id: &str) -> Result<User, AppError> {
        self.read(tx, |t| t.user(id)).await
    }

    async fn list_users_by_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        team_id: i64,
    ) -> Result<Vec<User>, AppError> {
        self.read(tx, |t| {
            let mut members: Vec<User> = t
                .users
                .values()
                .filter(|u| u.team_id == team_id)
                .cloned()
                .collect();
            members.sort_by(|a, b| a.username.cmp(&b.username));
            Ok(members)
        })
        .await
    }

    async fn update_user(&self, tx: Option<&mut InMemoryTx>, user: &User) -> Result<User, AppError> {
        self.write(tx, |t| {
            if t.username_taken(&user.username, &user.id) {
                return Err(AppError::validation_field(
                    format!("username '{}' is taken", user.username),
                    "username",
                ));
            }
            t.team(user.team_id)?;
            let stored = t.user_mut(&user.id)?;
            stored.username = user.username.clone();
            stored.team_id = user.team_id;
            stored.is_active = user.is_active;
            t.user(&user.id)
        })
        .await
    }

    async fn set_user_active(
        &self,
        tx: Option<&mut InMemoryTx>,
        id: &str,
        is_active: bool,
    ) -> Result<User, AppError> {
        self.write(tx, |t| {
            t.user_mut(id)?.is_active = is_active;
            t.user(id)
        })
        .await
    }

    async fn move_user_to_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        id: &str,
        team_id: i64,
    ) -> Result<User, AppError> {
        self.write(tx, |t| {
            t.team(team_id)?;
            t.user_mut(id)?.team_id = team_id;
            t.user(id)
        })
        .await
    }

    async fn deactivate_users_by_team(
        &self,
        tx: Option<&mut InMemoryTx>,
        team_id: i64,
    ) -> Result<Vec<String>, AppError> {
        self.write(tx, |t| {
            let mut ids = Vec::new();
            for user in t.users.values_mut().filter(|u| u.team_id == team_id) {
                user.is_active = false;
                ids.push(user.id.clone());
            }
            ids.sort();
            Ok(ids)
        })
        .await
    }

    async fn find_candidates(
        &self,
        tx: Option<&mut InMemoryTx>,
        team_id: i64,
        author_id: &str,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<User>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let pool = self
            .read(tx, |t| {
                let mut pool: Vec<User> = t
                    .users
                    .values()
                    .filter(|u| u.team_id == team_id && u.is_active && u.id != author_id)
                    .filter(|u| !exclude.contains(&u.id))
                    .cloned()
                    .collect();
                pool.sort_by(|a, b| a.username.cmp(&b.username));
                pool
            })
            .await;
        Ok(self.selector.choose(pool, limit))
    }
}

#[async_trait]
impl PullRequestRepository for InMemoryStore {
    async fn create_pull_request(
        &self,
        tx: Option<&mut InMemoryTx>,
        pr: &PullRequest,
    ) -> Result<PullRequest, AppError> {
        self.write(tx, |t| {
            if t.pull_requests.contains_key(&pr.id) {
                return Err(AppError::pr_exists(&pr.id));
            }
            t.user(&pr.author_id)?;
            let stored = PullRequest {
                status: PrStatus::Open.to_string(),
                merged_at: None,
                reviewers: Vec::new(),
                ..pr.clone()
            };
            t.pull_requests.insert(stored.id.clone(), stored.clone());
            Ok(stored)
        })
        .await
    }

    async fn get_pull_request(
        &self,
        tx: Option<&mut InMemoryTx>,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        self.read(tx, |t| t.pull_request(id)).await
    }

    async fn lock_pull_request(
        &self,
        tx: &mut InMemoryTx,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        // The transaction already holds the writer lock.
        tx.staged.pull_request(id)
    }

    async fn merge_pull_request(
        &self,
        tx: Option<&mut InMemoryTx>,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        self.write(tx, |t| {
            let pr = t
                .pull_requests
                .get_mut(id)
                .ok_or_else(|| AppError::not_found_with_id("PullRequest", id))?;
            pr.status = PrStatus::Merged.to_string();
            pr.merged_at = pr.merged_at.or_else(|| Some(models::unix_now()));
            Ok(pr.clone())
        })
        .await
    }

    async fn list_reviewers(
        &self,
        tx: Option<&mut InMemoryTx>,
        pr_id: &str,
    ) -> Result<Vec<Reviewer>, AppError> {
        self.read(tx, |t| Ok(t.reviewers(pr_id))).await
    }

    async fn remove_reviewer(
        &self,
        tx: Option<&mut InMemoryTx>,
        pr_id: &str,
        user_id: &str,
    ) -> Result<(), AppError> {
        self.write(tx, |t| {
            t.assignments
                .remove(&(pr_id.to_string(), user_id.to_string()));
            Ok(())
        })
        .await
    }

    async fn add_reviewers(
        &self,
        tx: Option<&mut InMemoryTx>,
        pr_id: &str,
        user_ids: &[String],
    ) -> Result<(), AppError> {
        self.write(tx, |t| {
            t.pull_request(pr_id)?;
            let mut rows = BTreeSet::new();
            for user_id in user_ids {
                t.user(user_id)?;
                let row = (pr_id.to_string(), user_id.clone());
                if t.assignments.contains(&row) || !rows.insert(row) {
                    return Err(AppError::database_with_op(
                        format!("duplicate review assignment ({}, {})", pr_id, user_id),
                        "add_reviewers",
                    ));
                }
            }
            t.assignments.extend(rows);
            Ok(())
        })
        .await
    }

    async fn list_open_prs_by_reviewer(
        &self,
        tx: Option<&mut InMemoryTx>,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.read(tx, |t| Ok(t.prs_reviewed_by(user_id, true))).await
    }

    async fn list_prs_by_reviewer(
        &self,
        tx: Option<&mut InMemoryTx>,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.read(tx, |t| Ok(t.prs_reviewed_by(user_id, false))).await
    }

    async fn list_open_prs_without_reviewers(
        &self,
        tx: Option<&mut InMemoryTx>,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.read(tx, |t| {
            let mut prs: Vec<PullRequest> = t
                .pull_requests
                .values()
                .filter(|pr| pr.is_open())
                .filter(|pr| !t.assignments.iter().any(|(id, _)| *id == pr.id))
                .cloned()
                .collect();
            sort_prs(&mut prs);
            Ok(prs)
        })
        .await
    }
}

#[async_trait]
impl StatsRepository for InMemoryStore {
    async fn review_stats(&self) -> Result<Vec<ReviewStat>, AppError> {
        let tables = self.committed.read().await;
        let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
        for (_, user_id) in &tables.assignments {
            *counts.entry(user_id.as_str()).or_default() += 1;
        }
        let mut stats: Vec<ReviewStat> = counts
            .into_iter()
            .map(|(user_id, review_count)| ReviewStat {
                user_id: user_id.to_string(),
                review_count,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.review_count
                .cmp(&a.review_count)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(stats)
    }

    async fn count_team_reviews(&self, team_id: i64, status: PrStatus) -> Result<i64, AppError> {
        let tables = self.committed.read().await;
        Ok(tables.count_reviews(status, |u| u.team_id == team_id))
    }

    async fn count_user_reviews(&self, user_id: &str, status: PrStatus) -> Result<i64, AppError> {
        let tables = self.committed.read().await;
        Ok(tables.count_reviews(status, |u| u.id == user_id))
    }
}
