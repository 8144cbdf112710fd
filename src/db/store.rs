//! SQLite implementation of the data-access contract.
//!
//! Every method resolves its executor from the optional transaction: the
//! transaction's connection when one is open, a pooled connection otherwise.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::pool::DbPool;
use crate::error::AppError;
use crate::models::{self, PrStatus, PullRequest, ReviewStat, Reviewer, Team, User};
use crate::repository::selection::{RandomSelector, ReviewerSelector};
use crate::repository::{
    PullRequestRepository, StatsRepository, TeamRepository, Transactor, UserRepository,
};

/// Open unit of work on a `SqliteStore`.
pub type SqliteTx = Transaction<'static, Sqlite>;

const USER_COLUMNS: &str = "id, username, team_id, is_active";
const PR_COLUMNS: &str = "id, name, author_id, status, created_at, merged_at";

/// Connection a single repository call runs on.
enum Conn<'a> {
    Tx(&'a mut SqliteConnection),
    Pooled(PoolConnection<Sqlite>),
}

impl Deref for Conn<'_> {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match self {
            Conn::Tx(conn) => &**conn,
            Conn::Pooled(conn) => &**conn,
        }
    }
}

impl DerefMut for Conn<'_> {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match self {
            Conn::Tx(conn) => &mut **conn,
            Conn::Pooled(conn) => &mut **conn,
        }
    }
}

/// Map a constraint violation to a domain error, anything else to `Database`.
fn classify(
    err: sqlx::Error,
    on_unique: impl FnOnce() -> AppError,
    on_foreign_key: impl FnOnce() -> AppError,
) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return on_unique();
        }
        if db_err.is_foreign_key_violation() {
            return on_foreign_key();
        }
    }
    AppError::from(err)
}

/// SQLite-backed store.
pub struct SqliteStore {
    pool: DbPool,
    selector: Arc<dyn ReviewerSelector>,
}

impl SqliteStore {
    /// Store with an entropy-seeded reviewer draw.
    pub fn new(pool: DbPool) -> Self {
        Self::with_selector(pool, Arc::new(RandomSelector::from_entropy()))
    }

    pub fn with_selector(pool: DbPool, selector: Arc<dyn ReviewerSelector>) -> Self {
        Self { pool, selector }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn conn<'a>(&self, tx: Option<&'a mut SqliteTx>) -> Result<Conn<'a>, AppError> {
        Ok(match tx {
            Some(tx) => Conn::Tx(&mut **tx),
            None => Conn::Pooled(self.pool.acquire().await?),
        })
    }

    async fn fetch_prs(
        &self,
        tx: Option<&mut SqliteTx>,
        sql: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<PullRequest>, AppError> {
        let mut conn = self.conn(tx).await?;
        let mut query = sqlx::query_as::<_, PullRequest>(sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id.to_string());
        }
        Ok(query.fetch_all(&mut *conn).await?)
    }
}

#[async_trait]
impl Transactor for SqliteStore {
    type Tx = SqliteTx;

    async fn begin(&self) -> Result<SqliteTx, AppError> {
        let mut tx = self.pool.begin().await?;
        // Take the write lock now, like BEGIN IMMEDIATE. A deferred
        // transaction that reads first fails with SQLITE_BUSY on upgrade
        // instead of waiting on busy_timeout.
        sqlx::query("UPDATE teams SET is_active = is_active WHERE 0")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database_with_op(e.to_string(), "begin"))?;
        Ok(tx)
    }

    async fn commit(&self, tx: SqliteTx) -> Result<(), AppError> {
        tx.commit()
            .await
            .map_err(|e| AppError::database_with_op(e.to_string(), "commit"))
    }

    async fn rollback(&self, tx: SqliteTx) -> Result<(), AppError> {
        tx.rollback()
            .await
            .map_err(|e| AppError::database_with_op(e.to_string(), "rollback"))
    }
}

#[async_trait]
impl TeamRepository for SqliteStore {
    async fn create_team(&self, tx: Option<&mut SqliteTx>, name: &str) -> Result<Team, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, Team>(
            "INSERT INTO teams (name, is_active) VALUES (?, 1) RETURNING id, name, is_active",
        )
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            classify(e, || AppError::team_exists(name), || {
                AppError::internal("unexpected foreign key on teams")
            })
        })
    }

    async fn get_team_by_name(
        &self,
        tx: Option<&mut SqliteTx>,
        name: &str,
    ) -> Result<Team, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, Team>("SELECT id, name, is_active FROM teams WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("Team", name))
    }

    async fn get_team_by_id(&self, tx: Option<&mut SqliteTx>, id: i64) -> Result<Team, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, Team>("SELECT id, name, is_active FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("Team", id.to_string()))
    }

    async fn rename_team(
        &self,
        tx: Option<&mut SqliteTx>,
        old_name: &str,
        new_name: &str,
    ) -> Result<Team, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, Team>(
            "UPDATE teams SET name = ? WHERE name = ? RETURNING id, name, is_active",
        )
        .bind(new_name)
        .bind(old_name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            classify(e, || AppError::team_exists(new_name), || {
                AppError::internal("unexpected foreign key on teams")
            })
        })?
        .ok_or_else(|| AppError::not_found_with_id("Team", old_name))
    }

    async fn deactivate_team(
        &self,
        tx: Option<&mut SqliteTx>,
        name: &str,
    ) -> Result<Team, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, Team>(
            "UPDATE teams SET is_active = 0 WHERE name = ? RETURNING id, name, is_active",
        )
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("Team", name))
    }
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn create_user(&self, tx: Option<&mut SqliteTx>, user: &User) -> Result<User, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, username, team_id, is_active) VALUES (?, ?, ?, ?) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.id)
        .bind(&user.username)
        .bind(user.team_id)
        .bind(user.is_active)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            classify(
                e,
                || {
                    AppError::validation_field(
                        format!("user '{}' already exists", user.username),
                        "username",
                    )
                },
                || AppError::not_found_with_id("Team", user.team_id.to_string()),
            )
        })
    }

    async fn get_user_by_id(&self, tx: Option<&mut SqliteTx>, id: &str) -> Result<User, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.team_id, u.is_active, t.name AS team_name
            FROM users u
            JOIN teams t ON t.id = u.team_id
            WHERE u.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("User", id))
    }

    async fn list_users_by_team(
        &self,
        tx: Option<&mut SqliteTx>,
        team_id: i64,
    ) -> Result<Vec<User>, AppError> {
        let mut conn = self.conn(tx).await?;
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE team_id = ? ORDER BY username",
            USER_COLUMNS
        ))
        .bind(team_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(users)
    }

    async fn update_user(&self, tx: Option<&mut SqliteTx>, user: &User) -> Result<User, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET username = ?, team_id = ?, is_active = ? WHERE id = ? RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.username)
        .bind(user.team_id)
        .bind(user.is_active)
        .bind(&user.id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            classify(
                e,
                || {
                    AppError::validation_field(
                        format!("username '{}' is taken", user.username),
                        "username",
                    )
                },
                || AppError::not_found_with_id("Team", user.team_id.to_string()),
            )
        })?
        .ok_or_else(|| AppError::not_found_with_id("User", &user.id))
    }

    async fn set_user_active(
        &self,
        tx: Option<&mut SqliteTx>,
        id: &str,
        is_active: bool,
    ) -> Result<User, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET is_active = ? WHERE id = ? RETURNING {}",
            USER_COLUMNS
        ))
        .bind(is_active)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("User", id))
    }

    async fn move_user_to_team(
        &self,
        tx: Option<&mut SqliteTx>,
        id: &str,
        team_id: i64,
    ) -> Result<User, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET team_id = ? WHERE id = ? RETURNING {}",
            USER_COLUMNS
        ))
        .bind(team_id)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            classify(
                e,
                || AppError::internal("unexpected unique violation on users.team_id"),
                || AppError::not_found_with_id("Team", team_id.to_string()),
            )
        })?
        .ok_or_else(|| AppError::not_found_with_id("User", id))
    }

    async fn deactivate_users_by_team(
        &self,
        tx: Option<&mut SqliteTx>,
        team_id: i64,
    ) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn(tx).await?;
        let mut ids: Vec<String> =
            sqlx::query_scalar("UPDATE users SET is_active = 0 WHERE team_id = ? RETURNING id")
                .bind(team_id)
                .fetch_all(&mut *conn)
                .await?;
        ids.sort();

        Ok(ids)
    }

    async fn find_candidates(
        &self,
        tx: Option<&mut SqliteTx>,
        team_id: i64,
        author_id: &str,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<User>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn(tx).await?;
        let pool: Vec<User> = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {}
            FROM users
            WHERE team_id = ? AND is_active = 1 AND id != ?
            ORDER BY username
            "#,
            USER_COLUMNS
        ))
        .bind(team_id)
        .bind(author_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .filter(|u| !exclude.contains(&u.id))
        .collect();

        Ok(self.selector.choose(pool, limit))
    }
}

#[async_trait]
impl PullRequestRepository for SqliteStore {
    async fn create_pull_request(
        &self,
        tx: Option<&mut SqliteTx>,
        pr: &PullRequest,
    ) -> Result<PullRequest, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, PullRequest>(&format!(
            r#"
            INSERT INTO pull_requests (id, name, author_id, status, created_at)
            VALUES (?, ?, ?, 'OPEN', ?)
            RETURNING {}
            "#,
            PR_COLUMNS
        ))
        .bind(&pr.id)
        .bind(&pr.name)
        .bind(&pr.author_id)
        .bind(pr.created_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            classify(
                e,
                || AppError::pr_exists(&pr.id),
                || AppError::not_found_with_id("User", &pr.author_id),
            )
        })
    }

    async fn get_pull_request(
        &self,
        tx: Option<&mut SqliteTx>,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, PullRequest>(&format!(
            "SELECT {} FROM pull_requests WHERE id = ?",
            PR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("PullRequest", id))
    }

    async fn lock_pull_request(
        &self,
        tx: &mut SqliteTx,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        // The transaction holds the database write lock from `begin`, so the
        // row read here cannot change until commit.
        sqlx::query_as::<_, PullRequest>(&format!(
            "UPDATE pull_requests SET status = status WHERE id = ? RETURNING {}",
            PR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::database_with_op(e.to_string(), "lock_pull_request"))?
        .ok_or_else(|| AppError::not_found_with_id("PullRequest", id))
    }

    async fn merge_pull_request(
        &self,
        tx: Option<&mut SqliteTx>,
        id: &str,
    ) -> Result<PullRequest, AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query_as::<_, PullRequest>(&format!(
            r#"
            UPDATE pull_requests
            SET status = 'MERGED', merged_at = COALESCE(merged_at, ?)
            WHERE id = ?
            RETURNING {}
            "#,
            PR_COLUMNS
        ))
        .bind(models::unix_now())
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("PullRequest", id))
    }

    async fn list_reviewers(
        &self,
        tx: Option<&mut SqliteTx>,
        pr_id: &str,
    ) -> Result<Vec<Reviewer>, AppError> {
        let mut conn = self.conn(tx).await?;
        let reviewers = sqlx::query_as::<_, Reviewer>(
            r#"
            SELECT u.id AS user_id, u.username
            FROM review_assignments ra
            JOIN users u ON u.id = ra.user_id
            WHERE ra.pr_id = ?
            ORDER BY u.username
            "#,
        )
        .bind(pr_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(reviewers)
    }

    async fn remove_reviewer(
        &self,
        tx: Option<&mut SqliteTx>,
        pr_id: &str,
        user_id: &str,
    ) -> Result<(), AppError> {
        let mut conn = self.conn(tx).await?;
        sqlx::query("DELETE FROM review_assignments WHERE pr_id = ? AND user_id = ?")
            .bind(pr_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn add_reviewers(
        &self,
        tx: Option<&mut SqliteTx>,
        pr_id: &str,
        user_ids: &[String],
    ) -> Result<(), AppError> {
        let mut conn = self.conn(tx).await?;
        for user_id in user_ids {
            sqlx::query("INSERT INTO review_assignments (pr_id, user_id) VALUES (?, ?)")
                .bind(pr_id)
                .bind(user_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    classify(
                        e,
                        || {
                            AppError::database_with_op(
                                format!("duplicate review assignment ({}, {})", pr_id, user_id),
                                "add_reviewers",
                            )
                        },
                        || AppError::not_found_with_id("User", user_id),
                    )
                })?;
        }

        Ok(())
    }

    async fn list_open_prs_by_reviewer(
        &self,
        tx: Option<&mut SqliteTx>,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.fetch_prs(
            tx,
            r#"
            SELECT pr.id, pr.name, pr.author_id, pr.status, pr.created_at, pr.merged_at
            FROM pull_requests pr
            JOIN review_assignments ra ON ra.pr_id = pr.id
            WHERE ra.user_id = ? AND pr.status = 'OPEN'
            ORDER BY pr.created_at, pr.id
            "#,
            Some(user_id),
        )
        .await
    }

    async fn list_prs_by_reviewer(
        &self,
        tx: Option<&mut SqliteTx>,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.fetch_prs(
            tx,
            r#"
            SELECT pr.id, pr.name, pr.author_id, pr.status, pr.created_at, pr.merged_at
            FROM pull_requests pr
            JOIN review_assignments ra ON ra.pr_id = pr.id
            WHERE ra.user_id = ?
            ORDER BY pr.created_at, pr.id
            "#,
            Some(user_id),
        )
        .await
    }

    async fn list_open_prs_without_reviewers(
        &self,
        tx: Option<&mut SqliteTx>,
    ) -> Result<Vec<PullRequest>, AppError> {
        self.fetch_prs(
            tx,
            r#"
            SELECT pr.id, pr.name, pr.author_id, pr.status, pr.created_at, pr.merged_at
            FROM pull_requests pr
            WHERE pr.status = 'OPEN'
              AND NOT EXISTS (SELECT 1 FROM review_assignments ra WHERE ra.pr_id = pr.id)
            ORDER BY pr.created_at, pr.id
            "#,
            None,
        )
        .await
    }
}

#[async_trait]
impl StatsRepository for SqliteStore {
    async fn review_stats(&self) -> Result<Vec<ReviewStat>, AppError> {
        let stats = sqlx::query_as::<_, ReviewStat>(
            r#"
            SELECT user_id, COUNT(*) AS review_count
            FROM review_assignments
            GROUP BY user_id
            ORDER BY review_count DESC, user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn count_team_reviews(&self, team_id: i64, status: PrStatus) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM review_assignments ra
            JOIN pull_requests pr ON pr.id = ra.pr_id
            JOIN users u ON u.id = ra.user_id
            WHERE u.team_id = ? AND pr.status = ?
            "#,
        )
        .bind(team_id)
        .bind(status.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_user_reviews(&self, user_id: &str, status: PrStatus) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM review_assignments ra
            JOIN pull_requests pr ON pr.id = ra.pr_id
            WHERE ra.user_id = ? AND pr.status = ?
            "#,
        )
        .bind(user_id)
        .bind(status.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
