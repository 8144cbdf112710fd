//! Business logic services.
//!
//! The assignment engine decides reviewers; the lifecycle services wrap each
//! top-level operation in one unit of work and trigger the engine. Services
//! are generic over the store so they run unchanged on SQLite and in memory.

pub mod assignment;
pub mod pull_requests;
pub mod stats;
pub mod teams;
pub mod unit_of_work;
pub mod users;

pub use assignment::AssignmentEngine;
pub use pull_requests::{PullRequestService, Reassignment};
pub use stats::StatsService;
pub use teams::{TeamDeactivation, TeamService};
pub use users::UserService;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::repository::Store;

/// All services wired to one store.
pub struct Services<S> {
    pub pull_requests: PullRequestService<S>,
    pub teams: TeamService<S>,
    pub users: UserService<S>,
    pub stats: StatsService<S>,
}

impl<S: Store> Services<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        let timeout = config.operation_timeout();
        let engine = AssignmentEngine::new(Arc::clone(&store));

        Self {
            pull_requests: PullRequestService::new(Arc::clone(&store), engine.clone(), timeout),
            teams: TeamService::new(Arc::clone(&store), engine.clone(), timeout),
            users: UserService::new(Arc::clone(&store), engine, timeout),
            stats: StatsService::new(store),
        }
    }
}
