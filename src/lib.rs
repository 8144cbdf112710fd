//! PR Reviewer - reviewer assignment and rebalancing for team pull requests.
//!
//! Teams own users, users author and review pull requests. The services in
//! this crate pick reviewers when a PR is opened and keep every open PR's
//! reviewer set valid as users and teams are deactivated.
//!
//! Storage sits behind the traits in [`repository`], with a SQLite
//! implementation in [`db`] and an in-memory one for tests.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::EngineConfig;
pub use db::SqliteStore;
pub use error::AppError;
pub use repository::{InMemoryStore, Store};
pub use services::Services;
