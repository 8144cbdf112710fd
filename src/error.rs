//! Domain error types for the reviewer engine.
//!
//! These errors are serializable so a transport adapter can hand them to
//! clients as-is, and each variant carries a stable machine code.

use serde::Serialize;
use thiserror::Error;

/// Errors returned by repositories and services.
///
/// All variants serialize to a structured JSON object.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Requested team, user or pull request does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Invalid input or a precondition on activeness/capacity failed.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// A team with this name already exists.
    #[error("Team already exists: {team_name}")]
    TeamExists { team_name: String },

    /// A pull request with this ID already exists.
    #[error("Pull request already exists: {pr_id}")]
    PrExists { pr_id: String },

    /// Mutation attempted on a merged pull request.
    #[error("Operation not allowed on merged pull request {pr_id}")]
    PrMerged { pr_id: String },

    /// The user is not a current reviewer of the pull request.
    #[error("User {user_id} is not assigned to pull request {pr_id}")]
    NotAssigned { pr_id: String, user_id: String },

    /// No eligible replacement reviewer was found.
    #[error("No suitable candidate found for pull request {pr_id}")]
    NoCandidate { pr_id: String },

    /// Storage operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Operation did not finish before its deadline and was rolled back.
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field name.
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn team_exists(team_name: impl Into<String>) -> Self {
        Self::TeamExists {
            team_name: team_name.into(),
        }
    }

    pub fn pr_exists(pr_id: impl Into<String>) -> Self {
        Self::PrExists {
            pr_id: pr_id.into(),
        }
    }

    pub fn pr_merged(pr_id: impl Into<String>) -> Self {
        Self::PrMerged {
            pr_id: pr_id.into(),
        }
    }

    pub fn not_assigned(pr_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::NotAssigned {
            pr_id: pr_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn no_candidate(pr_id: impl Into<String>) -> Self {
        Self::NoCandidate {
            pr_id: pr_id.into(),
        }
    }

    /// Create a database error with optional operation context.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::TeamExists { .. } => "TEAM_EXISTS",
            Self::PrExists { .. } => "PR_EXISTS",
            Self::PrMerged { .. } => "PR_MERGED",
            Self::NotAssigned { .. } => "NOT_ASSIGNED",
            Self::NoCandidate { .. } => "NO_CANDIDATE",
            Self::Database { .. } | Self::Timeout { .. } | Self::Internal { .. } => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Whether the error reports a conflict with current state rather than
    /// bad input or a storage failure.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::TeamExists { .. }
                | Self::PrExists { .. }
                | Self::PrMerged { .. }
                | Self::NotAssigned { .. }
                | Self::NoCandidate { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = AppError::pr_merged("pr-1");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"PrMerged\""));
        assert!(json.contains("pr-1"));
    }

    #[test]
    fn test_not_found_with_id() {
        let err = AppError::not_found_with_id("User", "u-42");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"resource\":\"User\""));
        assert!(json.contains("\"id\":\"u-42\""));
    }

    #[test]
    fn test_optional_fields_not_serialized() {
        let err = AppError::validation("name is required");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("field"));
    }

    #[test]
    fn test_codes() {
        assert_eq!(AppError::not_found("Team").code(), "NOT_FOUND");
        assert_eq!(AppError::team_exists("core").code(), "TEAM_EXISTS");
        assert_eq!(AppError::no_candidate("pr").code(), "NO_CANDIDATE");
        assert_eq!(AppError::timeout("merge_pr").code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_conflict_grouping() {
        assert!(AppError::not_assigned("pr", "u").is_conflict());
        assert!(AppError::pr_exists("pr").is_conflict());
        assert!(!AppError::validation("bad").is_conflict());
        assert!(!AppError::database("locked").is_conflict());
    }

    #[test]
    fn test_display_impl() {
        let err = AppError::not_assigned("pr-7", "u-3");
        assert_eq!(
            format!("{}", err),
            "User u-3 is not assigned to pull request pr-7"
        );
    }
}
