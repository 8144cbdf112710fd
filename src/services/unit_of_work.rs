//! Commit/rollback and deadline helpers shared by every service.
//!
//! A service opens a transaction, runs its `*_in_tx` body against it and
//! hands the outcome to [`finish`]. The whole sequence runs under
//! [`with_deadline`]; if the deadline fires, the future and the transaction
//! it owns are dropped, which discards every write.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::repository::Transactor;

/// Commit on success, roll back on failure.
///
/// A failed rollback is logged and the original error is returned.
pub(crate) async fn finish<S, T>(
    store: &S,
    tx: S::Tx,
    result: Result<T, AppError>,
    operation: &str,
) -> Result<T, AppError>
where
    S: Transactor + ?Sized,
{
    match result {
        Ok(value) => {
            store.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            log::debug!("[uow] Rolling back {}: {}", operation, err);
            if let Err(rollback_err) = store.rollback(tx).await {
                log::error!(
                    "[uow] Failed to roll back {}: {}",
                    operation,
                    rollback_err
                );
            }
            Err(err)
        }
    }
}

/// Run `fut` with a deadline, failing with `AppError::Timeout` when it expires.
pub(crate) async fn with_deadline<T, F>(
    timeout: Duration,
    operation: &str,
    fut: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!(
                "[uow] {} exceeded {:?}, rolled back",
                operation,
                timeout
            );
            Err(AppError::timeout(operation))
        }
    }
}
