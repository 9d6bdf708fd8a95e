//! Deadline guard for in-flight async operations.

use std::future::Future;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Race `task` against `limit`.
///
/// Returns the task's own result when it finishes first, otherwise
/// `EngineError::Timeout(message)`. The losing side is dropped: on timeout the
/// task future is abandoned (callers issue their own remote abort), on
/// success the deadline timer goes away with the `Timeout` future.
pub async fn with_timeout<F, T>(task: F, limit: Duration, message: impl Into<String>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, task).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(message.into())),
    }
}
