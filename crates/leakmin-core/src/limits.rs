//! Bounded retries and batch stop conditions.

use std::fmt::Display;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::timing::{TaskContext, TimingEvent};

/// Why a batch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Every input was visited.
    Complete,
    /// The stop sentinel appeared; the remaining inputs were not started.
    StopRequested,
}

impl StopReason {
    /// Process exit status the binary reports for this reason.
    pub fn exit_code(self) -> i32 {
        match self {
            StopReason::Complete => 0,
            StopReason::StopRequested => 12,
        }
    }
}

/// A stage failed on every allowed attempt.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed after {attempts} attempt(s): {last}")]
pub struct RetryExhausted<E: std::error::Error + 'static> {
    pub stage: String,
    pub attempts: usize,
    #[source]
    pub last: E,
}

/// Run `stage_fn` until it succeeds, at most `retries + 1` times.
///
/// Each failure is recorded as `<stage> failed at attempt <i>` (attempts
/// count from 0). The attempt number is passed to `stage_fn`.
pub async fn retry_bounded<T, E, F, Fut>(
    ctx: &TaskContext,
    stage: &str,
    retries: usize,
    mut stage_fn: F,
) -> Result<T, RetryExhausted<E>>
where
    E: std::error::Error + Display + 'static,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match stage_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(task = %ctx.task(), stage, attempt, error = %err, "stage attempt failed");
                ctx.record(TimingEvent::AttemptFailed {
                    stage: stage.to_string(),
                    attempt,
                });
                if attempt >= retries {
                    return Err(RetryExhausted {
                        stage: stage.to_string(),
                        attempts: attempt + 1,
                        last: err,
                    });
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::TimingLog;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("boom {0}")]
    struct Boom(usize);

    #[test]
    fn test_stop_reason_exit_codes() {
        assert_eq!(StopReason::Complete.exit_code(), 0);
        assert_eq!(StopReason::StopRequested.exit_code(), 12);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let log = Arc::new(TimingLog::new());
        let ctx = log.task("A.java");
        let value = retry_bounded(&ctx, "structural", 5, |attempt| async move {
            if attempt < 2 {
                Err(Boom(attempt))
            } else {
                Ok(attempt * 10)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 20);
        assert_eq!(
            log.labels("A.java"),
            vec!["structural failed at attempt 0", "structural failed at attempt 1"]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_last_error() {
        let log = Arc::new(TimingLog::new());
        let ctx = log.task("A.java");
        let err = retry_bounded(&ctx, "reduction", 2, |attempt| async move {
            Err::<(), _>(Boom(attempt))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last.0, 2);
        assert_eq!(log.labels("A.java").len(), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_is_one_attempt() {
        let log = Arc::new(TimingLog::new());
        let ctx = log.task("A.java");
        let err = retry_bounded(&ctx, "reduction", 0, |attempt| async move {
            Err::<(), _>(Boom(attempt))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(err.to_string().starts_with("reduction failed after 1 attempt(s)"));
    }
}
