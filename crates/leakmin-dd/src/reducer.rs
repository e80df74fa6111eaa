//! The two-method reducer capability and its top-level entry point.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ddmin::{CandidateTest, DdConfig, DdStats, DeltaDebugger};
use crate::error::{BoxError, DdError};
use crate::verdict::{index_tokens, IndexedToken, Verdict};

/// A concrete reducer: how to join tokens back into text, and how to judge
/// the joined text.
#[async_trait]
pub trait TokenReducer: Send + Sync {
    type Token: Clone + Send + Sync;

    fn join_tokens(&self, tokens: &[Self::Token]) -> String;

    /// True when the property of interest is still present in `joined`.
    async fn test_joined(&self, joined: &str) -> Result<bool, BoxError>;
}

/// Adapts a [`TokenReducer`] to the search's candidate test.
struct JoinedTest<'r, R: ?Sized> {
    reducer: &'r R,
}

#[async_trait]
impl<'r, R> CandidateTest<R::Token> for JoinedTest<'r, R>
where
    R: TokenReducer + ?Sized,
{
    async fn test(&mut self, candidate: &[IndexedToken<R::Token>]) -> Result<Verdict, BoxError> {
        let tokens: Vec<R::Token> = candidate.iter().map(|t| t.token.clone()).collect();
        let joined = self.reducer.join_tokens(&tokens);
        let holds = self.reducer.test_joined(&joined).await?;
        Ok(Verdict::from_property(holds))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceOptions {
    /// Bypass the empty/original boundary checks.
    pub skip_checks: bool,
    /// Whole-search restarts after a precondition violation (only with `skip_checks`).
    pub max_retries: usize,
    pub dd: DdConfig,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            skip_checks: false,
            max_retries: 5,
            dd: DdConfig::default(),
        }
    }
}

impl ReduceOptions {
    pub fn skipping_checks(mut self, max_retries: usize) -> Self {
        self.skip_checks = true;
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Reduction {
    pub text: String,
    pub stats: DdStats,
    /// Number of times the search was restarted from scratch.
    pub restarts: usize,
}

/// Reduce `tokens` with `reducer`.
///
/// Runs the boundary checks unless `options.skip_checks`, then the search.
/// A precondition violation raised with checks skipped restarts the whole
/// search, at most `options.max_retries` times.
pub async fn reduce_tokens<R>(
    reducer: &R,
    tokens: Vec<R::Token>,
    options: &ReduceOptions,
) -> Result<Reduction, DdError>
where
    R: TokenReducer + ?Sized,
{
    let dd = DeltaDebugger::new(
        options
            .dd
            .clone()
            .with_boundary_checks(!options.skip_checks),
    );

    let mut restarts = 0;
    loop {
        let mut test = JoinedTest { reducer };
        match dd.minimize(index_tokens(tokens.iter().cloned()), &mut test).await {
            Ok(minimized) => {
                let text = reducer.join_tokens(&minimized.payloads());
                info!(
                    original_tokens = tokens.len(),
                    reduced_tokens = minimized.tokens.len(),
                    restarts,
                    "token reduction finished"
                );
                return Ok(Reduction {
                    text,
                    stats: minimized.stats,
                    restarts,
                });
            }
            Err(err)
                if err.is_precondition()
                    && options.skip_checks
                    && restarts < options.max_retries =>
            {
                restarts += 1;
                warn!(error = %err, restart = restarts, "restarting reduction from scratch");
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports PASS on exactly one call, the `flip_at`-th.
    struct FlakyOnce {
        calls: AtomicUsize,
        flip_at: usize,
    }

    #[async_trait]
    impl TokenReducer for FlakyOnce {
        type Token = char;

        fn join_tokens(&self, tokens: &[char]) -> String {
            tokens.iter().collect()
        }

        async fn test_joined(&self, joined: &str) -> Result<bool, BoxError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.flip_at {
                return Ok(false);
            }
            Ok(joined.contains("rl"))
        }
    }

    #[tokio::test]
    async fn test_flip_on_entry_probe_accepts_empty() {
        let reducer = FlakyOnce {
            calls: AtomicUsize::new(0),
            flip_at: 0,
        };
        let options = ReduceOptions::default().skipping_checks(2);
        let chars: Vec<char> = "hello world".chars().collect();
        // The entry probe flips, leaving nothing to retain; no restart needed.
        let reduction = reduce_tokens(&reducer, chars, &options).await.unwrap();
        assert_eq!(reduction.text, "");
        assert!(reduction.stats.accepted_empty);
    }

    #[tokio::test]
    async fn test_flake_during_verification_restarts() {
        let reducer = FlakyOnce {
            calls: AtomicUsize::new(0),
            flip_at: usize::MAX,
        };
        let options = ReduceOptions::default().skipping_checks(2);
        let chars: Vec<char> = "hello world".chars().collect();
        let baseline = reduce_tokens(&reducer, chars.clone(), &options).await.unwrap();
        let calls_per_search = reducer.calls.load(Ordering::SeqCst);

        // The last call of a search is the final verification.
        let flaky = FlakyOnce {
            calls: AtomicUsize::new(0),
            flip_at: calls_per_search - 1,
        };
        let reduction = reduce_tokens(&flaky, chars, &options).await.unwrap();
        assert_eq!(reduction.restarts, 1);
        assert_eq!(reduction.text, baseline.text);
    }

    #[tokio::test]
    async fn test_flake_is_fatal_with_checks_enabled() {
        let reducer = FlakyOnce {
            calls: AtomicUsize::new(0),
            flip_at: 1,
        };
        let chars: Vec<char> = "hello world".chars().collect();
        let err = reduce_tokens(&reducer, chars, &ReduceOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_precondition());
    }
}
