//! Token-level reduction against the oracle.
//!
//! The property under study is "the oracle still infers every import it
//! inferred from the unreduced snippet".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leakmin_dd::{reduce_tokens, BoxError, DdConfig, DdError, DdStats, ReduceOptions, TokenReducer};
use leakmin_oracle::imports::imports_recovered;
use leakmin_oracle::{check_round_trip, Backend, Oracle, OracleError, Tokenizer, TokenizerError};
use tracing::{debug, info};

use crate::config::StageConfig;
use crate::timeout::BaselineProbe;

#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),

    #[error("baseline measurement failed: {0}")]
    Baseline(#[source] OracleError),

    #[error(transparent)]
    Search(#[from] DdError),
}

/// Ask `oracle` for imports and check that all of `expected` come back.
///
/// A timed-out call counts as an empty response. `repeat` extra attempts
/// are made while the check fails.
pub async fn check_expected_imports(
    oracle: &dyn Oracle,
    source: &str,
    expected: &[String],
    timeout: Option<Duration>,
    repeat: u32,
) -> Result<bool, OracleError> {
    for attempt in 0..=repeat {
        let response = match oracle.infer(source, timeout).await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                debug!(attempt, "oracle call timed out, reading as empty response");
                String::new()
            }
            Err(err) => return Err(err),
        };
        if imports_recovered(expected, &response) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Joins token ids with the backend tokenizer and judges the text with the
/// oracle under a fixed per-call timeout.
pub struct ImportProperty {
    oracle: Arc<dyn Oracle>,
    tokenizer: Arc<dyn Tokenizer>,
    expected: Vec<String>,
    timeout: Duration,
    repeat: u32,
}

#[async_trait]
impl TokenReducer for ImportProperty {
    type Token = u32;

    fn join_tokens(&self, tokens: &[u32]) -> String {
        self.tokenizer.decode(tokens)
    }

    async fn test_joined(&self, joined: &str) -> Result<bool, BoxError> {
        let holds = check_expected_imports(
            self.oracle.as_ref(),
            joined,
            &self.expected,
            Some(self.timeout),
            self.repeat,
        )
        .await?;
        Ok(holds)
    }
}

/// Result of one token-level reduction.
#[derive(Debug, Clone)]
pub struct TokenReduction {
    pub reduced: String,
    /// The names the oracle inferred from the stage input.
    pub baseline_imports: Vec<String>,
    pub timeout: Duration,
    pub stats: DdStats,
}

/// The oracle-bound reducer.
pub struct LlmReducer {
    backend: Backend,
    probe: BaselineProbe,
    options: ReduceOptions,
    repeat: u32,
}

impl LlmReducer {
    pub fn new(backend: Backend, stages: &StageConfig) -> Self {
        let mut dd = DdConfig::default();
        if let Some(max) = stages.max_tests {
            dd = dd.with_max_tests(max);
        }
        let base = ReduceOptions {
            dd,
            ..ReduceOptions::default()
        };
        let options = if stages.skip_boundary_checks {
            base.skipping_checks(stages.search_restarts)
        } else {
            ReduceOptions {
                max_retries: stages.search_restarts,
                ..base
            }
        };
        Self {
            backend,
            probe: BaselineProbe::new(stages.warmup_calls, stages.timeout_factor),
            options,
            repeat: stages.test_repeat,
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Reduce `code` token by token.
    ///
    /// The tokenizer must round-trip `code`. The expected imports are
    /// whatever the oracle infers from `code` itself; `known_imports`
    /// resolves wildcards in that answer.
    pub async fn token_reduce(
        &self,
        code: &str,
        known_imports: &[String],
    ) -> Result<TokenReduction, ReduceError> {
        let ids = check_round_trip(self.backend.tokenizer.as_ref(), code)?;
        let baseline = self
            .probe
            .measure(self.backend.oracle.as_ref(), code, known_imports)
            .await
            .map_err(ReduceError::Baseline)?;

        let property = ImportProperty {
            oracle: Arc::clone(&self.backend.oracle),
            tokenizer: Arc::clone(&self.backend.tokenizer),
            expected: baseline.imports.clone(),
            timeout: baseline.timeout,
            repeat: self.repeat,
        };
        let reduction = reduce_tokens(&property, ids, &self.options).await?;
        info!(
            model = %self.backend.model,
            tokens_before = reduction.stats.original_size,
            tokens_after = reduction.stats.minimized_size,
            oracle_calls = reduction.stats.tests_run,
            "token reduction done"
        );
        Ok(TokenReduction {
            reduced: reduction.text,
            baseline_imports: baseline.imports,
            timeout: baseline.timeout,
            stats: reduction.stats,
        })
    }
}
