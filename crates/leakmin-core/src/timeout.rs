//! Adaptive timeout budgeting.
//!
//! The oracle is called on the unreduced input a few times to warm it up,
//! then once more under a clock. Any later call on reduced input gets
//! `factor` times that latency, rounded up to whole seconds.

use std::time::Duration;

use leakmin_oracle::imports::{expand_wildcards, strip_imports};
use leakmin_oracle::{Oracle, OracleError};
use tokio::time::Instant;
use tracing::{debug, info};

/// Result of the timed baseline call.
#[derive(Debug, Clone)]
pub struct Baseline {
    /// Names the oracle inferred from the unreduced input.
    pub imports: Vec<String>,
    pub elapsed: Duration,
    /// Per-call timeout for the rest of the stage.
    pub timeout: Duration,
}

impl Baseline {
    /// Whole seconds of the baseline call, at least one.
    pub fn budget_secs(&self) -> u64 {
        budget_secs(self.elapsed)
    }
}

pub fn budget_secs(elapsed: Duration) -> u64 {
    (elapsed.as_secs_f64().ceil() as u64).max(1)
}

#[derive(Debug, Clone, Copy)]
pub struct BaselineProbe {
    pub warmup_calls: u32,
    pub factor: u32,
}

impl BaselineProbe {
    pub fn new(warmup_calls: u32, factor: u32) -> Self {
        Self {
            warmup_calls,
            factor,
        }
    }

    /// Measure `oracle` on `code`.
    ///
    /// `known_imports` resolves wildcard imports in the response.
    pub async fn measure(
        &self,
        oracle: &dyn Oracle,
        code: &str,
        known_imports: &[String],
    ) -> Result<Baseline, OracleError> {
        for call in 0..self.warmup_calls {
            debug!(oracle = oracle.name(), call, "warm-up call");
            oracle.infer(code, None).await?;
        }

        let start = Instant::now();
        let response = oracle.infer(code, None).await?;
        let elapsed = start.elapsed();

        let (_, inferred) = strip_imports(&response);
        let imports = expand_wildcards(&inferred, known_imports);
        let timeout = Duration::from_secs(budget_secs(elapsed) * u64::from(self.factor));
        info!(
            oracle = oracle.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            timeout_secs = timeout.as_secs(),
            imports = imports.len(),
            "baseline measured"
        );
        Ok(Baseline {
            imports,
            elapsed,
            timeout,
        })
    }
}
