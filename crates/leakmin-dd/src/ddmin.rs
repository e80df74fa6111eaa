//! Two-outcome delta debugging (ddmin).
//!
//! Maintains a candidate `c` and a granularity `n` (initially 2). Each round
//! splits `c` into `n` contiguous chunks of nearly equal size, then:
//!
//! 1. tries every chunk's complement; the first that still fails becomes the
//!    new candidate and `n` drops to `max(n - 1, 2)`;
//! 2. otherwise tries every chunk alone; the first that still fails becomes
//!    the new candidate and `n` resets to 2;
//! 3. otherwise stops when `n == len(c)`, else doubles `n` (capped at
//!    `len(c)`).
//!
//! Each round either shrinks `c` or moves `n` toward `len(c)`, so the search
//! terminates. The result is 1-minimal under this schedule, not globally
//! minimal. Tests are issued strictly one at a time.

use std::collections::HashMap;
use std::ops::Range;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{BoxError, DdError};
use crate::verdict::{Candidate, IndexedToken, Verdict};

/// Black-box test consulted by the search.
#[async_trait]
pub trait CandidateTest<T: Sync>: Send {
    async fn test(&mut self, candidate: &[IndexedToken<T>]) -> Result<Verdict, BoxError>;
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdConfig {
    /// Require `test([]) == PASS` and `test(original) == FAIL` before searching.
    pub check_boundaries: bool,
    /// Never send the same candidate to the test twice within one search.
    pub cache_outcomes: bool,
    /// Re-test the result uncached and reject a flipped verdict.
    pub verify_final: bool,
    /// Upper bound on test invocations, boundary checks included. Once it
    /// is reached the final verification is skipped. None = unlimited.
    pub max_tests: Option<usize>,
}

impl Default for DdConfig {
    fn default() -> Self {
        Self {
            check_boundaries: true,
            cache_outcomes: true,
            verify_final: true,
            max_tests: None,
        }
    }
}

impl DdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boundary_checks(mut self, enabled: bool) -> Self {
        self.check_boundaries = enabled;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_outcomes = enabled;
        self
    }

    pub fn with_final_verification(mut self, enabled: bool) -> Self {
        self.verify_final = enabled;
        self
    }

    pub fn with_max_tests(mut self, max: usize) -> Self {
        self.max_tests = Some(max);
        self
    }
}

/// Counters collected during one search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DdStats {
    pub original_size: usize,
    pub minimized_size: usize,
    /// Calls that reached the test function.
    pub tests_run: usize,
    pub cache_hits: usize,
    pub complement_reductions: usize,
    pub chunk_reductions: usize,
    pub granularity_increases: usize,
    /// The test budget ran out before a fixed point was reached.
    pub budget_exhausted: bool,
    /// Boundary checks were bypassed and the original already read PASS.
    pub accepted_empty: bool,
    #[serde(skip)]
    pub duration: Option<Duration>,
}

/// Result of a search.
#[derive(Debug, Clone)]
pub struct Minimized<T> {
    pub tokens: Candidate<T>,
    pub stats: DdStats,
}

impl<T: Clone> Minimized<T> {
    /// Token payloads in order, positions dropped.
    pub fn payloads(&self) -> Vec<T> {
        self.tokens.iter().map(|t| t.token.clone()).collect()
    }
}

enum Step {
    Fail,
    Pass,
    /// Test budget exhausted.
    Halt,
}

struct Session<'a, F: ?Sized> {
    test: &'a mut F,
    config: &'a DdConfig,
    cache: HashMap<Vec<usize>, Verdict>,
    stats: DdStats,
}

impl<'a, F: ?Sized> Session<'a, F> {
    fn key<T>(candidate: &[IndexedToken<T>]) -> Vec<usize> {
        candidate.iter().map(|t| t.index).collect()
    }

    async fn run_uncached<T: Sync>(&mut self, candidate: &[IndexedToken<T>]) -> Result<Verdict, DdError>
    where
        F: CandidateTest<T>,
    {
        self.stats.tests_run += 1;
        let verdict = self.test.test(candidate).await.map_err(DdError::Test)?;
        trace!(size = candidate.len(), %verdict, "candidate tested");
        Ok(verdict)
    }

    async fn checked<T: Sync>(&mut self, candidate: &[IndexedToken<T>]) -> Result<Verdict, DdError>
    where
        F: CandidateTest<T>,
    {
        let verdict = self.run_uncached(candidate).await?;
        if self.config.cache_outcomes {
            self.cache.insert(Self::key(candidate), verdict);
        }
        Ok(verdict)
    }

    async fn step<T: Sync>(&mut self, candidate: &[IndexedToken<T>]) -> Result<Step, DdError>
    where
        F: CandidateTest<T>,
    {
        if self.config.cache_outcomes {
            if let Some(verdict) = self.cache.get(&Self::key(candidate)) {
                self.stats.cache_hits += 1;
                return Ok(step_of(*verdict));
            }
        }
        if let Some(max) = self.config.max_tests {
            if self.stats.tests_run >= max {
                return Ok(Step::Halt);
            }
        }
        Ok(step_of(self.checked(candidate).await?))
    }
}

fn step_of(verdict: Verdict) -> Step {
    match verdict {
        Verdict::Fail => Step::Fail,
        Verdict::Pass => Step::Pass,
    }
}

/// Split `len` items into `n` contiguous ranges whose sizes differ by at most one.
pub(crate) fn split_ranges(len: usize, n: usize) -> Vec<Range<usize>> {
    let n = n.clamp(1, len.max(1));
    let mut ranges = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let stop = start + (len - start) / (n - i);
        ranges.push(start..stop);
        start = stop;
    }
    ranges
}

fn complement<T: Clone>(candidate: &[IndexedToken<T>], removed: &Range<usize>) -> Candidate<T> {
    candidate[..removed.start]
        .iter()
        .chain(candidate[removed.end..].iter())
        .cloned()
        .collect()
}

/// Delta debugging minimizer.
#[derive(Debug, Clone, Default)]
pub struct DeltaDebugger {
    config: DdConfig,
}

impl DeltaDebugger {
    pub fn new(config: DdConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(DdConfig::default())
    }

    pub fn config(&self) -> &DdConfig {
        &self.config
    }

    /// Minimize `candidate` while `test` keeps reporting FAIL.
    pub async fn minimize<T, F>(
        &self,
        candidate: Candidate<T>,
        test: &mut F,
    ) -> Result<Minimized<T>, DdError>
    where
        T: Clone + Send + Sync,
        F: CandidateTest<T> + ?Sized,
    {
        let start = Instant::now();
        let original_size = candidate.len();
        let mut session = Session {
            test,
            config: &self.config,
            cache: HashMap::new(),
            stats: DdStats {
                original_size,
                ..Default::default()
            },
        };

        if self.config.check_boundaries {
            if session.checked::<T>(&[]).await? != Verdict::Pass {
                return Err(DdError::PreconditionViolation(
                    "expected the empty candidate to PASS".into(),
                ));
            }
            if session.checked(&candidate).await? != Verdict::Fail {
                return Err(DdError::PreconditionViolation(
                    "expected the original candidate to FAIL".into(),
                ));
            }
        } else if session.checked(&candidate).await? == Verdict::Pass {
            warn!(
                original_size,
                "original candidate reads PASS with boundary checks bypassed; nothing is retained"
            );
            let mut stats = session.stats;
            stats.accepted_empty = true;
            stats.duration = Some(start.elapsed());
            return Ok(Minimized {
                tokens: Vec::new(),
                stats,
            });
        }

        let mut current = candidate;
        let mut n = 2usize;

        'search: while current.len() >= 2 {
            let ranges = split_ranges(current.len(), n);
            trace!(size = current.len(), granularity = n, "ddmin round");

            for (i, range) in ranges.iter().enumerate() {
                let reduced = complement(&current, range);
                match session.step(&reduced).await? {
                    Step::Fail => {
                        debug!(
                            chunk = i,
                            removed = range.len(),
                            remaining = reduced.len(),
                            "reduced to complement"
                        );
                        current = reduced;
                        n = n.saturating_sub(1).max(2);
                        session.stats.complement_reductions += 1;
                        continue 'search;
                    }
                    Step::Pass => {}
                    Step::Halt => {
                        session.stats.budget_exhausted = true;
                        break 'search;
                    }
                }
            }

            for (i, range) in ranges.iter().enumerate() {
                let subset: Candidate<T> = current[range.clone()].to_vec();
                match session.step(&subset).await? {
                    Step::Fail => {
                        debug!(chunk = i, remaining = subset.len(), "reduced to chunk");
                        current = subset;
                        n = 2;
                        session.stats.chunk_reductions += 1;
                        continue 'search;
                    }
                    Step::Pass => {}
                    Step::Halt => {
                        session.stats.budget_exhausted = true;
                        break 'search;
                    }
                }
            }

            if n >= current.len() {
                break;
            }
            n = (n * 2).min(current.len());
            session.stats.granularity_increases += 1;
        }

        if session.stats.budget_exhausted {
            warn!(
                tests = session.stats.tests_run,
                size = current.len(),
                "test budget exhausted; returning best candidate so far"
            );
        }

        if self.config.verify_final
            && !session.stats.budget_exhausted
            && !current.is_empty()
            && session.run_uncached(&current).await? != Verdict::Fail
        {
            return Err(DdError::PreconditionViolation(
                "verdict flipped: minimized candidate no longer fails".into(),
            ));
        }

        let mut stats = session.stats;
        stats.minimized_size = current.len();
        stats.duration = Some(start.elapsed());
        info!(
            original_size,
            minimized_size = stats.minimized_size,
            tests = stats.tests_run,
            cache_hits = stats.cache_hits,
            "ddmin complete"
        );

        Ok(Minimized {
            tokens: current,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::index_tokens;

    struct Contains(&'static str);

    #[async_trait]
    impl CandidateTest<char> for Contains {
        async fn test(&mut self, candidate: &[IndexedToken<char>]) -> Result<Verdict, BoxError> {
            let text: String = candidate.iter().map(|t| t.token).collect();
            Ok(Verdict::from_property(text.contains(self.0)))
        }
    }

    fn text_of(result: &Minimized<char>) -> String {
        result.payloads().into_iter().collect()
    }

    #[test]
    fn test_split_ranges_nearly_equal() {
        assert_eq!(split_ranges(11, 2), vec![0..5, 5..11]);
        assert_eq!(split_ranges(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(split_ranges(3, 3), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_split_ranges_caps_granularity_at_length() {
        let ranges = split_ranges(2, 8);
        assert_eq!(ranges, vec![0..1, 1..2]);
    }

    #[test]
    fn test_complement_preserves_order() {
        let candidate = index_tokens("abcdef".chars());
        let rest = complement(&candidate, &(2..4));
        let text: String = rest.iter().map(|t| t.token).collect();
        assert_eq!(text, "abef");
        assert_eq!(rest[2].index, 4);
    }

    #[tokio::test]
    async fn test_minimizes_to_substring() {
        let dd = DeltaDebugger::with_defaults();
        let result = dd
            .minimize(index_tokens("hello world".chars()), &mut Contains("rl"))
            .await
            .unwrap();
        assert_eq!(text_of(&result), "rl");
        assert_eq!(result.stats.minimized_size, 2);
        assert_eq!(result.stats.original_size, 11);
    }

    #[tokio::test]
    async fn test_cache_avoids_repeat_tests() {
        let dd = DeltaDebugger::with_defaults();
        let result = dd
            .minimize(index_tokens("hello world".chars()), &mut Contains("rl"))
            .await
            .unwrap();
        assert!(result.stats.cache_hits > 0);
    }

    #[tokio::test]
    async fn test_budget_returns_best_so_far() {
        let dd = DeltaDebugger::new(DdConfig::default().with_max_tests(3));
        let result = dd
            .minimize(index_tokens("hello world".chars()), &mut Contains("rl"))
            .await
            .unwrap();
        assert!(result.stats.budget_exhausted);
        assert!(text_of(&result).contains("rl"));
        assert!(result.tokens.len() < 11);
    }

    /// Counts every call that reaches the test function.
    struct Counting {
        inner: Contains,
        calls: usize,
    }

    #[async_trait]
    impl CandidateTest<char> for Counting {
        async fn test(&mut self, candidate: &[IndexedToken<char>]) -> Result<Verdict, BoxError> {
            self.calls += 1;
            self.inner.test(candidate).await
        }
    }

    #[tokio::test]
    async fn test_budget_is_a_hard_cap_on_calls() {
        for max in [2, 3, 5, 8] {
            let dd = DeltaDebugger::new(DdConfig::default().with_max_tests(max));
            let mut test = Counting {
                inner: Contains("rl"),
                calls: 0,
            };
            let result = dd
                .minimize(index_tokens("hello world".chars()), &mut test)
                .await
                .unwrap();
            assert!(result.stats.budget_exhausted, "budget {max}");
            assert_eq!(test.calls, max, "budget {max}");
            assert_eq!(result.stats.tests_run, max);
        }
    }

    #[tokio::test]
    async fn test_single_token_is_already_minimal() {
        let dd = DeltaDebugger::with_defaults();
        let result = dd
            .minimize(index_tokens("x".chars()), &mut Contains("x"))
            .await
            .unwrap();
        assert_eq!(text_of(&result), "x");
    }
}
