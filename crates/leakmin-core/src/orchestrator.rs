//! Per-snippet reduction pipeline and the batch driver around it.
//!
//! A task moves through: baseline, structural reduction, token reduction on
//! the structural output, and, when that is exhausted, an oracle reload and
//! token reduction on the original snippet. Structural failure never aborts
//! a task; it only swaps in the import-free original as input.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use leakmin_oracle::imports::strip_imports;
use leakmin_oracle::{Backend, Oracle, OracleError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{BatchConfig, StageConfig};
use crate::limits::{retry_bounded, RetryExhausted, StopReason};
use crate::llm::{LlmReducer, ReduceError, TokenReduction};
use crate::structural::{StructuralJob, StructuralReducer};
use crate::timeout::{Baseline, BaselineProbe};
use crate::timing::{TaskContext, TimingEvent, TimingLog};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("oracle reload failed: {0}")]
    Reload(#[source] OracleError),

    #[error(transparent)]
    Exhausted(#[from] RetryExhausted<ReduceError>),
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("cannot read input directory {path}: {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create output directory {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One snippet to reduce.
#[derive(Debug, Clone)]
pub struct TaskInput {
    /// File name; also the task's key in the timing log.
    pub id: String,
    pub source: String,
}

/// Which chain produced a task's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// Token reduction over the structural output (or its fallback).
    Primary,
    /// Token reduction over the original snippet after a reload.
    Backup,
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub reduced: String,
    /// Names the oracle inferred before reduction.
    pub baseline_imports: Vec<String>,
    pub tier: Tier,
}

impl TaskOutcome {
    fn from_reduction(reduction: TokenReduction, tier: Tier) -> Self {
        Self {
            reduced: reduction.reduced,
            baseline_imports: reduction.baseline_imports,
            tier,
        }
    }
}

enum Stage {
    Init,
    Baseline,
    Structural(Baseline),
    Token { input: String },
    Reload,
    Backup,
    Done(TaskOutcome),
}

/// Runs the stage chain for one task at a time.
pub struct Orchestrator {
    llm: LlmReducer,
    structural: Arc<dyn StructuralReducer>,
    stages: StageConfig,
    probe: BaselineProbe,
}

impl Orchestrator {
    pub fn new(backend: Backend, structural: Arc<dyn StructuralReducer>, stages: StageConfig) -> Self {
        Self {
            llm: LlmReducer::new(backend, &stages),
            structural,
            probe: BaselineProbe::new(stages.warmup_calls, stages.timeout_factor),
            stages,
        }
    }

    pub fn backend(&self) -> &Backend {
        self.llm.backend()
    }

    fn oracle(&self) -> &dyn Oracle {
        self.llm.backend().oracle.as_ref()
    }

    pub async fn reload(&self, ctx: &TaskContext) -> Result<(), OracleError> {
        ctx.record(TimingEvent::ReloadingModel);
        self.oracle().reload().await
    }

    /// Reduce one snippet.
    pub async fn run_task(&self, ctx: &TaskContext, input: &TaskInput) -> Result<TaskOutcome, TaskError> {
        let (stripped, known) = strip_imports(&input.source);
        let mut stage = Stage::Init;
        loop {
            stage = match stage {
                Stage::Init => {
                    ctx.record(TimingEvent::StructuralStarted);
                    Stage::Baseline
                }
                Stage::Baseline => {
                    let measured = retry_bounded(ctx, "baseline", self.stages.structural_retries, |_| {
                        self.probe.measure(self.oracle(), &stripped, &known)
                    })
                    .await;
                    match measured {
                        Ok(baseline) => Stage::Structural(baseline),
                        Err(err) => {
                            warn!(task = %ctx.task(), error = %err, "no baseline, skipping structural reduction");
                            ctx.record(TimingEvent::StructuralFailed);
                            Stage::Token {
                                input: stripped.clone(),
                            }
                        }
                    }
                }
                Stage::Structural(baseline) => {
                    let job = StructuralJob {
                        file_name: input.id.clone(),
                        code: stripped.clone(),
                        expected: baseline.imports,
                        timeout: baseline.timeout,
                    };
                    let reduced = retry_bounded(ctx, "structural", self.stages.structural_retries, |_| {
                        self.structural.reduce(&job)
                    })
                    .await;
                    match reduced {
                        Ok(reduced) => {
                            ctx.record(TimingEvent::StructuralSucceeded);
                            Stage::Token { input: reduced }
                        }
                        Err(err) => {
                            warn!(task = %ctx.task(), error = %err, "falling back to the import-free snippet");
                            ctx.record(TimingEvent::StructuralFailed);
                            Stage::Token {
                                input: stripped.clone(),
                            }
                        }
                    }
                }
                Stage::Token { input: code } => {
                    ctx.record(TimingEvent::TokenStarted);
                    let reduced = retry_bounded(ctx, "ddmin_perses", self.stages.token_retries, |_| {
                        self.llm.token_reduce(&code, &known)
                    })
                    .await;
                    match reduced {
                        Ok(reduction) => {
                            ctx.record(TimingEvent::TokenSucceeded);
                            Stage::Done(TaskOutcome::from_reduction(reduction, Tier::Primary))
                        }
                        Err(err) => {
                            warn!(task = %ctx.task(), error = %err, "token reduction exhausted");
                            ctx.record(TimingEvent::TokenFailed);
                            Stage::Reload
                        }
                    }
                }
                Stage::Reload => {
                    self.reload(ctx).await.map_err(TaskError::Reload)?;
                    Stage::Backup
                }
                Stage::Backup => {
                    ctx.record(TimingEvent::BackupStarted);
                    let reduction = retry_bounded(ctx, "ddmin_backup", self.stages.backup_retries, |_| {
                        self.llm.token_reduce(&input.source, &known)
                    })
                    .await?;
                    ctx.record(TimingEvent::BackupSucceeded);
                    Stage::Done(TaskOutcome::from_reduction(reduction, Tier::Backup))
                }
                Stage::Done(outcome) => return Ok(outcome),
            };
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub output_dir: PathBuf,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub stop: StopReason,
}

/// `<model with ':' as '-'>-reduce-<input dir name>`.
pub fn output_dir_name(model: &str, input_dir: &Path) -> String {
    let input_name = input_dir
        .components()
        .next_back()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}-reduce-{}", model.replace(':', "-"), input_name)
}

/// Snippet file names in `dir` with the given extension, sorted.
pub fn list_inputs(dir: &Path, extension: &str) -> Result<Vec<String>, BatchError> {
    let read_err = |source| BatchError::ReadInput {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Drives the orchestrator over a directory of snippets.
pub struct BatchRunner {
    orchestrator: Orchestrator,
    batch: BatchConfig,
    task_retries: usize,
    log: Arc<TimingLog>,
}

impl BatchRunner {
    pub fn new(orchestrator: Orchestrator, batch: BatchConfig, task_retries: usize, log: Arc<TimingLog>) -> Self {
        Self {
            orchestrator,
            batch,
            task_retries,
            log,
        }
    }

    pub fn log(&self) -> &Arc<TimingLog> {
        &self.log
    }

    fn shuffle(&self, files: &mut [String]) {
        let seed = self.batch.seed.unwrap_or_else(rand::random);
        info!(seed, files = files.len(), "shuffling inputs");
        files.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    }

    /// Reduce every snippet in `input_dir` that has no output yet.
    ///
    /// The stop sentinel is checked before each task; a task in flight
    /// always runs to its end.
    pub async fn process_batch(&self, input_dir: &Path, output_root: &Path) -> Result<BatchSummary, BatchError> {
        let model = self.orchestrator.backend().model.clone();
        let output_dir = output_root.join(output_dir_name(&model, input_dir));
        std::fs::create_dir_all(&output_dir).map_err(|source| BatchError::CreateOutput {
            path: output_dir.clone(),
            source,
        })?;

        let mut files = list_inputs(input_dir, &self.batch.extension)?;
        self.shuffle(&mut files);

        let mut summary = BatchSummary {
            output_dir: output_dir.clone(),
            processed: 0,
            skipped: 0,
            failed: 0,
            stop: StopReason::Complete,
        };

        for file in files {
            let output_path = output_dir.join(&file);
            if output_path.exists() {
                summary.skipped += 1;
                continue;
            }
            if self.batch.stop_sentinel.exists() {
                info!(sentinel = %self.batch.stop_sentinel.display(), "stop requested");
                summary.stop = StopReason::StopRequested;
                break;
            }

            let ctx = self.log.task(file.as_str());
            match self.run_one(&ctx, input_dir, &file, &output_dir).await {
                Ok(()) => {
                    ctx.record(TimingEvent::ReductionDone);
                    summary.processed += 1;
                    info!(task = %file, "processed");
                }
                Err(err) => {
                    error!(task = %file, error = %err, "reduction failed");
                    ctx.record(TimingEvent::ReductionFailed);
                    summary.failed += 1;
                }
            }
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            stop = ?summary.stop,
            "batch finished"
        );
        Ok(summary)
    }

    async fn run_one(
        &self,
        ctx: &TaskContext,
        input_dir: &Path,
        file: &str,
        output_dir: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let source = std::fs::read_to_string(input_dir.join(file))?;
        let input = TaskInput {
            id: file.to_string(),
            source,
        };

        self.orchestrator.reload(ctx).await?;
        ctx.record(TimingEvent::ReductionStarted);
        let outcome = retry_bounded(ctx, "reduction", self.task_retries, |_| {
            self.orchestrator.run_task(ctx, &input)
        })
        .await?;

        std::fs::write(output_dir.join(file), &outcome.reduced)?;
        std::fs::write(
            output_dir.join(format!("{file}_v0")),
            outcome.baseline_imports.join("\n"),
        )?;
        info!(task = %file, tier = ?outcome.tier, bytes = outcome.reduced.len(), "result written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dir_name() {
        assert_eq!(
            output_dir_name("llama3.1:8b", Path::new("data/snippets/")),
            "llama3.1-8b-reduce-snippets"
        );
        assert_eq!(output_dir_name("gpt-4o", Path::new("so")), "gpt-4o-reduce-so");
    }

    #[test]
    fn test_list_inputs_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["B.java", "A.java", "notes.txt", "C.java_v0"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.java")).unwrap();
        assert_eq!(list_inputs(dir.path(), "java").unwrap(), vec!["A.java", "B.java"]);
    }

    #[test]
    fn test_list_inputs_reports_missing_dir() {
        let err = list_inputs(Path::new("/nonexistent/input"), "java").unwrap_err();
        assert!(matches!(err, BatchError::ReadInput { .. }));
    }
}
