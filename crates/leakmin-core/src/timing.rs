//! Per-task event timeline.
//!
//! Every stage transition appends a timestamped label under the task's id.
//! The whole log is written once, at the end of the batch, by
//! [`PersistGuard`].

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use indexmap::IndexMap;
use tracing::{error, info};

/// Stage transitions recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingEvent {
    ReloadingModel,
    ReductionStarted,
    StructuralStarted,
    StructuralSucceeded,
    StructuralFailed,
    TokenStarted,
    TokenSucceeded,
    TokenFailed,
    BackupStarted,
    BackupSucceeded,
    ReductionDone,
    ReductionFailed,
    AttemptFailed { stage: String, attempt: usize },
}

impl TimingEvent {
    pub fn label(&self) -> Cow<'static, str> {
        let label = match self {
            TimingEvent::ReloadingModel => "reloading model",
            TimingEvent::ReductionStarted => "reduction started",
            TimingEvent::StructuralStarted => "Perses started",
            TimingEvent::StructuralSucceeded => "Perses success",
            TimingEvent::StructuralFailed => "Perses fail",
            TimingEvent::TokenStarted => "ddmin_perses started",
            TimingEvent::TokenSucceeded => "ddmin_perses success",
            TimingEvent::TokenFailed => "ddmin_perses failed",
            TimingEvent::BackupStarted => "ddmin_backup started",
            TimingEvent::BackupSucceeded => "ddmin_backup success",
            TimingEvent::ReductionDone => "reduction done",
            TimingEvent::ReductionFailed => "reduction failed",
            TimingEvent::AttemptFailed { stage, attempt } => {
                return Cow::Owned(format!("{stage} failed at attempt {attempt}"));
            }
        };
        Cow::Borrowed(label)
    }
}

/// Task id to ordered `"<timestamp>: <label>"` entries, in task order.
#[derive(Debug, Default)]
pub struct TimingLog {
    entries: Mutex<IndexMap<String, Vec<String>>>,
}

impl TimingLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, Vec<String>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start (or resume) the timeline of `task`.
    pub fn task(self: &Arc<Self>, task: impl Into<String>) -> TaskContext {
        let task = task.into();
        self.lock().entry(task.clone()).or_default();
        TaskContext {
            task,
            log: Arc::clone(self),
        }
    }

    fn append(&self, task: &str, event: &TimingEvent) {
        let entry = format!("{}: {}", timestamp(), event.label());
        self.lock().entry(task.to_string()).or_default().push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Labels recorded for `task`, without timestamps.
    pub fn labels(&self, task: &str) -> Vec<String> {
        self.lock()
            .get(task)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| match entry.split_once(": ") {
                        Some((_, label)) => label.to_string(),
                        None => entry.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.lock())
    }

    /// Write the log to `dir`. An empty log writes nothing.
    pub fn persist(&self, dir: &Path, prefix: Option<&str>) -> std::io::Result<Option<PathBuf>> {
        if self.is_empty() {
            return Ok(None);
        }
        let data = self.to_json().map_err(std::io::Error::other)?;
        let path = dir.join(log_file_name(prefix));
        std::fs::create_dir_all(dir)?;
        std::fs::write(&path, data)?;
        info!(path = %path.display(), "timing log written");
        Ok(Some(path))
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn log_file_name(prefix: Option<&str>) -> String {
    let stamp = Local::now().format("%Y%m%dT%H%M%S%.6f");
    match prefix {
        Some(prefix) => format!("reduction.{prefix}.{stamp}.log"),
        None => format!("reduction.{stamp}.log"),
    }
}

/// The timeline of one task, handed to every stage of that task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task: String,
    log: Arc<TimingLog>,
}

impl TaskContext {
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn record(&self, event: TimingEvent) {
        info!(task = %self.task, event = %event.label(), "stage transition");
        self.log.append(&self.task, &event);
    }
}

/// Writes the log exactly once: on [`PersistGuard::finish`], or on drop
/// when the batch unwinds through an error, panic or cancellation.
pub struct PersistGuard {
    log: Arc<TimingLog>,
    dir: PathBuf,
    prefix: Option<String>,
    done: bool,
}

impl PersistGuard {
    pub fn new(log: Arc<TimingLog>, dir: impl Into<PathBuf>, prefix: Option<String>) -> Self {
        Self {
            log,
            dir: dir.into(),
            prefix,
            done: false,
        }
    }

    pub fn finish(mut self) -> std::io::Result<Option<PathBuf>> {
        self.done = true;
        self.log.persist(&self.dir, self.prefix.as_deref())
    }
}

impl Drop for PersistGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Err(err) = self.log.persist(&self.dir, self.prefix.as_deref()) {
            error!(error = %err, dir = %self.dir.display(), "failed to write timing log");
        }
    }
}
