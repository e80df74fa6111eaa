//! Bridge to the external syntax-aware reducer.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use leakmin_oracle::API_KEY_ENV;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::StructuralConfig;
use crate::property::{PropertyRequest, ENV_PREFIX};

/// Name of the property-check script handed to the reducer.
pub const CHECK_SCRIPT: &str = "r_property_check.sh";
const REQUEST_FILE: &str = "property_request.json";

#[derive(Debug, thiserror::Error)]
pub enum StructuralError {
    #[error("workspace setup failed: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("structural reducer exited with {code:?}: {output}")]
    Exit { code: Option<i32>, output: String },

    #[error("structural reducer exceeded its wall-clock limit of {0:?}")]
    WallLimit(Duration),

    #[error("structural reducer left no result at {path}: {source}")]
    MissingResult {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One structural reduction request.
#[derive(Debug, Clone)]
pub struct StructuralJob {
    /// File name the snippet is reduced under.
    pub file_name: String,
    /// Import-free snippet text.
    pub code: String,
    /// Names the oracle must keep recovering.
    pub expected: Vec<String>,
    /// Per-check oracle timeout.
    pub timeout: Duration,
}

#[async_trait]
pub trait StructuralReducer: Send + Sync {
    async fn reduce(&self, job: &StructuralJob) -> Result<String, StructuralError>;
}

/// Runs the external reducer as a subprocess in a scratch directory.
pub struct PersesBridge {
    config: StructuralConfig,
    companion: PathBuf,
    model: String,
    config_file: Option<PathBuf>,
    api_key: Option<String>,
}

impl PersesBridge {
    pub fn new(config: StructuralConfig, companion: PathBuf, model: impl Into<String>) -> Self {
        Self {
            config,
            companion,
            model: model.into(),
            config_file: None,
            api_key: None,
        }
    }

    /// Config file the companion's check passes on to the oracle.
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Hosted API key exported to the reducer and, through it, to every
    /// companion check. Never passed as an argument.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    fn request(&self, job: &StructuralJob) -> PropertyRequest {
        let mut args = vec![
            "check".to_string(),
            job.file_name.clone(),
            "--model".to_string(),
            self.model.clone(),
            "--timeout".to_string(),
            job.timeout.as_secs().max(1).to_string(),
        ];
        if let Some(path) = &self.config_file {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        PropertyRequest {
            command: self.companion.display().to_string(),
            args,
            expected: job.expected.clone(),
        }
    }

    fn write_script(&self, dir: &Path, request_path: &Path) -> std::io::Result<PathBuf> {
        let script = dir.join(CHECK_SCRIPT);
        let body = format!(
            "#!/bin/sh\nexec {} property --request {} --retries {}\n",
            shell_quote(&self.companion.display().to_string()),
            shell_quote(&request_path.display().to_string()),
            self.config.companion_retries,
        );
        std::fs::write(&script, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(script)
    }

    async fn run(&self, mut command: Command) -> Result<std::process::Output, StructuralError> {
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StructuralError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;
        let output = match self.config.wall_limit() {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| StructuralError::WallLimit(limit))?,
            None => child.wait_with_output().await,
        };
        Ok(output?)
    }
}

#[async_trait]
impl StructuralReducer for PersesBridge {
    async fn reduce(&self, job: &StructuralJob) -> Result<String, StructuralError> {
        let workspace = tempfile::Builder::new().prefix("leakmin-").tempdir()?;
        let dir = workspace.path();
        let input = dir.join(&job.file_name);
        std::fs::write(&input, &job.code)?;

        let request = self.request(job);
        let request_path = dir.join(REQUEST_FILE);
        request.write(&request_path)?;
        let script = self.write_script(dir, &request_path)?;

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg("-i")
            .arg(&input)
            .arg("-t")
            .arg(&script)
            .arg("--code-format")
            .arg(&self.config.code_format)
            .envs(request.to_env())
            .env(format!("{ENV_PREFIX}REQUEST"), &request_path);
        if let Some(key) = &self.api_key {
            command.env(API_KEY_ENV, key);
        }
        info!(file = %job.file_name, dir = %dir.display(), "running structural reducer");
        debug!(?command, "structural reducer command");

        let output = self.run(command).await?;
        if !output.status.success() {
            return Err(StructuralError::Exit {
                code: output.status.code(),
                output: tail(&output.stdout, &output.stderr),
            });
        }

        let result = dir.join(&self.config.result_dir).join(&job.file_name);
        let reduced = std::fs::read_to_string(&result)
            .map_err(|source| StructuralError::MissingResult { path: result, source })?;
        info!(
            file = %job.file_name,
            before = job.code.len(),
            after = reduced.len(),
            "structural reduction done"
        );
        Ok(reduced)
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Last few lines of the reducer's combined output.
fn tail(stdout: &[u8], stderr: &[u8]) -> String {
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(stdout),
        String::from_utf8_lossy(stderr)
    );
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}
