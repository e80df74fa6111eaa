//! Companion protocol between the structural reducer and the oracle.
//!
//! The structural reducer judges each candidate by running a script and
//! reading its exit status. The script calls back into this binary's
//! `property` subcommand, which loads a [`PropertyRequest`] and runs the
//! check command it describes.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Prefix of the environment side channel.
pub const ENV_PREFIX: &str = "R_PROPERTY_";

#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("cannot read request {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no request: neither a request file nor R_PROPERTY_COMMAND is set")]
    Missing,

    #[error("cannot run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// What the companion should run to judge the current candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRequest {
    pub command: String,
    pub args: Vec<String>,
    /// Names the oracle must recover; appended as `--expect <name>`.
    #[serde(default)]
    pub expected: Vec<String>,
}

impl PropertyRequest {
    /// Arguments of the check command, expectations included.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        for name in &self.expected {
            args.push("--expect".to_string());
            args.push(name.clone());
        }
        args
    }

    pub fn load(path: &Path) -> Result<Self, PropertyError> {
        let content = std::fs::read_to_string(path).map_err(|source| PropertyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let data = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, data)
    }

    /// Environment variables describing this request.
    ///
    /// `ARGS_i` carries the full argument list, expectations included.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![(format!("{ENV_PREFIX}COMMAND"), self.command.clone())];
        for (i, arg) in self.command_args().into_iter().enumerate() {
            env.push((format!("{ENV_PREFIX}ARGS_{i}"), arg));
        }
        env
    }

    /// Rebuild a request from environment variables.
    pub fn from_vars<I>(vars: I) -> Option<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut command = None;
        let mut args = BTreeMap::new();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if name == "COMMAND" {
                command = Some(value);
            } else if let Some(index) = name.strip_prefix("ARGS_") {
                if let Ok(index) = index.parse::<usize>() {
                    args.insert(index, value);
                }
            }
        }
        Some(Self {
            command: command?,
            args: args.into_values().collect(),
            expected: Vec::new(),
        })
    }

    /// The request file named by `R_PROPERTY_REQUEST`, else the
    /// `COMMAND`/`ARGS_i` variables.
    pub fn from_env() -> Result<Self, PropertyError> {
        if let Ok(path) = std::env::var(format!("{ENV_PREFIX}REQUEST")) {
            if !path.is_empty() {
                return Self::load(Path::new(&path));
            }
        }
        Self::from_vars(std::env::vars()).ok_or(PropertyError::Missing)
    }
}

/// Run the check, retrying up to `retries` extra times.
///
/// Returns 0 as soon as one attempt exits 0, otherwise the last attempt's
/// exit code (1 when the process died without one).
pub async fn run_companion(request: &PropertyRequest, retries: u32) -> Result<i32, PropertyError> {
    let args = request.command_args();
    let mut code = 1;
    for attempt in 0..=retries {
        let status = Command::new(&request.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| PropertyError::Spawn {
                command: request.command.clone(),
                source,
            })?;
        code = status.code().unwrap_or(1);
        debug!(attempt, code, "property check attempt");
        if code == 0 {
            info!(attempt, "property holds");
            return Ok(0);
        }
    }
    warn!(code, attempts = retries + 1, "property does not hold");
    Ok(code)
}
