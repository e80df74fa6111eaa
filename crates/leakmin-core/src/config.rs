//! Reduction configuration.
//!
//! Loaded from a TOML file; every section and field has a default so a
//! partial file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use leakmin_oracle::BackendSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub oracle: OracleConfig,
    pub structural: StructuralConfig,
    pub stages: StageConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Registry id of the model under study.
    pub model: String,
    #[serde(flatten)]
    pub backend: BackendSettings,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            backend: BackendSettings::default(),
        }
    }
}

/// External syntax-aware reducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralConfig {
    pub program: String,
    /// Arguments placed before `-i <file> -t <script>`.
    pub args: Vec<String>,
    pub code_format: String,
    /// Directory, next to the input file, the reducer writes its result to.
    pub result_dir: String,
    /// Wall-clock limit for one reducer run. None = unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_limit_secs: Option<u64>,
    /// Executable the property-check script calls back into. Defaults to
    /// the running binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companion: Option<PathBuf>,
    /// Extra attempts the companion makes before reporting "discard".
    pub companion_retries: u32,
}

impl Default for StructuralConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            args: vec!["-jar".to_string(), "perses_deploy.jar".to_string()],
            code_format: "ORIG_FORMAT".to_string(),
            result_dir: "perses_result".to_string(),
            wall_limit_secs: None,
            companion: None,
            companion_retries: 3,
        }
    }
}

impl StructuralConfig {
    pub fn wall_limit(&self) -> Option<Duration> {
        self.wall_limit_secs.map(Duration::from_secs)
    }
}

/// Retry bounds and timing for the reduction stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub structural_retries: usize,
    /// Retries of token reduction over the structural output.
    pub token_retries: usize,
    /// Retries of token reduction over the original snippet.
    pub backup_retries: usize,
    /// Retries of a whole task.
    pub task_retries: usize,
    /// Restarts of a single search after a verdict flip.
    pub search_restarts: usize,
    /// Per-call timeout = factor x baseline seconds.
    pub timeout_factor: u32,
    /// Oracle calls made before the timed baseline call.
    pub warmup_calls: u32,
    /// Extra attempts per property test.
    pub test_repeat: u32,
    pub skip_boundary_checks: bool,
    /// Cap on oracle calls per search. None = unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tests: Option<usize>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            structural_retries: 5,
            token_retries: 5,
            backup_retries: 5,
            task_retries: 0,
            search_restarts: 0,
            timeout_factor: 2,
            warmup_calls: 2,
            test_repeat: 0,
            skip_boundary_checks: true,
            max_tests: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Snippet file extension, without the dot.
    pub extension: String,
    /// Shuffle seed. None = a fresh random order every run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// The batch halts before the next task while this file exists.
    pub stop_sentinel: PathBuf,
    pub log_dir: PathBuf,
    /// Inserted into the timing log file name. Falls back to
    /// `REDUCTION_LOG_PREFIX`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_prefix: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            extension: "java".to_string(),
            seed: None,
            stop_sentinel: PathBuf::from("./stop_reduction"),
            log_dir: PathBuf::from("."),
            log_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter; `RUST_LOG` takes precedence.
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ReductionConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Fill unset values from the environment.
    pub fn with_env_fallbacks(mut self) -> Self {
        self.oracle.backend = self.oracle.backend.with_env_fallbacks();
        if self.batch.log_prefix.is_none() {
            self.batch.log_prefix = std::env::var("REDUCTION_LOG_PREFIX")
                .ok()
                .filter(|p| !p.is_empty());
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oracle.model.trim().is_empty() {
            return Err(ConfigError::Invalid("oracle.model is empty".to_string()));
        }
        if self.stages.timeout_factor == 0 {
            return Err(ConfigError::Invalid(
                "stages.timeout_factor must be at least 1".to_string(),
            ));
        }
        if self.structural.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "structural.program is empty".to_string(),
            ));
        }
        if self.batch.extension.is_empty() {
            return Err(ConfigError::Invalid("batch.extension is empty".to_string()));
        }
        Ok(())
    }
}
