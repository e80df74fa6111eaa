//! Backend configuration: endpoints, credentials, sampling parameters.

use serde::{Deserialize, Serialize};

use crate::tokenizer::TokenizerKind;

/// Environment variable holding the hosted API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Sampling parameters sent with every request.
///
/// Pinned seed and zero temperature keep the oracle as repeatable as the
/// backend allows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingOptions {
    pub seed: u64,
    pub temperature: f32,
    /// Context window for the local model server.
    pub num_ctx: u32,
    /// Completion cap for the hosted API.
    pub max_completion_tokens: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            seed: 1,
            temperature: 0.0,
            num_ctx: 4096,
            max_completion_tokens: 800,
        }
    }
}

/// Settings shared by every backend in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Hosted API key. Falls back to `OPENAI_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Local model server. Falls back to `OLLAMA_HOST`.
    pub ollama_host: String,
    pub openai_base_url: String,
    /// Custom inference command (program followed by its arguments).
    pub command: Vec<String>,
    pub sampling: SamplingOptions,
    /// Tokenizer override; the lexical tokenizer otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<TokenizerKind>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            command: vec![
                "java".to_string(),
                "-cp".to_string(),
                "snr/snr-server-0.0.1-SNAPSHOT.jar:snr/lib/*".to_string(),
                "org.javelus.snr.compile.SnRBuilder".to_string(),
            ],
            sampling: SamplingOptions::default(),
            tokenizer: None,
        }
    }
}

impl BackendSettings {
    /// Fill unset values from the process environment.
    pub fn with_env_fallbacks(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            if !host.is_empty() {
                self.ollama_host = host;
            }
        }
        self
    }

    /// Host without a trailing slash.
    pub fn ollama_base(&self) -> &str {
        self.ollama_host.trim_end_matches('/')
    }

    pub fn openai_base(&self) -> &str {
        self.openai_base_url.trim_end_matches('/')
    }
}
