use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::{post_json, string_at};
use crate::config::SamplingOptions;
use crate::error::OracleError;
use crate::oracle::Oracle;
use crate::prompt::import_prompt;

/// Hosted chat-completions API. Stateless, so `reload` is a no-op.
pub struct OpenAiOracle {
    model: String,
    endpoint: String,
    api_key: String,
    sampling: SamplingOptions,
}

impl OpenAiOracle {
    pub fn new(
        model: impl Into<String>,
        base_url: &str,
        api_key: impl Into<String>,
        sampling: SamplingOptions,
    ) -> Self {
        Self {
            model: model.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            sampling,
        }
    }

    fn request(&self, source: &str) -> Value {
        json!({
            "model": self.model,
            "messages": import_prompt(source),
            "seed": self.sampling.seed,
            "temperature": self.sampling.temperature,
            "max_completion_tokens": self.sampling.max_completion_tokens,
        })
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn infer(&self, source: &str, timeout: Option<Duration>) -> Result<String, OracleError> {
        let reply = post_json(
            self.endpoint.clone(),
            Some(self.api_key.clone()),
            self.request(source),
            timeout,
        )
        .await?;
        string_at(&reply, &["choices", "0", "message", "content"])
    }
}
