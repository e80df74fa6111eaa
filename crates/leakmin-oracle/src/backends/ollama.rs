use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::http::{post_json, string_at};
use crate::config::SamplingOptions;
use crate::error::OracleError;
use crate::oracle::Oracle;
use crate::prompt::import_prompt;

/// Local model server speaking the `/api/chat` protocol.
pub struct OllamaOracle {
    model: String,
    endpoint: String,
    sampling: SamplingOptions,
}

impl OllamaOracle {
    pub fn new(model: impl Into<String>, host: &str, sampling: SamplingOptions) -> Self {
        Self {
            model: model.into(),
            endpoint: format!("{}/api/chat", host.trim_end_matches('/')),
            sampling,
        }
    }

    fn request(&self, messages: Value, options: Value) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "options": options,
            "stream": false,
            // Unload right after answering so every call starts cold.
            "keep_alive": "0",
        })
    }
}

#[async_trait]
impl Oracle for OllamaOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn infer(&self, source: &str, timeout: Option<Duration>) -> Result<String, OracleError> {
        let options = json!({
            "seed": self.sampling.seed,
            "temperature": self.sampling.temperature,
            "num_ctx": self.sampling.num_ctx,
            "num_keep": 0,
        });
        let body = self.request(import_prompt(source), options);
        let reply = post_json(self.endpoint.clone(), None, body, timeout).await?;
        string_at(&reply, &["message", "content"])
    }

    async fn reload(&self) -> Result<(), OracleError> {
        info!(model = %self.model, "reloading model");
        let options = json!({ "max_tokens": self.sampling.max_completion_tokens });
        let body = self.request(json!([]), options);
        post_json(self.endpoint.clone(), None, body, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_pins_sampling_and_disables_streaming() {
        let oracle = OllamaOracle::new("llama3.1:8b", "http://localhost:11434/", SamplingOptions::default());
        assert_eq!(oracle.endpoint, "http://localhost:11434/api/chat");
        let body = oracle.request(json!([]), json!({ "seed": 1 }));
        assert_eq!(body["model"], "llama3.1:8b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["keep_alive"], "0");
        assert_eq!(body["options"]["seed"], 1);
    }
}
