use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::backends::{CommandOracle, OllamaOracle, OpenAiOracle};
use crate::config::BackendSettings;
use crate::error::RegistryError;
use crate::oracle::Oracle;
use crate::tokenizer::{Tokenizer, TokenizerKind};

/// Everything a reduction needs from one model id.
#[derive(Clone)]
pub struct Backend {
    pub model: String,
    pub oracle: Arc<dyn Oracle>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("model", &self.model)
            .field("oracle", &self.oracle.name())
            .field("tokenizer", &self.tokenizer.name())
            .finish()
    }
}

type OracleFactory =
    Box<dyn Fn(&str, &BackendSettings) -> Result<Arc<dyn Oracle>, RegistryError> + Send + Sync>;

/// Model id to backend factory. Populated once at startup.
pub struct OracleRegistry {
    factories: BTreeMap<String, OracleFactory>,
}

impl OracleRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// The hosted, local-server and custom-command models.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for model in ["gpt-4o", "gpt-4o-mini"] {
            registry.register(model, |model, settings| {
                let key = settings
                    .api_key
                    .clone()
                    .ok_or_else(|| RegistryError::MissingApiKey {
                        model: model.to_string(),
                    })?;
                let oracle: Arc<dyn Oracle> = Arc::new(OpenAiOracle::new(
                    model,
                    settings.openai_base(),
                    key,
                    settings.sampling.clone(),
                ));
                Ok(oracle)
            });
        }
        for model in ["llama3.1:8b", "llama3.1:70b"] {
            registry.register(model, |model, settings| {
                let oracle: Arc<dyn Oracle> = Arc::new(OllamaOracle::new(
                    model,
                    settings.ollama_base(),
                    settings.sampling.clone(),
                ));
                Ok(oracle)
            });
        }
        registry.register("snr", |model, settings| {
            let oracle: Arc<dyn Oracle> = Arc::new(CommandOracle::new(model, &settings.command)?);
            Ok(oracle)
        });
        registry
    }

    pub fn register<F>(&mut self, model: impl Into<String>, factory: F)
    where
        F: Fn(&str, &BackendSettings) -> Result<Arc<dyn Oracle>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(model.into(), Box::new(factory));
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the backend for `model`; unknown ids fail fast.
    pub fn resolve(&self, model: &str, settings: &BackendSettings) -> Result<Backend, RegistryError> {
        let factory = self
            .factories
            .get(model)
            .ok_or_else(|| RegistryError::UnknownModel {
                model: model.to_string(),
                known: self.model_ids(),
            })?;
        let oracle = factory(model, settings)?;
        let kind = settings.tokenizer.unwrap_or(TokenizerKind::Lexical);
        debug!(model, tokenizer = ?kind, "resolved backend");
        Ok(Backend {
            model: model.to_string(),
            oracle,
            tokenizer: Arc::from(kind.build()),
        })
    }
}

impl Default for OracleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ids() {
        let ids = OracleRegistry::with_defaults().model_ids();
        assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini", "llama3.1:70b", "llama3.1:8b", "snr"]);
    }

    #[test]
    fn test_unknown_model_fails_fast() {
        let err = OracleRegistry::with_defaults()
            .resolve("gpt-2", &BackendSettings::default())
            .unwrap_err();
        match err {
            RegistryError::UnknownModel { model, known } => {
                assert_eq!(model, "gpt-2");
                assert!(known.contains(&"snr".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_hosted_model_needs_key() {
        let err = OracleRegistry::with_defaults()
            .resolve("gpt-4o", &BackendSettings::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingApiKey { .. }));
    }

    #[test]
    fn test_resolve_applies_tokenizer_override() {
        let settings = BackendSettings {
            tokenizer: Some(TokenizerKind::Char),
            ..Default::default()
        };
        let backend = OracleRegistry::with_defaults()
            .resolve("llama3.1:8b", &settings)
            .unwrap();
        assert_eq!(backend.oracle.name(), "llama3.1:8b");
        assert_eq!(backend.tokenizer.name(), "char");

        let default = OracleRegistry::with_defaults()
            .resolve("snr", &BackendSettings::default())
            .unwrap();
        assert_eq!(default.tokenizer.name(), "lexical");
    }
}
