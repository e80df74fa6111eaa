use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure: connection refused, spawn failure, HTTP error status.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The backend answered, but not in the expected shape.
    #[error("oracle protocol error: {0}")]
    Protocol(String),
}

impl OracleError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, OracleError::Timeout(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown model '{model}' (known: {})", known.join(", "))]
    UnknownModel { model: String, known: Vec<String> },

    #[error("model '{model}' needs an API key")]
    MissingApiKey { model: String },

    #[error("invalid inference command: {0}")]
    InvalidCommand(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error(
        "{tokenizer} does not round-trip: decoded {decoded_len} bytes from {original_len}, first difference at byte {first_difference}"
    )]
    RoundTrip {
        tokenizer: String,
        original_len: usize,
        decoded_len: usize,
        first_difference: usize,
    },
}
