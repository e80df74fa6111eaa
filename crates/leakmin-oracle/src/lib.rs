//! Oracle adapter: the uniform `infer`/`reload` interface over inference
//! backends, the backend registry, tokenizer backends, and the
//! import-statement utilities used to judge oracle responses.

pub mod backends;
pub mod config;
pub mod error;
pub mod imports;
pub mod lexer;
pub mod oracle;
pub mod prompt;
pub mod registry;
pub mod tokenizer;

pub use config::{BackendSettings, SamplingOptions, API_KEY_ENV};
pub use error::{OracleError, RegistryError, TokenizerError};
pub use oracle::Oracle;
pub use registry::{Backend, OracleRegistry};
pub use tokenizer::{check_round_trip, CharTokenizer, LexicalTokenizer, Tokenizer, TokenizerKind};
