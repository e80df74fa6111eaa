//! Concrete oracle backends.

mod command;
mod http;
mod ollama;
mod openai;

pub use command::CommandOracle;
pub use ollama::OllamaOracle;
pub use openai::OpenAiOracle;
