//! Concrete provider backends
//!
//! Two HTTP backends ship with the engine: an Ollama-compatible local runtime
//! (zero cost, first in the default chain) and an OpenAI-compatible remote
//! endpoint. Anything else plugs in through the `GenerationProvider` trait.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
