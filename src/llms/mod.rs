//! Text-generation backends.
//!
//! - [`base_llm`]: the [`BaseLLM`] trait every provider implements
//! - [`providers`]: concrete providers (Gemini)

pub mod base_llm;
pub mod providers;

pub use base_llm::{BaseLLM, BaseLLMState, LLMError, LLMMessage};
