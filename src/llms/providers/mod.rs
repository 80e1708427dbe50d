//! LLM provider implementations.
//!
//! Each provider implements [`BaseLLM`](crate::llms::base_llm::BaseLLM) and
//! handles its own authentication, request formatting and error mapping.

pub mod gemini;

pub use gemini::GeminiCompletion;
