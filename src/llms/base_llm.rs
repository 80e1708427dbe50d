//! Base LLM trait and shared provider state.
//!
//! Every text-generation backend implements [`BaseLLM`]. Providers return
//! boxed errors; turning those into domain fallbacks is the caller's job
//! (see `crate::agent`).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default per-request timeout for provider HTTP calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Boxed provider error.
pub type LLMError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A single message in an LLM conversation: a `role` and a `content` key.
pub type LLMMessage = HashMap<String, Value>;

/// Build a message with the given role.
pub fn message(role: &str, content: impl Into<String>) -> LLMMessage {
    let mut msg = HashMap::new();
    msg.insert("role".to_string(), Value::String(role.to_string()));
    msg.insert("content".to_string(), Value::String(content.into()));
    msg
}

pub fn system_message(content: impl Into<String>) -> LLMMessage {
    message("system", content)
}

pub fn user_message(content: impl Into<String>) -> LLMMessage {
    message("user", content)
}

pub fn assistant_message(content: impl Into<String>) -> LLMMessage {
    message("assistant", content)
}

/// Role of a message, defaulting to `user`.
pub fn role_of(msg: &LLMMessage) -> &str {
    msg.get("role").and_then(|v| v.as_str()).unwrap_or("user")
}

/// Text content of a message, empty if absent or not a string.
pub fn content_of(msg: &LLMMessage) -> &str {
    msg.get("content").and_then(|v| v.as_str()).unwrap_or("")
}

// ---------------------------------------------------------------------------
// BaseLLM trait
// ---------------------------------------------------------------------------

/// Interface all text-generation providers implement.
///
/// Implementations make a single logical call (internal retries allowed) and
/// return the generated text or an error. They must not panic on network or
/// API failures.
#[async_trait]
pub trait BaseLLM: Send + Sync + fmt::Debug {
    /// Model identifier.
    fn model(&self) -> &str;

    /// Provider name (e.g. "gemini").
    fn provider(&self) -> &str;

    /// Generate a reply for the conversation.
    async fn acall(&self, messages: Vec<LLMMessage>) -> Result<String, LLMError>;
}

// ---------------------------------------------------------------------------
// BaseLLMState
// ---------------------------------------------------------------------------

/// Fields shared by provider implementations.
#[derive(Clone)]
pub struct BaseLLMState {
    pub model: String,
    pub temperature: Option<f64>,
    /// Never printed.
    pub api_key: Option<String>,
    /// Overrides the provider's default API root.
    pub base_url: Option<String>,
    pub provider: String,
    /// Extra attempts after the first for transient failures.
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl fmt::Debug for BaseLLMState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseLLMState")
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl BaseLLMState {
    pub fn new(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            api_key: None,
            base_url: None,
            provider: provider.into(),
            max_retries: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

}
