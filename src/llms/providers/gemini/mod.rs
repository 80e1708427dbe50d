//! Google Gemini completion provider.
//!
//! Calls the `generateContent` REST endpoint. System messages are lifted into
//! `systemInstruction`; `assistant` turns are sent with the `model` role.
//!
//! # Authentication
//!
//! The API key is supplied by the caller (see `crate::config`) and sent as
//! the `key` query parameter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llms::base_llm::{content_of, role_of, BaseLLM, BaseLLMState, LLMError, LLMMessage};

/// Public Gemini API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

// ---------------------------------------------------------------------------
// GeminiCompletion provider
// ---------------------------------------------------------------------------

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiCompletion {
    pub state: BaseLLMState,
    /// Maximum output tokens.
    pub max_output_tokens: Option<u32>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,
    client: reqwest::Client,
}

impl GeminiCompletion {
    /// Create a provider for `model` authenticated with `api_key`.
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LLMError> {
        let mut state = BaseLLMState::new(model, "gemini");
        state.api_key = Some(api_key.into());
        state.request_timeout = request_timeout;

        let client = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            state,
            max_output_tokens: None,
            top_p: None,
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.state.base_url = Some(base_url.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.state.max_retries = max_retries;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.state.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: Option<u32>) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_top_p(mut self, top_p: Option<f64>) -> Self {
        self.top_p = top_p;
        self
    }

    /// Get the API endpoint URL.
    fn api_endpoint(&self) -> String {
        let base = self
            .state
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{}/models/{}:generateContent", base, self.state.model)
    }

    /// Build generation config for the Gemini API.
    pub fn generation_config(&self) -> Value {
        let mut config = serde_json::Map::new();
        if let Some(temp) = self.state.temperature {
            config.insert("temperature".to_string(), serde_json::json!(temp));
        }
        if let Some(max_tokens) = self.max_output_tokens {
            config.insert("maxOutputTokens".to_string(), serde_json::json!(max_tokens));
        }
        if let Some(top_p) = self.top_p {
            config.insert("topP".to_string(), serde_json::json!(top_p));
        }
        Value::Object(config)
    }

    /// Split messages into a system instruction and Gemini `contents`.
    fn format_messages(messages: &[LLMMessage]) -> (Option<String>, Vec<Value>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for msg in messages {
            let role = role_of(msg);
            let text = content_of(msg);

            if role == "system" {
                system_parts.push(text.to_string());
                continue;
            }

            let gemini_role = match role {
                "assistant" | "model" => "model",
                _ => "user",
            };
            contents.push(serde_json::json!({
                "role": gemini_role,
                "parts": [{ "text": text }],
            }));
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, contents)
    }

    /// Build the complete request body.
    pub fn build_request_body(&self, messages: &[LLMMessage]) -> Value {
        let (system, contents) = Self::format_messages(messages);

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": self.generation_config(),
        });

        if let Some(system_text) = system {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": system_text }]
            });
        }

        body
    }

    /// Extract the reply text from a Gemini response.
    pub fn parse_response(&self, response: &Value) -> Result<String, LLMError> {
        if let Some(error) = response.get("error") {
            let msg = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown Gemini API error");
            return Err(format!("Gemini API error: {}", msg).into());
        }

        let candidate = response
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or("No candidates in Gemini response")?;

        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| {
                let reason = candidate
                    .get("finishReason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown");
                format!("No content.parts in Gemini response (finishReason={})", reason)
            })?;

        let combined: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect();

        Ok(combined)
    }

    /// Extract token usage from a Gemini response.
    fn extract_token_usage(response: &Value) -> HashMap<String, i64> {
        let mut usage = HashMap::new();
        if let Some(usage_obj) = response.get("usageMetadata") {
            let prompt = usage_obj
                .get("promptTokenCount")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let completion = usage_obj
                .get("candidatesTokenCount")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            usage.insert("prompt_tokens".to_string(), prompt);
            usage.insert("completion_tokens".to_string(), completion);
            usage.insert("total_tokens".to_string(), prompt + completion);
        }
        usage
    }
}

#[async_trait]
impl BaseLLM for GeminiCompletion {
    fn model(&self) -> &str {
        &self.state.model
    }

    fn provider(&self) -> &str {
        "gemini"
    }

    async fn acall(&self, messages: Vec<LLMMessage>) -> Result<String, LLMError> {
        log::debug!(
            "GeminiCompletion.acall: model={}, messages={}",
            self.state.model,
            messages.len(),
        );

        let api_key = self
            .state
            .api_key
            .as_ref()
            .ok_or("Gemini API key not set")?;

        let body = self.build_request_body(&messages);
        let endpoint = self.api_endpoint();

        // Retry loop with exponential backoff, transient failures only
        let mut last_error: Option<LLMError> = None;
        let mut retry_delay = Duration::from_millis(500);

        for attempt in 0..=self.state.max_retries {
            if attempt > 0 {
                log::warn!("Gemini API retry attempt {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match self
                .client
                .post(&endpoint)
                .header("content-type", "application/json")
                .query(&[("key", api_key.as_str())])
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(Box::new(e));
                    continue;
                }
            };

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_error = Some("Rate limited by Gemini API (429)".into());
                continue;
            }

            if status.is_server_error() {
                last_error = Some(format!("Gemini API server error: {}", status).into());
                continue;
            }

            let response_text = response.text().await?;

            if status.is_client_error() {
                return Err(format!(
                    "Gemini API error ({}): {}",
                    status,
                    response_text.chars().take(500).collect::<String>()
                )
                .into());
            }

            let response_json: Value = serde_json::from_str(&response_text)
                .map_err(|e| format!("Failed to parse Gemini response: {}", e))?;

            let usage = Self::extract_token_usage(&response_json);
            if !usage.is_empty() {
                log::debug!("Gemini usage: {:?}", usage);
            }

            return self.parse_response(&response_json);
        }

        Err(last_error.unwrap_or_else(|| "Gemini API call failed after all retries".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::base_llm::{assistant_message, system_message, user_message};

    fn provider() -> GeminiCompletion {
        GeminiCompletion::new(DEFAULT_MODEL, "test-key", Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_endpoint() {
        let p = provider();
        assert_eq!(
            p.api_endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
        let p = provider().with_base_url("http://localhost:8089/v1/");
        assert_eq!(
            p.api_endpoint(),
            "http://localhost:8089/v1/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_request_body_roles_and_system_instruction() {
        let p = provider().with_temperature(Some(0.7));
        let body = p.build_request_body(&[
            system_message("be kind"),
            user_message("hi"),
            assistant_message("hello, how are you?"),
            user_message("tired"),
        ]);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be kind");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "hello, how are you?");
        assert_eq!(contents[2]["parts"][0]["text"], "tired");
        assert_eq!(body["generationConfig"]["temperature"], 0.7);
    }

    #[test]
    fn test_generation_config_sampling_limits() {
        assert_eq!(provider().generation_config(), serde_json::json!({}));

        let p = provider()
            .with_max_output_tokens(Some(256))
            .with_top_p(Some(0.9));
        let config = p.generation_config();
        assert_eq!(config["maxOutputTokens"], 256);
        assert_eq!(config["topP"], 0.9);
        assert!(config.get("temperature").is_none());
    }

    #[test]
    fn test_parse_response_text() {
        let p = provider();
        let response = serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{"text": "I hear you. "}, {"text": "What helps?"}] }
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 6 }
        });
        assert_eq!(p.parse_response(&response).unwrap(), "I hear you. What helps?");
        let usage = GeminiCompletion::extract_token_usage(&response);
        assert_eq!(usage["total_tokens"], 16);
    }

    #[test]
    fn test_parse_response_errors() {
        let p = provider();
        assert!(p
            .parse_response(&serde_json::json!({"error": {"message": "API key not valid"}}))
            .unwrap_err()
            .to_string()
            .contains("API key not valid"));
        assert!(p.parse_response(&serde_json::json!({"candidates": []})).is_err());
        let blocked = serde_json::json!({"candidates": [{"finishReason": "SAFETY"}]});
        assert!(p.parse_response(&blocked).unwrap_err().to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_unreachable_host_errors() {
        let p = provider().with_base_url("http://127.0.0.1:9");
        assert!(p.acall(vec![user_message("hi")]).await.is_err());
    }
}
