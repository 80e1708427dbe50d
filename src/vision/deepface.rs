//! DeepFace-style HTTP emotion classifier.
//!
//! Talks to a service exposing the DeepFace `analyze` contract:
//!
//! ```text
//! POST {endpoint}
//! { "img": "data:image/jpeg;base64,...", "actions": ["emotion"], "enforce_detection": false }
//!
//! 200 OK
//! { "results": [ { "dominant_emotion": "happy", "emotion": { "happy": 93.1, ... } } ] }
//! ```
//!
//! A bare object with `dominant_emotion` at the top level is accepted as well.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ClassifierError, Detection, EmotionClassifier, ImagePayload};

/// HTTP client for a DeepFace-compatible analyze endpoint.
#[derive(Debug, Clone)]
pub struct DeepFaceClassifier {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl DeepFaceClassifier {
    /// Create a classifier for `endpoint`.
    ///
    /// `timeout` bounds each HTTP request; the adapter applies its own
    /// deadline on top.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the analyze request body.
    pub fn build_request_body(image: &ImagePayload) -> Value {
        serde_json::json!({
            "img": image.to_data_url(),
            "actions": ["emotion"],
            "enforce_detection": false,
        })
    }

    /// Extract the dominant emotion and its confidence from a response.
    pub fn parse_response(response: &Value) -> Result<Detection, ClassifierError> {
        if let Some(error) = response.get("error").and_then(|e| e.as_str()) {
            return Err(ClassifierError::Unavailable(error.to_string()));
        }

        let analysis = match response.get("results").and_then(|r| r.as_array()) {
            Some(results) => results.first().ok_or_else(|| {
                ClassifierError::MalformedResponse("empty results array".to_string())
            })?,
            None => response,
        };

        let label = analysis
            .get("dominant_emotion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ClassifierError::MalformedResponse("missing dominant_emotion".to_string())
            })?
            .to_string();

        // DeepFace reports per-emotion scores as percentages.
        let confidence = analysis
            .get("emotion")
            .and_then(|scores| scores.get(&label))
            .and_then(|v| v.as_f64())
            .map(|pct| (pct / 100.0) as f32)
            .unwrap_or(1.0);

        Ok(Detection { label, confidence })
    }
}

#[async_trait]
impl EmotionClassifier for DeepFaceClassifier {
    fn name(&self) -> &str {
        "deepface"
    }

    async fn classify(&self, image: &ImagePayload) -> Result<Detection, ClassifierError> {
        let body = Self::build_request_body(image);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("authorization", format!("Bearer {}", key));
        }

        let response = request.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Unavailable(format!("request timed out: {}", e))
            } else {
                ClassifierError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(ClassifierError::Unavailable(format!(
                "analyze returned {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| ClassifierError::MalformedResponse(e.to_string()))?;
        Self::parse_response(&json)
    }
}
