//! Error types for the check-in flow.
//!
//! Only caller-misuse errors ([`FlowError`]) ever reach the transport.
//! Adapter failures live in `vision` and `agent` and are downgraded to
//! fallback values before they leave those modules.

use serde::Serialize;
use thiserror::Error;

/// Where the caller should go next, attached to [`FlowError::NotReady`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum NextStep {
    /// No image has been captured for this session yet.
    Capture,
    /// The given question is waiting for an answer.
    Question { id: u32 },
    /// The analysis is ready to read.
    Results,
    /// The chat is open.
    Chat,
}

/// Errors signalled by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// A stage was requested before its prerequisite stage completed.
    #[error("{what} is not available yet")]
    NotReady { what: &'static str, next: NextStep },

    /// Out-of-sequence question id or a value outside the declared options.
    #[error("invalid answer for question {question_id}: {reason}")]
    InvalidAnswer { question_id: u32, reason: String },

    /// Question id outside `1..=Q`.
    #[error("question {0} not found")]
    QuestionNotFound(u32),

    /// Chat message was empty after trimming.
    #[error("chat message must not be empty")]
    EmptyMessage,
}

impl FlowError {
    /// Short machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotReady { .. } => "not_ready",
            Self::InvalidAnswer { .. } => "invalid_answer",
            Self::QuestionNotFound(_) => "not_found",
            Self::EmptyMessage => "empty_message",
        }
    }
}

/// Startup configuration errors. Any of these prevents the server from serving.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No credential for the language model.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// The question set is malformed.
    #[error("invalid question set: {0}")]
    Questionnaire(String),

    /// The band scheme does not partition the score range.
    #[error("invalid band scheme: {0}")]
    Banding(String),

    /// The agent instruction template failed to compile or render.
    #[error("invalid instruction template: {0}")]
    Template(#[from] tera::Error),

    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: {message}")]
    InvalidEnv { var: &'static str, message: String },

    /// YAML parsing failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Config file I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_error_kinds() {
        let err = FlowError::NotReady {
            what: "analysis",
            next: NextStep::Question { id: 3 },
        };
        assert_eq!(err.kind(), "not_ready");
        assert_eq!(err.to_string(), "analysis is not available yet");
        assert_eq!(FlowError::QuestionNotFound(9).kind(), "not_found");
    }

    #[test]
    fn test_next_step_serializes_tagged() {
        let json = serde_json::to_value(NextStep::Question { id: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"step": "question", "id": 2}));
        let json = serde_json::to_value(NextStep::Capture).unwrap();
        assert_eq!(json, serde_json::json!({"step": "capture"}));
    }
}
