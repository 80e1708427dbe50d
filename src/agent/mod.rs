//! Conversational agent adapter.
//!
//! Builds a bounded-context request from the session analysis plus the last
//! few dialogue turns and forwards it to a [`BaseLLM`]. A turn never fails:
//! network, auth, quota, timeout and empty replies all become
//! [`AgentReply::Fallback`] with the fixed [`APOLOGY`] text.

pub mod prompt;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llms::base_llm::{assistant_message, system_message, user_message, BaseLLM, LLMMessage};
use crate::session::{Analysis, Speaker, Turn};

pub use prompt::{InstructionTemplate, DEFAULT_INSTRUCTION};

/// Reply used whenever the model cannot produce one.
pub const APOLOGY: &str = "I'm listening, but I had a technical hiccup. Could you try again?";

/// Default number of prior turns sent with each request.
pub const DEFAULT_HISTORY_WINDOW: usize = 4;

/// Default sentence bound given to the model.
pub const DEFAULT_MAX_SENTENCES: u32 = 3;

// ---------------------------------------------------------------------------
// History window
// ---------------------------------------------------------------------------

/// How much prior dialogue accompanies each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowRepr", into = "WindowRepr")]
pub enum HistoryWindow {
    /// The most recent `n` turns.
    Last(usize),
    /// The whole dialogue.
    All,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::Last(DEFAULT_HISTORY_WINDOW)
    }
}

impl HistoryWindow {
    /// The trailing slice of `history` this window admits.
    pub fn apply<'a>(&self, history: &'a [Turn]) -> &'a [Turn] {
        match *self {
            Self::All => history,
            Self::Last(n) => &history[history.len().saturating_sub(n)..],
        }
    }
}

impl std::str::FromStr for HistoryWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<usize>()
            .map(Self::Last)
            .map_err(|_| format!("expected a turn count or 'all', got '{}'", s))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WindowRepr {
    Count(usize),
    Keyword(String),
}

impl TryFrom<WindowRepr> for HistoryWindow {
    type Error = String;

    fn try_from(repr: WindowRepr) -> Result<Self, Self::Error> {
        match repr {
            WindowRepr::Count(n) => Ok(Self::Last(n)),
            WindowRepr::Keyword(s) => s.parse(),
        }
    }
}

impl From<HistoryWindow> for WindowRepr {
    fn from(window: HistoryWindow) -> Self {
        match window {
            HistoryWindow::Last(n) => WindowRepr::Count(n),
            HistoryWindow::All => WindowRepr::Keyword("all".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Why a reply fell back. Internal to the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AgentError {
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("agent returned an empty reply")]
    EmptyReply,

    #[error("instruction rendering failed: {0}")]
    Prompt(String),
}

/// Outcome of one agent turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentReply {
    Generated { text: String },
    Fallback { text: String, cause: AgentError },
}

impl AgentReply {
    fn fallback(cause: AgentError) -> Self {
        Self::Fallback {
            text: APOLOGY.to_string(),
            cause,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Generated { text } | Self::Fallback { text, .. } => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

// ---------------------------------------------------------------------------
// ChatAgent
// ---------------------------------------------------------------------------

/// Tunables for [`ChatAgent`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub history_window: HistoryWindow,
    pub timeout: Duration,
    pub max_sentences: u32,
    pub instruction: InstructionTemplate,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            history_window: HistoryWindow::default(),
            timeout: Duration::from_secs(30),
            max_sentences: DEFAULT_MAX_SENTENCES,
            instruction: InstructionTemplate::default(),
        }
    }
}

/// Failure-containing wrapper around a language model.
#[derive(Clone)]
pub struct ChatAgent {
    llm: Arc<dyn BaseLLM>,
    settings: AgentSettings,
}

impl fmt::Debug for ChatAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatAgent")
            .field("provider", &self.llm.provider())
            .field("model", &self.llm.model())
            .field("history_window", &self.settings.history_window)
            .field("timeout", &self.settings.timeout)
            .finish()
    }
}

impl ChatAgent {
    pub fn new(llm: Arc<dyn BaseLLM>, settings: AgentSettings) -> Self {
        Self { llm, settings }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Assemble the request: the instruction block, the windowed history,
    /// then the new user message.
    ///
    /// `history` must not already contain `message`.
    pub fn build_messages(
        &self,
        message: &str,
        history: &[Turn],
        analysis: &Analysis,
    ) -> Result<Vec<LLMMessage>, AgentError> {
        let instruction = self
            .settings
            .instruction
            .render(analysis, self.settings.max_sentences)
            .map_err(|e| AgentError::Prompt(e.to_string()))?;

        let window = self.settings.history_window.apply(history);
        let mut messages = Vec::with_capacity(window.len() + 2);
        messages.push(system_message(instruction));
        for turn in window {
            messages.push(match turn.speaker {
                Speaker::User => user_message(turn.text.as_str()),
                Speaker::Agent => assistant_message(turn.text.as_str()),
            });
        }
        messages.push(user_message(message));
        Ok(messages)
    }

    /// Produce a reply to `message`. Never fails.
    pub async fn reply(&self, message: &str, history: &[Turn], analysis: &Analysis) -> AgentReply {
        let messages = match self.build_messages(message, history, analysis) {
            Ok(messages) => messages,
            Err(cause) => {
                tracing::error!(error = %cause, "could not build agent request");
                return AgentReply::fallback(cause);
            }
        };
        let sent = messages.len();

        let result = match tokio::time::timeout(self.settings.timeout, self.llm.acall(messages)).await {
            Ok(Ok(text)) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    Err(AgentError::EmptyReply)
                } else {
                    Ok(text)
                }
            }
            Ok(Err(e)) => Err(AgentError::Unavailable(e.to_string())),
            Err(_) => Err(AgentError::Timeout(self.settings.timeout)),
        };

        match result {
            Ok(text) => {
                tracing::debug!(
                    provider = self.llm.provider(),
                    model = self.llm.model(),
                    messages = sent,
                    reply_chars = text.len(),
                    "agent replied"
                );
                AgentReply::Generated { text }
            }
            Err(cause) => {
                tracing::warn!(
                    provider = self.llm.provider(),
                    model = self.llm.model(),
                    error = %cause,
                    "agent failed, replying with apology"
                );
                AgentReply::fallback(cause)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llms::base_llm::{content_of, role_of, LLMError};
    use std::sync::Mutex;

    /// LLM stub that records requests and answers from a script.
    #[derive(Debug)]
    pub(crate) struct ScriptedLLM {
        pub reply: Result<String, String>,
        pub delay: Option<Duration>,
        pub seen: Mutex<Vec<Vec<LLMMessage>>>,
    }

    impl ScriptedLLM {
        pub(crate) fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn failing(error: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(error.to_string()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl BaseLLM for ScriptedLLM {
        fn model(&self) -> &str {
            "scripted"
        }

        fn provider(&self) -> &str {
            "test"
        }

        async fn acall(&self, messages: Vec<LLMMessage>) -> Result<String, LLMError> {
            self.seen.lock().unwrap().push(messages);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone().map_err(LLMError::from)
        }
    }

    fn analysis() -> Analysis {
        Analysis {
            face_label: "sad".into(),
            face_description: "Somber/Heavy-hearted".into(),
            score: 6,
            max_score: 14,
            band_label: "Distressful".into(),
            band_color: "#ff4757".into(),
        }
    }

    fn history(n: usize) -> Vec<Turn> {
        (0..n)
            .map(|i| {
                let speaker = if i % 2 == 0 { Speaker::User } else { Speaker::Agent };
                Turn::new(speaker, format!("turn {}", i))
            })
            .collect()
    }

    #[test]
    fn test_history_window_parsing() {
        assert_eq!("all".parse::<HistoryWindow>(), Ok(HistoryWindow::All));
        assert_eq!("ALL".parse::<HistoryWindow>(), Ok(HistoryWindow::All));
        assert_eq!("6".parse::<HistoryWindow>(), Ok(HistoryWindow::Last(6)));
        assert!("six".parse::<HistoryWindow>().is_err());

        let w: HistoryWindow = serde_yaml::from_str("4").unwrap();
        assert_eq!(w, HistoryWindow::Last(4));
        let w: HistoryWindow = serde_yaml::from_str("all").unwrap();
        assert_eq!(w, HistoryWindow::All);
    }

    #[test]
    fn test_history_window_apply() {
        let h = history(10);
        assert_eq!(HistoryWindow::Last(4).apply(&h).len(), 4);
        assert_eq!(HistoryWindow::Last(4).apply(&h)[0].text, "turn 6");
        assert_eq!(HistoryWindow::Last(20).apply(&h).len(), 10);
        assert_eq!(HistoryWindow::Last(0).apply(&h).len(), 0);
        assert_eq!(HistoryWindow::All.apply(&h).len(), 10);
    }

    #[test]
    fn test_build_messages_windowed() {
        let agent = ChatAgent::new(ScriptedLLM::ok("x"), AgentSettings::default());
        let messages = agent.build_messages("hello", &history(9), &analysis()).unwrap();

        // instruction + 4 windowed turns + the new message
        assert_eq!(messages.len(), 6);
        assert_eq!(role_of(&messages[0]), "system");
        assert!(content_of(&messages[0]).contains("Distressful"));
        assert!(content_of(&messages[0]).contains("6/14"));
        assert!(content_of(&messages[0]).contains("Somber/Heavy-hearted"));
        assert_eq!(content_of(&messages[1]), "turn 5");
        assert_eq!(role_of(&messages[1]), "assistant");
        assert_eq!(role_of(&messages[4]), "user");
        assert_eq!(content_of(&messages[5]), "hello");
    }

    #[tokio::test]
    async fn test_reply_generated() {
        let llm = ScriptedLLM::ok("  That sounds hard. What would help tonight?  ");
        let agent = ChatAgent::new(llm.clone(), AgentSettings::default());
        let reply = agent.reply("hello", &[], &analysis()).await;
        assert_eq!(
            reply,
            AgentReply::Generated {
                text: "That sounds hard. What would help tonight?".into()
            }
        );
        assert_eq!(llm.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_falls_back_on_error() {
        let agent = ChatAgent::new(ScriptedLLM::failing("quota exceeded"), AgentSettings::default());
        let reply = agent.reply("hello", &[], &analysis()).await;
        assert!(reply.is_fallback());
        assert_eq!(reply.text(), APOLOGY);
        assert_eq!(
            reply,
            AgentReply::Fallback {
                text: APOLOGY.into(),
                cause: AgentError::Unavailable("quota exceeded".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_reply_falls_back_on_empty_text() {
        let agent = ChatAgent::new(ScriptedLLM::ok("   "), AgentSettings::default());
        let reply = agent.reply("hello", &[], &analysis()).await;
        assert!(matches!(
            reply,
            AgentReply::Fallback {
                cause: AgentError::EmptyReply,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reply_falls_back_on_timeout() {
        let llm = Arc::new(ScriptedLLM {
            reply: Ok("late".into()),
            delay: Some(Duration::from_secs(5)),
            seen: Mutex::new(Vec::new()),
        });
        let settings = AgentSettings {
            timeout: Duration::from_millis(50),
            ..AgentSettings::default()
        };
        let agent = ChatAgent::new(llm, settings);
        let reply = agent.reply("hello", &[], &analysis()).await;
        assert!(matches!(
            reply,
            AgentReply::Fallback {
                cause: AgentError::Timeout(_),
                ..
            }
        ));
    }
}
