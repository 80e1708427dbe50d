//! # moodscan
//!
//! A guided emotional check-in service. A session captures one webcam frame
//! and labels the visible emotion, walks the user through a short scored
//! questionnaire, maps the score onto a mood band, and then opens a
//! conversation with a language-model agent primed with those results.
//!
//! External classifiers and language models are wrapped in adapters that
//! never fail outward: a broken dependency yields a typed fallback value
//! (`neutral` for the face, an apology for the agent) and the flow goes on.

pub mod agent;
pub mod config;
pub mod error;
pub mod llms;
pub mod narrative;
pub mod questionnaire;
pub mod scoring;
pub mod server;
pub mod session;
pub mod vision;

pub use agent::{AgentReply, ChatAgent, HistoryWindow};
pub use config::AppConfig;
pub use error::{ConfigError, FlowError, NextStep};
pub use llms::base_llm::BaseLLM;
pub use questionnaire::{AnswerProgress, Question, Questionnaire};
pub use scoring::{Band, BandScheme};
pub use session::{Analysis, CheckInFlow, SessionRecord, SessionStore, Stage, Turn};
pub use vision::{ClassifierAdapter, ClassifierOutcome, EmotionClassifier};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
