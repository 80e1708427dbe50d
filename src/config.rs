//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file named by
//! `MOODSCAN_CONFIG`, then environment variables. Credentials come from the
//! environment only and are never read from or written to the YAML file.
//!
//! # Environment Variables
//!
//! - `MOODSCAN_CONFIG` - path to a YAML config file
//! - `PORT` - HTTP port (default: 8080)
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY` - language model credential (required)
//! - `GEMINI_MODEL` - model name (default: `gemini-1.5-flash`)
//! - `VISION_URL` - DeepFace-compatible analyze endpoint
//! - `VISION_API_KEY` - optional bearer token for the vision endpoint
//! - `ADAPTER_TIMEOUT_SECS` - per-call deadline for both adapters (default: 30)
//! - `HISTORY_WINDOW` - prior turns sent to the agent, or `all` (default: 4)
//! - `AGENT_MAX_RETRIES` - retries on transient model errors (default: 0)
//! - `SESSION_TTL_SECS` - idle session lifetime (default: 3600)

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::agent::{
    AgentSettings, ChatAgent, HistoryWindow, InstructionTemplate, DEFAULT_INSTRUCTION,
    DEFAULT_MAX_SENTENCES,
};
use crate::error::ConfigError;
use crate::llms::providers::gemini::DEFAULT_MODEL;
use crate::llms::BaseLLM;
use crate::questionnaire::Questionnaire;
use crate::scoring::BandScheme;
use crate::session::CheckInFlow;
use crate::vision::{ClassifierAdapter, EmotionClassifier};

/// Default analyze endpoint of a locally running DeepFace API.
pub const DEFAULT_VISION_URL: &str = "http://localhost:5000/analyze";

/// Language model settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: Option<f64>,
    /// Upper bound on reply length, in tokens.
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub max_retries: u32,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_output_tokens: None,
            top_p: None,
            max_retries: 0,
            api_key: None,
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("top_p", &self.top_p)
            .field("max_retries", &self.max_retries)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Vision classifier settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub url: String,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_VISION_URL.to_string(),
            api_key: None,
        }
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Full server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    pub llm: LlmConfig,
    pub vision: VisionConfig,
    pub adapter_timeout_secs: u64,
    pub history_window: HistoryWindow,
    pub max_sentences: u32,
    pub session_ttl_secs: u64,
    /// Tera template for the agent's instruction block.
    pub instruction: String,
    pub questions: Questionnaire,
    pub bands: BandScheme,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            llm: LlmConfig::default(),
            vision: VisionConfig::default(),
            adapter_timeout_secs: 30,
            history_window: HistoryWindow::default(),
            max_sentences: DEFAULT_MAX_SENTENCES,
            session_ttl_secs: 3600,
            instruction: DEFAULT_INSTRUCTION.to_string(),
            questions: Questionnaire::standard(),
            bands: BandScheme::standard(),
        }
    }
}

impl AppConfig {
    /// Parse from a YAML string. Missing keys keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` for environment values and validate.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("MOODSCAN_CONFIG").filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                tracing::info!(path = %path, "loading config file");
                Self::from_yaml_file(path.trim())?
            }
            None => Self::default(),
        };
        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment values on top of the current settings.
    pub fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = parse_env(&get, "PORT")? {
            self.port = port;
        }
        if let Some(key) = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.llm.model = model;
        }
        if let Some(retries) = parse_env(&get, "AGENT_MAX_RETRIES")? {
            self.llm.max_retries = retries;
        }
        if let Some(url) = get("VISION_URL") {
            self.vision.url = url;
        }
        if let Some(key) = get("VISION_API_KEY") {
            self.vision.api_key = Some(key);
        }
        if let Some(secs) = parse_env(&get, "ADAPTER_TIMEOUT_SECS")? {
            self.adapter_timeout_secs = secs;
        }
        if let Some(window) = parse_env(&get, "HISTORY_WINDOW")? {
            self.history_window = window;
        }
        if let Some(secs) = parse_env(&get, "SESSION_TTL_SECS")? {
            self.session_ttl_secs = secs;
        }
        Ok(())
    }

    /// Check everything the server needs before it starts serving.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.is_none() {
            return Err(ConfigError::MissingCredential("GEMINI_API_KEY"));
        }
        if self.adapter_timeout_secs == 0 {
            return Err(ConfigError::InvalidEnv {
                var: "ADAPTER_TIMEOUT_SECS",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.session_ttl_secs == 0 {
            return Err(ConfigError::InvalidEnv {
                var: "SESSION_TTL_SECS",
                message: "must be greater than zero".to_string(),
            });
        }
        self.questions.validate()?;
        self.bands.validate(self.questions.max_score())?;
        InstructionTemplate::new(&self.instruction)?;
        Ok(())
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn agent_settings(&self) -> Result<AgentSettings, ConfigError> {
        Ok(AgentSettings {
            history_window: self.history_window,
            timeout: self.adapter_timeout(),
            max_sentences: self.max_sentences,
            instruction: InstructionTemplate::new(&self.instruction)?,
        })
    }

    /// Assemble the check-in flow around the given adapters.
    pub fn build_flow(
        &self,
        classifier: Arc<dyn EmotionClassifier>,
        llm: Arc<dyn BaseLLM>,
    ) -> Result<CheckInFlow, ConfigError> {
        Ok(CheckInFlow::new(
            self.questions.clone(),
            self.bands.clone(),
            ClassifierAdapter::new(classifier, self.adapter_timeout()),
            ChatAgent::new(llm, self.agent_settings()?),
        ))
    }
}

fn parse_env<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                var,
                message: e.to_string(),
            })
        })
        .transpose()
}
