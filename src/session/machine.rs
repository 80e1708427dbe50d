//! The check-in state machine.
//!
//! [`CheckInFlow`] owns the process-wide pieces (question set, band scheme,
//! classifier and agent adapters) and applies stage transitions to a
//! [`SessionRecord`] handed in by the caller. It keeps no per-session state
//! of its own; serializing operations on one record is the caller's job.
//!
//! ```text
//! Idle --capture--> Captured --answer 1--> Answering(1) ... --answer Q--> Scored --chat--> Chatting
//!   ^                                                                                        |
//!   +------------------------------------ capture (full reset) ------------------------------+
//! ```

use std::sync::Arc;

use serde::Serialize;

use super::record::{Analysis, SessionRecord, Speaker, Turn};
use crate::agent::{AgentReply, ChatAgent};
use crate::error::{FlowError, NextStep};
use crate::narrative::describe_emotion;
use crate::questionnaire::{AnswerProgress, Question, Questionnaire};
use crate::scoring::{self, BandScheme};
use crate::vision::{ClassifierAdapter, ClassifierOutcome};

/// The two turns appended by one chat exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatExchange {
    pub user: Turn,
    pub agent: Turn,
    /// Whether the agent turn is the apology fallback.
    pub fallback: bool,
}

/// Coordinator for the capture, quiz, results and chat stages.
#[derive(Debug, Clone)]
pub struct CheckInFlow {
    questionnaire: Arc<Questionnaire>,
    bands: Arc<BandScheme>,
    classifier: ClassifierAdapter,
    agent: ChatAgent,
}

impl CheckInFlow {
    pub fn new(
        questionnaire: Questionnaire,
        bands: BandScheme,
        classifier: ClassifierAdapter,
        agent: ChatAgent,
    ) -> Self {
        Self {
            questionnaire: Arc::new(questionnaire),
            bands: Arc::new(bands),
            classifier,
            agent,
        }
    }

    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    pub fn bands(&self) -> &BandScheme {
        &self.bands
    }

    pub fn classifier(&self) -> &ClassifierAdapter {
        &self.classifier
    }

    /// Start a new cycle from a captured image. Any prior answers, analysis
    /// and dialogue are discarded. Always succeeds.
    pub async fn submit_capture(&self, record: &mut SessionRecord, image: &str) -> ClassifierOutcome {
        let outcome = self.classifier.classify(image).await;
        tracing::info!(
            session_id = %record.id(),
            label = outcome.label(),
            fallback = outcome.is_fallback(),
            "capture recorded"
        );
        record.begin_capture(outcome.clone());
        outcome
    }

    /// Question `id`, independent of any session.
    pub fn get_question(&self, id: u32) -> Result<&Question, FlowError> {
        self.questionnaire.current(id)
    }

    /// Record the answer to question `id`. On the last question the analysis
    /// is computed and the dialogue reset.
    ///
    /// `value` is taken as a signed integer so that negative submissions are
    /// reported as [`FlowError::InvalidAnswer`] rather than failing to parse.
    pub fn submit_answer(
        &self,
        record: &mut SessionRecord,
        id: u32,
        value: i64,
    ) -> Result<AnswerProgress, FlowError> {
        record.touch();
        let Some(face_label) = record.face_label().map(str::to_string) else {
            return Err(FlowError::NotReady {
                what: "questionnaire",
                next: NextStep::Capture,
            });
        };

        let value = u32::try_from(value).map_err(|_| FlowError::InvalidAnswer {
            question_id: id,
            reason: format!("{} is not one of the declared options", value),
        })?;

        let progress = match self.questionnaire.record_answer(record.answers_mut(), id, value) {
            Ok(progress) => progress,
            Err(e) => {
                tracing::debug!(session_id = %record.id(), question_id = id, error = %e, "answer rejected");
                return Err(e);
            }
        };

        if progress == AnswerProgress::Complete {
            let analysis = self.analyze(&face_label, record.answers());
            tracing::info!(
                session_id = %record.id(),
                score = analysis.score,
                band = %analysis.band_label,
                scheme = %self.bands.name,
                "questionnaire scored"
            );
            record.set_analysis(analysis);
        }

        Ok(progress)
    }

    fn analyze(&self, face_label: &str, answers: &[u32]) -> Analysis {
        let score = scoring::score(answers);
        let band = self.bands.classify(score);
        Analysis {
            face_label: face_label.to_string(),
            face_description: describe_emotion(face_label),
            score,
            max_score: self.questionnaire.max_score(),
            band_label: band.label.clone(),
            band_color: band.color.clone(),
        }
    }

    /// The analysis, once every question has been answered.
    pub fn get_analysis<'a>(&self, record: &'a SessionRecord) -> Result<&'a Analysis, FlowError> {
        record.analysis().ok_or_else(|| FlowError::NotReady {
            what: "analysis",
            next: record.next_step(),
        })
    }

    /// Send `text` to the agent and record both turns. Rejected without
    /// touching the dialogue if the session has not been scored; the chat
    /// only opens from a fresh capture, so the hint is always `capture`.
    pub async fn submit_chat_message(
        &self,
        record: &mut SessionRecord,
        text: &str,
    ) -> Result<ChatExchange, FlowError> {
        record.touch();
        let analysis = record
            .analysis()
            .cloned()
            .ok_or_else(|| FlowError::NotReady {
                what: "chat",
                next: NextStep::Capture,
            })?;

        let text = text.trim();
        if text.is_empty() {
            return Err(FlowError::EmptyMessage);
        }

        let reply = self.agent.reply(text, record.dialogue(), &analysis).await;
        let fallback = reply.is_fallback();
        let reply_text = match reply {
            AgentReply::Generated { text } | AgentReply::Fallback { text, .. } => text,
        };

        let user = Turn::new(Speaker::User, text);
        let agent = Turn::new(Speaker::Agent, reply_text);
        record.push_turn(user.clone());
        record.push_turn(agent.clone());

        tracing::debug!(
            session_id = %record.id(),
            turns = record.dialogue().len(),
            fallback,
            "chat turn recorded"
        );

        Ok(ChatExchange {
            user,
            agent,
            fallback,
        })
    }

    /// Dialogue so far, once the session has been scored. Empty until the
    /// first chat turn.
    pub fn get_dialogue_history<'a>(
        &self,
        record: &'a SessionRecord,
    ) -> Result<&'a [Turn], FlowError> {
        if record.analysis().is_none() {
            return Err(FlowError::NotReady {
                what: "dialogue",
                next: NextStep::Capture,
            });
        }
        Ok(record.dialogue())
    }

    /// Opening line shown above the dialogue.
    pub fn greeting(analysis: &Analysis) -> String {
        format!(
            "Hello. Your results show a {} mood. I am here for you.",
            analysis.band_label
        )
    }
}
