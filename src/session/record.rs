//! The per-session record and the stage derived from it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::NextStep;
use crate::vision::ClassifierOutcome;

/// Who said a dialogue line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

/// One line of dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Results computed once the questionnaire is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    /// Raw classifier label the description was derived from.
    pub face_label: String,
    pub face_description: String,
    pub score: u32,
    pub max_score: u32,
    pub band_label: String,
    pub band_color: String,
}

/// The capture that opened the current session cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capture {
    pub outcome: ClassifierOutcome,
    pub captured_at: DateTime<Utc>,
}

/// Position in the check-in flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Captured,
    /// `answered` questions recorded, `0 < answered < Q`.
    Answering { answered: usize },
    Scored,
    Chatting,
}

/// Mutable state for one user session.
///
/// Fields change only through the flow in `session::machine`, which enforces
/// stage order. Everything here is dropped by the next capture.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    id: Uuid,
    capture: Option<Capture>,
    answers: Vec<u32>,
    analysis: Option<Analysis>,
    dialogue: Vec<Turn>,
    created_at: DateTime<Utc>,
    touched_at: DateTime<Utc>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            capture: None,
            answers: Vec::new(),
            analysis: None,
            dialogue: Vec::new(),
            created_at: now,
            touched_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn capture(&self) -> Option<&Capture> {
        self.capture.as_ref()
    }

    /// Raw classifier label, once captured.
    pub fn face_label(&self) -> Option<&str> {
        self.capture.as_ref().map(|c| c.outcome.label())
    }

    pub fn answers(&self) -> &[u32] {
        &self.answers
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn dialogue(&self) -> &[Turn] {
        &self.dialogue
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn touched_at(&self) -> DateTime<Utc> {
        self.touched_at
    }

    /// Derive the stage from what has been recorded so far.
    pub fn stage(&self) -> Stage {
        match (&self.capture, &self.analysis) {
            (None, _) => Stage::Idle,
            (Some(_), Some(_)) if !self.dialogue.is_empty() => Stage::Chatting,
            (Some(_), Some(_)) => Stage::Scored,
            (Some(_), None) if self.answers.is_empty() => Stage::Captured,
            (Some(_), None) => Stage::Answering {
                answered: self.answers.len(),
            },
        }
    }

    /// Where the caller should go next.
    pub fn next_step(&self) -> NextStep {
        match (&self.capture, &self.analysis) {
            (None, _) => NextStep::Capture,
            (Some(_), None) => NextStep::Question {
                id: self.answers.len() as u32 + 1,
            },
            (Some(_), Some(_)) if self.dialogue.is_empty() => NextStep::Results,
            (Some(_), Some(_)) => NextStep::Chat,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.touched_at = Utc::now();
    }

    /// Discard everything and start a new cycle from `outcome`.
    pub(crate) fn begin_capture(&mut self, outcome: ClassifierOutcome) {
        self.capture = Some(Capture {
            outcome,
            captured_at: Utc::now(),
        });
        self.answers.clear();
        self.analysis = None;
        self.dialogue.clear();
        self.touch();
    }

    pub(crate) fn answers_mut(&mut self) -> &mut Vec<u32> {
        &mut self.answers
    }

    /// Store a fresh analysis; the dialogue restarts with it.
    pub(crate) fn set_analysis(&mut self, analysis: Analysis) {
        self.analysis = Some(analysis);
        self.dialogue.clear();
    }

    pub(crate) fn push_turn(&mut self, turn: Turn) {
        self.dialogue.push(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected() -> ClassifierOutcome {
        ClassifierOutcome::Detected {
            label: "sad".into(),
            confidence: 0.7,
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

    #[test]
    fn test_stage_progression() {
        let mut record = SessionRecord::new();
        assert_eq!(record.stage(), Stage::Idle);
        assert_eq!(record.next_step(), NextStep::Capture);
        assert_eq!(record.face_label(), None);

        record.begin_capture(detected());
        assert_eq!(record.stage(), Stage::Captured);
        assert_eq!(record.face_label(), Some("sad"));
        assert_eq!(record.next_step(), NextStep::Question { id: 1 });

        record.answers_mut().extend([1, 1, 1]);
        assert_eq!(record.stage(), Stage::Answering { answered: 3 });
        assert_eq!(record.next_step(), NextStep::Question { id: 4 });

        record.answers_mut().extend([0, 1, 1, 1]);
        record.set_analysis(analysis());
        assert_eq!(record.stage(), Stage::Scored);
        assert_eq!(record.next_step(), NextStep::Results);

        record.push_turn(Turn::new(Speaker::User, "hi"));
        assert_eq!(record.stage(), Stage::Chatting);
        assert_eq!(record.next_step(), NextStep::Chat);
    }

    #[test]
    fn test_begin_capture_resets_everything() {
        let mut record = SessionRecord::new();
        record.begin_capture(detected());
        record.answers_mut().extend([2; 7]);
        record.set_analysis(analysis());
        record.push_turn(Turn::new(Speaker::User, "hi"));

        record.begin_capture(ClassifierOutcome::Detected {
            label: "happy".into(),
            confidence: 0.9,
        });
        assert!(record.answers().is_empty());
        assert!(record.analysis().is_none());
        assert!(record.dialogue().is_empty());
        assert_eq!(record.face_label(), Some("happy"));
        assert_eq!(record.stage(), Stage::Captured);
    }

    #[test]
    fn test_set_analysis_clears_dialogue() {
        let mut record = SessionRecord::new();
        record.begin_capture(detected());
        record.push_turn(Turn::new(Speaker::Agent, "old"));
        record.set_analysis(analysis());
        assert!(record.dialogue().is_empty());
    }

    #[test]
    fn test_speaker_serializes_lowercase() {
        let turn = Turn::new(Speaker::Agent, "hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["speaker"], "agent");
        assert_eq!(json["text"], "hello");
    }
}
