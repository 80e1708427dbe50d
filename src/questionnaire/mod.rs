//! Questionnaire engine.
//!
//! Holds the fixed question set and enforces strictly sequential answering:
//! question `k` can only be answered once questions `1..k` have been, and
//! only with one of its declared option values.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FlowError};

// ---------------------------------------------------------------------------
// Question types
// ---------------------------------------------------------------------------

/// One selectable answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub label: String,
    pub value: u32,
}

impl AnswerOption {
    pub fn new(label: impl Into<String>, value: u32) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// A single question definition. Immutable once the set is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// 1-based position in the set.
    pub id: u32,
    pub prompt: String,
    pub options: Vec<AnswerOption>,
}

impl Question {
    /// Whether `value` is one of this question's declared option values.
    pub fn accepts(&self, value: u32) -> bool {
        self.options.iter().any(|o| o.value == value)
    }

    /// Largest option value, which is this question's contribution to the max score.
    pub fn max_value(&self) -> u32 {
        self.options.iter().map(|o| o.value).max().unwrap_or(0)
    }
}

/// Result of a successfully recorded answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerProgress {
    /// More questions remain; `next` is the id to answer next.
    Next { next: u32 },
    /// The last question has been answered.
    Complete,
}

// ---------------------------------------------------------------------------
// Standard set
// ---------------------------------------------------------------------------

fn three_way(id: u32, prompt: &str, labels: [&str; 3]) -> Question {
    Question {
        id,
        prompt: prompt.to_string(),
        options: vec![
            AnswerOption::new(labels[0], 2),
            AnswerOption::new(labels[1], 1),
            AnswerOption::new(labels[2], 0),
        ],
    }
}

static STANDARD_QUESTIONS: Lazy<Vec<Question>> = Lazy::new(|| {
    vec![
        three_way(
            1,
            "How have you been sleeping lately?",
            ["Great (7+ hours)", "Average", "Poorly"],
        ),
        three_way(2, "How are your energy levels?", ["High", "Moderate", "Low"]),
        three_way(
            3,
            "Have you felt anxious today?",
            ["No", "A little", "Very much"],
        ),
        three_way(4, "How is your focus?", ["Sharp", "Distracted", "Brain fog"]),
        three_way(5, "How is your appetite?", ["Normal", "Irregular", "Poor"]),
        three_way(
            6,
            "How social have you felt?",
            ["Social", "A bit isolated", "Alone"],
        ),
        three_way(
            7,
            "How hopeful are you?",
            ["Optimistic", "Neutral", "Dreading it"],
        ),
    ]
});

// ---------------------------------------------------------------------------
// Questionnaire
// ---------------------------------------------------------------------------

/// The process-wide question set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Questionnaire {
    questions: Vec<Question>,
}

impl Default for Questionnaire {
    fn default() -> Self {
        Self::standard()
    }
}

impl Questionnaire {
    /// The seven-question sleep/energy/anxiety/focus/appetite/social/hope set.
    pub fn standard() -> Self {
        Self {
            questions: STANDARD_QUESTIONS.clone(),
        }
    }

    /// Build a set from explicit questions, validating its shape.
    pub fn new(questions: Vec<Question>) -> Result<Self, ConfigError> {
        let set = Self { questions };
        set.validate()?;
        Ok(set)
    }

    /// Check ids are `1..=Q` in order and every question has distinct options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.questions.is_empty() {
            return Err(ConfigError::Questionnaire(
                "question set is empty".to_string(),
            ));
        }
        for (idx, q) in self.questions.iter().enumerate() {
            let expected = idx as u32 + 1;
            if q.id != expected {
                return Err(ConfigError::Questionnaire(format!(
                    "question at position {} has id {}, expected {}",
                    expected, q.id, expected
                )));
            }
            if q.prompt.trim().is_empty() {
                return Err(ConfigError::Questionnaire(format!(
                    "question {} has an empty prompt",
                    q.id
                )));
            }
            if q.options.is_empty() {
                return Err(ConfigError::Questionnaire(format!(
                    "question {} has no options",
                    q.id
                )));
            }
            let mut values: Vec<u32> = q.options.iter().map(|o| o.value).collect();
            values.sort_unstable();
            values.dedup();
            if values.len() != q.options.len() {
                return Err(ConfigError::Questionnaire(format!(
                    "question {} declares duplicate option values",
                    q.id
                )));
            }
        }
        Ok(())
    }

    /// Number of questions, `Q`.
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Highest reachable score.
    pub fn max_score(&self) -> u32 {
        self.questions.iter().map(Question::max_value).sum()
    }

    /// Look up question `id`.
    pub fn current(&self, id: u32) -> Result<&Question, FlowError> {
        if id == 0 {
            return Err(FlowError::QuestionNotFound(id));
        }
        self.questions
            .get(id as usize - 1)
            .ok_or(FlowError::QuestionNotFound(id))
    }

    /// Append `value` to `answers` if `id` is the next unanswered question and
    /// `value` is one of its options. `answers` is untouched on error.
    pub fn record_answer(
        &self,
        answers: &mut Vec<u32>,
        id: u32,
        value: u32,
    ) -> Result<AnswerProgress, FlowError> {
        let expected = answers.len() as u32 + 1;
        if answers.len() >= self.len() {
            return Err(FlowError::InvalidAnswer {
                question_id: id,
                reason: "all questions have already been answered".to_string(),
            });
        }
        if id != expected {
            return Err(FlowError::InvalidAnswer {
                question_id: id,
                reason: format!("expected an answer for question {}", expected),
            });
        }
        let question = self.current(id)?;
        if !question.accepts(value) {
            return Err(FlowError::InvalidAnswer {
                question_id: id,
                reason: format!("{} is not one of the declared options", value),
            });
        }

        answers.push(value);
        if answers.len() == self.len() {
            Ok(AnswerProgress::Complete)
        } else {
            Ok(AnswerProgress::Next { next: id + 1 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_set_shape() {
        let q = Questionnaire::standard();
        assert_eq!(q.len(), 7);
        assert_eq!(q.max_score(), 14);
        assert!(q.validate().is_ok());
        assert_eq!(q.current(1).unwrap().prompt, "How have you been sleeping lately?");
        assert_eq!(q.current(7).unwrap().options[2].label, "Dreading it");
    }

    #[test]
    fn test_current_out_of_range() {
        let q = Questionnaire::standard();
        assert_eq!(q.current(0), Err(FlowError::QuestionNotFound(0)));
        assert_eq!(q.current(8), Err(FlowError::QuestionNotFound(8)));
    }

    #[test]
    fn test_record_answer_sequential() {
        let q = Questionnaire::standard();
        let mut answers = Vec::new();
        assert_eq!(
            q.record_answer(&mut answers, 1, 2),
            Ok(AnswerProgress::Next { next: 2 })
        );
        assert_eq!(
            q.record_answer(&mut answers, 2, 0),
            Ok(AnswerProgress::Next { next: 3 })
        );
        assert_eq!(answers, vec![2, 0]);
    }

    #[test]
    fn test_record_answer_rejects_out_of_sequence() {
        let q = Questionnaire::standard();
        let mut answers = vec![2, 1];

        // duplicate of an answered question
        let err = q.record_answer(&mut answers, 2, 1).unwrap_err();
        assert!(matches!(err, FlowError::InvalidAnswer { question_id: 2, .. }));
        // skipping ahead
        let err = q.record_answer(&mut answers, 5, 1).unwrap_err();
        assert!(matches!(err, FlowError::InvalidAnswer { question_id: 5, .. }));

        assert_eq!(answers, vec![2, 1]);
    }

    #[test]
    fn test_record_answer_rejects_undeclared_value() {
        let q = Questionnaire::standard();
        let mut answers = Vec::new();
        let err = q.record_answer(&mut answers, 1, 3).unwrap_err();
        assert!(matches!(err, FlowError::InvalidAnswer { question_id: 1, .. }));
        assert!(answers.is_empty());
    }

    #[test]
    fn test_record_answer_completes_and_then_rejects() {
        let q = Questionnaire::standard();
        let mut answers = Vec::new();
        for id in 1..7 {
            q.record_answer(&mut answers, id, 1).unwrap();
        }
        assert_eq!(
            q.record_answer(&mut answers, 7, 1),
            Ok(AnswerProgress::Complete)
        );
        assert!(q.record_answer(&mut answers, 8, 1).is_err());
        assert_eq!(answers.len(), 7);
    }

    #[test]
    fn test_validate_rejects_bad_sets() {
        let gap = vec![
            three_way(1, "a", ["x", "y", "z"]),
            three_way(3, "b", ["x", "y", "z"]),
        ];
        assert!(Questionnaire::new(gap).is_err());

        let mut dup = three_way(1, "a", ["x", "y", "z"]);
        dup.options[1].value = 2;
        assert!(Questionnaire::new(vec![dup]).is_err());

        let empty_opts = Question {
            id: 1,
            prompt: "a".into(),
            options: vec![],
        };
        assert!(Questionnaire::new(vec![empty_opts]).is_err());
        assert!(Questionnaire::new(vec![]).is_err());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
- id: 1
  prompt: "How rested do you feel?"
  options:
    - { label: "Rested", value: 2 }
    - { label: "Tired", value: 0 }
"#;
        let q: Questionnaire = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.max_score(), 2);
    }
}
