//! Instruction block for the conversational agent, rendered with Tera.
//!
//! Available variables: `face_description`, `face_label`, `score`,
//! `max_score`, `band_label`, `max_sentences`.

use tera::{Context, Tera};

use crate::session::Analysis;

/// Default instruction text.
pub const DEFAULT_INSTRUCTION: &str = "You are a kind AI therapist. User status: \
Mood is {{ band_label }} (Quiz Score: {{ score }}/{{ max_score }}). \
They look {{ face_description }} on camera. \
Stay empathetic, keep it under {{ max_sentences }} sentences, and ask a question.";

const TEMPLATE_NAME: &str = "instruction";

/// A compiled instruction template.
#[derive(Debug, Clone)]
pub struct InstructionTemplate {
    tera: Tera,
}

impl Default for InstructionTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTION).expect("default instruction template is valid")
    }
}

impl InstructionTemplate {
    /// Compile `source` and dry-render it against a sample analysis so that
    /// unknown variables are caught at startup rather than mid-conversation.
    pub fn new(source: &str) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, source)?;
        let template = Self { tera };

        let sample = Analysis {
            face_label: "neutral".to_string(),
            face_description: "Balanced/Calm".to_string(),
            score: 0,
            max_score: 0,
            band_label: "sample".to_string(),
            band_color: "#000000".to_string(),
        };
        template.render(&sample, 3)?;
        Ok(template)
    }

    pub fn render(&self, analysis: &Analysis, max_sentences: u32) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("face_description", &analysis.face_description);
        context.insert("face_label", &analysis.face_label);
        context.insert("score", &analysis.score);
        context.insert("max_score", &analysis.max_score);
        context.insert("band_label", &analysis.band_label);
        context.insert("max_sentences", &max_sentences);
        self.tera.render(TEMPLATE_NAME, &context)
    }
}
