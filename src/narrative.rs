//! Emotion label to narrative phrase mapping.

/// Translate a raw classifier label into the phrase shown to the user and the agent.
///
/// Matching is case-insensitive. Unknown labels are echoed back capitalized.
pub fn describe_emotion(label: &str) -> String {
    let normalized = label.trim().to_lowercase();
    let phrase = match normalized.as_str() {
        "happy" => "Cheerful/Radiant",
        "sad" => "Somber/Heavy-hearted",
        "angry" => "Frustrated",
        "fear" => "Anxious",
        "neutral" => "Balanced/Calm",
        "disgust" => "Uncomfortable",
        "surprise" => "Unsettled",
        _ => return capitalize(&normalized),
    };
    phrase.to_string()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
