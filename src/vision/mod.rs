//! Emotion classifier adapter.
//!
//! Turns a transport-supplied image blob into a raw emotion label through an
//! external facial-emotion model. The adapter never fails: every error path
//! (missing or malformed data, an unreachable model, a timeout, an unreadable
//! response) yields [`ClassifierOutcome::Fallback`] carrying
//! [`FALLBACK_LABEL`] and the cause.
//!
//! # Image input
//!
//! Images arrive as base64, usually as a browser data URL such as
//! `data:image/jpeg;base64,/9j/4AAQ...`. The header is stripped, the payload
//! decoded, and the bytes must start with a known image signature.

pub mod deepface;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

pub use deepface::DeepFaceClassifier;

/// Label substituted whenever classification fails.
pub const FALLBACK_LABEL: &str = "neutral";

static DATA_URL_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:[^,]*?;base64,").expect("valid data URL pattern"));

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Why classification fell back. Never surfaced to the transport as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ClassifierError {
    #[error("no image data supplied")]
    MissingImage,

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier returned an unreadable response: {0}")]
    MalformedResponse(String),
}

/// A label the model actually produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Result of one capture classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClassifierOutcome {
    Detected { label: String, confidence: f32 },
    Fallback { label: String, cause: ClassifierError },
}

impl ClassifierOutcome {
    fn fallback(cause: ClassifierError) -> Self {
        Self::Fallback {
            label: FALLBACK_LABEL.to_string(),
            cause,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Detected { label, .. } | Self::Fallback { label, .. } => label,
        }
    }

    /// Zero for fallbacks.
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Detected { confidence, .. } => *confidence,
            Self::Fallback { .. } => 0.0,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

// ---------------------------------------------------------------------------
// Decoded images
// ---------------------------------------------------------------------------

/// Image container recognised from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}

impl ImageKind {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else if bytes.len() >= 26 && bytes.starts_with(b"BM") {
            Some(Self::Bmp)
        } else {
            None
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

/// A decoded still image ready to send to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub kind: ImageKind,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// Re-encode as a data URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.kind.mime(), STANDARD.encode(&self.bytes))
    }

    /// A black 24-bit BMP frame, used to warm up the model.
    pub fn blank(width: u32, height: u32) -> Self {
        let row = (width * 3 + 3) & !3;
        let pixels = row * height;
        let file_size = 54 + pixels;

        let mut bytes = Vec::with_capacity(file_size as usize);
        bytes.extend_from_slice(b"BM");
        bytes.extend_from_slice(&file_size.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&54u32.to_le_bytes());
        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.extend_from_slice(&(width as i32).to_le_bytes());
        bytes.extend_from_slice(&(height as i32).to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&24u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&pixels.to_le_bytes());
        bytes.extend_from_slice(&2835u32.to_le_bytes());
        bytes.extend_from_slice(&2835u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 8]);
        bytes.resize(file_size as usize, 0);

        Self {
            kind: ImageKind::Bmp,
            bytes,
        }
    }
}

/// Decode a base64 image, stripping an optional `data:...;base64,` header.
pub fn decode_image(encoded: &str) -> Result<ImagePayload, ClassifierError> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() {
        return Err(ClassifierError::MissingImage);
    }

    let body = if trimmed.starts_with("data:") {
        let header = DATA_URL_HEADER.find(trimmed).ok_or_else(|| {
            ClassifierError::Decode("data URL is not base64 encoded".to_string())
        })?;
        &trimmed[header.end()..]
    } else {
        trimmed
    };

    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(ClassifierError::MissingImage);
    }
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;

    let kind = ImageKind::sniff(&bytes)
        .ok_or_else(|| ClassifierError::Decode("bytes are not a recognised image".to_string()))?;

    Ok(ImagePayload { kind, bytes })
}

// ---------------------------------------------------------------------------
// Classifier trait and adapter
// ---------------------------------------------------------------------------

/// An external facial-emotion model.
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Classify the dominant emotion in one image.
    async fn classify(&self, image: &ImagePayload) -> Result<Detection, ClassifierError>;
}

/// Failure-containing wrapper around an [`EmotionClassifier`].
#[derive(Clone)]
pub struct ClassifierAdapter {
    inner: Arc<dyn EmotionClassifier>,
    timeout: Duration,
}

impl std::fmt::Debug for ClassifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierAdapter")
            .field("classifier", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClassifierAdapter {
    pub fn new(inner: Arc<dyn EmotionClassifier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Classify an encoded image. Always produces a label.
    pub async fn classify(&self, encoded: &str) -> ClassifierOutcome {
        let image = match decode_image(encoded) {
            Ok(image) => image,
            Err(cause) => {
                tracing::warn!(classifier = self.inner.name(), error = %cause, "capture image rejected, using fallback label");
                return ClassifierOutcome::fallback(cause);
            }
        };
        self.classify_image(&image).await
    }

    /// Classify an already decoded image. Always produces a label.
    pub async fn classify_image(&self, image: &ImagePayload) -> ClassifierOutcome {
        let result = tokio::time::timeout(self.timeout, self.inner.classify(image))
            .await
            .unwrap_or(Err(ClassifierError::Timeout(self.timeout)));

        match result {
            Ok(detection) if !detection.label.trim().is_empty() => {
                tracing::debug!(
                    classifier = self.inner.name(),
                    label = %detection.label,
                    confidence = detection.confidence,
                    "emotion detected"
                );
                ClassifierOutcome::Detected {
                    label: detection.label,
                    confidence: detection.confidence.clamp(0.0, 1.0),
                }
            }
            Ok(_) => ClassifierOutcome::fallback(ClassifierError::MalformedResponse(
                "empty label".to_string(),
            )),
            Err(cause) => {
                tracing::warn!(classifier = self.inner.name(), error = %cause, "classifier failed, using fallback label");
                ClassifierOutcome::fallback(cause)
            }
        }
    }

    /// Run one blank frame through the model so the first real capture is not
    /// the one paying for model load. Returns whether the model answered.
    pub async fn warm_up(&self) -> bool {
        let outcome = self.classify_image(&ImagePayload::blank(224, 224)).await;
        match &outcome {
            ClassifierOutcome::Detected { .. } => {
                tracing::info!(classifier = self.inner.name(), "vision model ready");
                true
            }
            ClassifierOutcome::Fallback { cause, .. } => {
                tracing::warn!(
                    classifier = self.inner.name(),
                    error = %cause,
                    fallback = FALLBACK_LABEL,
                    "vision model warm-up failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Classifier that returns a fixed result.
    pub(crate) struct FixedClassifier(pub Result<Detection, ClassifierError>);

    #[async_trait]
    impl EmotionClassifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn classify(&self, _image: &ImagePayload) -> Result<Detection, ClassifierError> {
            self.0.clone()
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl EmotionClassifier for SlowClassifier {
        fn name(&self) -> &str {
            "slow"
        }

        async fn classify(&self, _image: &ImagePayload) -> Result<Detection, ClassifierError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Detection {
                label: "happy".into(),
                confidence: 1.0,
            })
        }
    }

    pub(crate) fn happy() -> Arc<dyn EmotionClassifier> {
        Arc::new(FixedClassifier(Ok(Detection {
            label: "Happy".into(),
            confidence: 0.93,
        })))
    }

    pub(crate) fn png_data_url() -> String {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        format!("data:image/png;base64,{}", STANDARD.encode(bytes))
    }

    #[test]
    fn test_decode_strips_data_url_header() {
        let image = decode_image(&png_data_url()).unwrap();
        assert_eq!(image.kind, ImageKind::Png);
        assert_eq!(image.bytes.len(), 24);
    }

    #[test]
    fn test_decode_plain_base64() {
        let encoded = STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0, 0, 0]);
        assert_eq!(decode_image(&encoded).unwrap().kind, ImageKind::Jpeg);
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(decode_image(""), Err(ClassifierError::MissingImage));
        assert_eq!(
            decode_image("data:image/png;base64,"),
            Err(ClassifierError::MissingImage)
        );
        assert!(matches!(
            decode_image("not base64 at all!"),
            Err(ClassifierError::Decode(_))
        ));
        assert!(matches!(
            decode_image("data:image/png,raw"),
            Err(ClassifierError::Decode(_))
        ));
        let text = STANDARD.encode(b"hello, this is not an image");
        assert!(matches!(decode_image(&text), Err(ClassifierError::Decode(_))));
    }

    #[test]
    fn test_blank_frame_is_a_bmp() {
        let blank = ImagePayload::blank(224, 224);
        assert_eq!(ImageKind::sniff(&blank.bytes), Some(ImageKind::Bmp));
        assert_eq!(blank.bytes.len(), 54 + 224 * 3 * 224);
        assert!(blank.to_data_url().starts_with("data:image/bmp;base64,Qk"));
    }

    #[tokio::test]
    async fn test_adapter_detects_and_keeps_raw_label() {
        let adapter = ClassifierAdapter::new(happy(), Duration::from_secs(1));
        let outcome = adapter.classify(&png_data_url()).await;
        assert_eq!(
            outcome,
            ClassifierOutcome::Detected {
                label: "Happy".into(),
                confidence: 0.93
            }
        );
        assert!(!outcome.is_fallback());
    }

    #[tokio::test]
    async fn test_blank_label_falls_back() {
        let adapter = ClassifierAdapter::new(
            Arc::new(FixedClassifier(Ok(Detection {
                label: "  ".into(),
                confidence: 0.5,
            }))),
            Duration::from_secs(1),
        );
        let outcome = adapter.classify(&png_data_url()).await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.label(), FALLBACK_LABEL);
    }

    #[tokio::test]
    async fn test_adapter_falls_back_on_malformed_image() {
        let adapter = ClassifierAdapter::new(happy(), Duration::from_secs(1));
        for input in ["", "%%%", "data:image/jpeg;base64,AAAA"] {
            let outcome = adapter.classify(input).await;
            assert!(outcome.is_fallback(), "input {:?}", input);
            assert_eq!(outcome.label(), FALLBACK_LABEL);
            assert_eq!(outcome.confidence(), 0.0);
        }
    }

    #[tokio::test]
    async fn test_adapter_falls_back_when_model_unavailable() {
        let adapter = ClassifierAdapter::new(
            Arc::new(FixedClassifier(Err(ClassifierError::Unavailable(
                "connection refused".into(),
            )))),
            Duration::from_secs(1),
        );
        let outcome = adapter.classify(&png_data_url()).await;
        assert_eq!(
            outcome,
            ClassifierOutcome::Fallback {
                label: "neutral".into(),
                cause: ClassifierError::Unavailable("connection refused".into()),
            }
        );
        assert!(!adapter.warm_up().await);
    }

    #[tokio::test]
    async fn test_genuine_neutral_is_not_a_fallback() {
        let adapter = ClassifierAdapter::new(
            Arc::new(FixedClassifier(Ok(Detection {
                label: "neutral".into(),
                confidence: 0.6,
            }))),
            Duration::from_secs(1),
        );
        let outcome = adapter.classify(&png_data_url()).await;
        assert_eq!(outcome.label(), "neutral");
        assert!(!outcome.is_fallback());
        assert!(adapter.warm_up().await);
    }

    #[tokio::test]
    async fn test_adapter_times_out() {
        let adapter = ClassifierAdapter::new(Arc::new(SlowClassifier), Duration::from_millis(100));
        let outcome = adapter.classify(&png_data_url()).await;
        assert!(matches!(
            outcome,
            ClassifierOutcome::Fallback {
                cause: ClassifierError::Timeout(_),
                ..
            }
        ));
    }
}
