//! Scoring and wellness banding.
//!
//! A band scheme is an ordered list of thresholds plus one more band than
//! thresholds. Band `i` covers `thresholds[i-1] <= score < thresholds[i]`,
//! with the first band starting at zero and the last one unbounded, so the
//! bands always partition the score range.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sum of recorded answer values.
pub fn score(answers: &[u32]) -> u32 {
    answers.iter().sum()
}

/// A named wellness band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    pub label: String,
    /// CSS color used by clients to render the band.
    pub color: String,
}

impl Band {
    pub fn new(label: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            color: color.into(),
        }
    }
}

/// Thresholds and bands for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandScheme {
    /// Scheme name, reported in logs.
    pub name: String,
    /// Strictly increasing lower bounds of bands `1..`.
    pub thresholds: Vec<u32>,
    /// Ordered from lowest to highest score.
    pub bands: Vec<Band>,
}

impl Default for BandScheme {
    fn default() -> Self {
        Self::standard()
    }
}

impl BandScheme {
    /// Scheme for the seven-question set (max score 14).
    pub fn standard() -> Self {
        Self {
            name: "standard-7".to_string(),
            thresholds: vec![8, 12],
            bands: vec![
                Band::new("Distressful", "#ff4757"),
                Band::new("Needs Guidance", "#ffa502"),
                Band::new("Happy & Normal", "#2ed573"),
            ],
        }
    }

    /// Check the scheme partitions `[0, max_score]` into non-empty bands.
    pub fn validate(&self, max_score: u32) -> Result<(), ConfigError> {
        if self.bands.len() != self.thresholds.len() + 1 {
            return Err(ConfigError::Banding(format!(
                "scheme '{}' has {} thresholds but {} bands (need {})",
                self.name,
                self.thresholds.len(),
                self.bands.len(),
                self.thresholds.len() + 1
            )));
        }
        let mut lower = 0u32;
        for &t in &self.thresholds {
            if t <= lower {
                return Err(ConfigError::Banding(format!(
                    "scheme '{}': threshold {} must be greater than {}",
                    self.name, t, lower
                )));
            }
            lower = t;
        }
        if lower > max_score {
            return Err(ConfigError::Banding(format!(
                "scheme '{}': threshold {} is above the max score {}",
                self.name, lower, max_score
            )));
        }
        if let Some(band) = self.bands.iter().find(|b| b.label.trim().is_empty()) {
            return Err(ConfigError::Banding(format!(
                "scheme '{}' has a band with an empty label (color {})",
                self.name, band.color
            )));
        }
        Ok(())
    }

    /// Index of the band `score` falls into.
    pub fn band_index(&self, score: u32) -> usize {
        self.thresholds.iter().take_while(|&&t| score >= t).count()
    }

    /// The band `score` falls into.
    ///
    /// Callers are expected to hold a validated scheme; an unvalidated one with
    /// too few bands clamps to the last band.
    pub fn classify(&self, score: u32) -> &Band {
        let idx = self.band_index(score).min(self.bands.len().saturating_sub(1));
        &self.bands[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_sum() {
        assert_eq!(score(&[]), 0);
        assert_eq!(score(&[2, 2, 0, 2, 2, 2, 2]), 12);
        assert_eq!(score(&[2; 7]), 14);
    }

    #[test]
    fn test_standard_bands() {
        let scheme = BandScheme::standard();
        assert!(scheme.validate(14).is_ok());
        assert_eq!(scheme.classify(0).label, "Distressful");
        assert_eq!(scheme.classify(7).label, "Distressful");
        assert_eq!(scheme.classify(8).label, "Needs Guidance");
        assert_eq!(scheme.classify(11).label, "Needs Guidance");
        assert_eq!(scheme.classify(12).label, "Happy & Normal");
        assert_eq!(scheme.classify(14).color, "#2ed573");
    }

    #[test]
    fn test_bands_partition_score_range() {
        let scheme = BandScheme::standard();
        let mut counts = vec![0usize; scheme.bands.len()];
        for s in 0..=14 {
            let idx = scheme.band_index(s);
            assert!(idx < scheme.bands.len());
            counts[idx] += 1;
        }
        // every band is hit, and consecutive scores never move down a band
        assert!(counts.iter().all(|&c| c > 0));
        assert_eq!(counts.iter().sum::<usize>(), 15);
        for s in 0..14 {
            assert!(scheme.band_index(s) <= scheme.band_index(s + 1));
        }
    }

    #[test]
    fn test_validate_rejects_bad_schemes() {
        let mut scheme = BandScheme::standard();
        scheme.thresholds = vec![12, 8];
        assert!(scheme.validate(14).is_err());

        let mut scheme = BandScheme::standard();
        scheme.bands.pop();
        assert!(scheme.validate(14).is_err());

        let scheme = BandScheme::standard();
        // a four-question set tops out at 8, below the top threshold
        assert!(scheme.validate(8).is_err());

        let mut scheme = BandScheme::standard();
        scheme.thresholds = vec![0, 8];
        assert!(scheme.validate(14).is_err());
    }

    #[test]
    fn test_custom_four_question_scheme() {
        let scheme = BandScheme {
            name: "brief-4".into(),
            thresholds: vec![4, 7],
            bands: vec![
                Band::new("Low", "red"),
                Band::new("Mid", "orange"),
                Band::new("High", "green"),
            ],
        };
        assert!(scheme.validate(8).is_ok());
        assert_eq!(scheme.classify(3).label, "Low");
        assert_eq!(scheme.classify(4).label, "Mid");
        assert_eq!(scheme.classify(8).label, "High");
    }
}
