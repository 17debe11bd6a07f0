// src/quality.rs
// Pure classification of a structured result: missing fields, confidence
// bucket, grape-only detection. Drives the next prompt and chip set.

use serde::Serialize;

use crate::config::Config;
use crate::wine::{ParsedWine, WineField};

/// Fields that must be present before the add flow can proceed without
/// further prompting.
const REQUIRED_FIELDS: [WineField; 3] =
    [WineField::WineName, WineField::Producer, WineField::Vintage];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    High,
    Low,
    Unknown,
}

/// What to prompt for next when required fields are missing.
#[derive(Debug, Clone, PartialEq)]
pub enum MissingPrompt {
    /// Wine name, phrased around an already-known grape variety.
    WineNameForGrape(String),
    WineName,
    Producer,
    Vintage,
    /// Nothing specific matched the priority order.
    Generic,
}

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub missing: Vec<WineField>,
    pub grape_only: bool,
    pub has_core_identity: bool,
    pub bucket: ConfidenceBucket,
}

impl QualityReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Classify a result against the configured confidence thresholds.
pub fn analyze(parsed: &ParsedWine, confidence: Option<f32>, config: &Config) -> QualityReport {
    let missing = REQUIRED_FIELDS
        .iter()
        .filter(|f| parsed.get(**f).map_or(true, |v| v.trim().is_empty()))
        .copied()
        .collect();

    let bucket = match confidence {
        Some(c) if c >= config.high_confidence => ConfidenceBucket::High,
        Some(_) => ConfidenceBucket::Low,
        None => ConfidenceBucket::Unknown,
    };

    QualityReport {
        missing,
        grape_only: !parsed.has_core_identity() && !parsed.grapes.is_empty(),
        has_core_identity: parsed.has_core_identity(),
        bucket,
    }
}

/// The single next field to prompt for, in fixed priority order: wine name
/// conditioned on grape presence, then wine name, producer, vintage.
pub fn next_missing_prompt(parsed: &ParsedWine, report: &QualityReport) -> MissingPrompt {
    if report.missing.contains(&WineField::WineName) {
        if let Some(grape) = parsed.grapes.first() {
            return MissingPrompt::WineNameForGrape(grape.clone());
        }
        return MissingPrompt::WineName;
    }
    if report.missing.contains(&WineField::Producer) {
        return MissingPrompt::Producer;
    }
    if report.missing.contains(&WineField::Vintage) {
        return MissingPrompt::Vintage;
    }
    MissingPrompt::Generic
}

impl MissingPrompt {
    /// The field this prompt asks for, when it asks for a specific one.
    pub fn field(&self) -> Option<WineField> {
        match self {
            MissingPrompt::WineNameForGrape(_) | MissingPrompt::WineName => {
                Some(WineField::WineName)
            }
            MissingPrompt::Producer => Some(WineField::Producer),
            MissingPrompt::Vintage => Some(WineField::Vintage),
            MissingPrompt::Generic => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            MissingPrompt::WineNameForGrape(grape) => format!(
                "A {grape} — nice. Which wine is it? The name is usually the biggest text on the label."
            ),
            MissingPrompt::WineName => "What's the wine called?".into(),
            MissingPrompt::Producer => "Who makes it? Look for the producer or winery name.".into(),
            MissingPrompt::Vintage => "What year is it from?".into(),
            MissingPrompt::Generic => {
                "Anything else you can tell me about it? Producer, name, or year all help.".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn test_complete_result_high_confidence() {
        let mut wine = ParsedWine::default();
        wine.producer = Some("Opus One".into());
        wine.wine_name = Some("Opus One".into());
        wine.vintage = Some("2019".into());

        let report = analyze(&wine, Some(0.92), &config());
        assert!(report.is_complete());
        assert_eq!(report.bucket, ConfidenceBucket::High);
        assert!(!report.grape_only);
    }

    #[test]
    fn test_grape_only_detection() {
        let mut wine = ParsedWine::default();
        wine.grapes = vec!["Zinfandel".into()];

        let report = analyze(&wine, Some(0.5), &config());
        assert!(report.grape_only);
        assert!(!report.has_core_identity);
        assert_eq!(report.bucket, ConfidenceBucket::Low);
    }

    #[test]
    fn test_priority_order_wine_name_first() {
        let wine = ParsedWine::default();
        let report = analyze(&wine, None, &config());
        assert_eq!(next_missing_prompt(&wine, &report), MissingPrompt::WineName);
    }

    #[test]
    fn test_grape_conditions_wine_name_prompt() {
        let mut wine = ParsedWine::default();
        wine.grapes = vec!["Zinfandel".into()];
        let report = analyze(&wine, None, &config());
        assert_eq!(
            next_missing_prompt(&wine, &report),
            MissingPrompt::WineNameForGrape("Zinfandel".into())
        );
    }

    #[test]
    fn test_producer_before_vintage() {
        let mut wine = ParsedWine::default();
        wine.wine_name = Some("Insignia".into());
        let report = analyze(&wine, None, &config());
        assert_eq!(next_missing_prompt(&wine, &report), MissingPrompt::Producer);

        wine.producer = Some("Joseph Phelps".into());
        let report = analyze(&wine, None, &config());
        assert_eq!(next_missing_prompt(&wine, &report), MissingPrompt::Vintage);
    }

    #[test]
    fn test_generic_fallback_when_complete() {
        let mut wine = ParsedWine::default();
        wine.producer = Some("p".into());
        wine.wine_name = Some("w".into());
        wine.vintage = Some("2020".into());
        let report = analyze(&wine, None, &config());
        assert_eq!(next_missing_prompt(&wine, &report), MissingPrompt::Generic);
    }
}
