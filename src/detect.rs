// src/detect.rs
// Ordered detector chain for free-text input. Only when nothing matches
// does text fall through to a full identification call.

use crate::actions::ChipAction;
use crate::config::Config;
use crate::engine::ConvState;
use crate::transcript::Phase;
use crate::wine::WineField;

/// Outcome of the detector chain.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Detected {
    /// Explicit command ("start over", "retry").
    Command(ChipAction),
    /// The user was asked to correct a specific field.
    FieldCorrection { field: WineField, value: String },
    /// The user was asked for a specific missing field.
    MissingFieldValue { field: WineField, value: String },
    /// Text that is self-evidently a field value (a vintage year).
    DirectValue { field: WineField, value: String },
    /// Phrase equivalent to tapping a chip ("yes", "not correct").
    ChipPhrase(ChipAction),
    /// A result is on screen and this looks like a different wine; confirm
    /// before discarding.
    NewSearchConfirm { text: String },
    /// Too short to search for without checking first.
    TooBrief { text: String },
    /// Fall through to identification.
    Identify,
}

pub(crate) fn detect(state: &ConvState, config: &Config, text: &str) -> Detected {
    if let Some(found) = detect_command(text) {
        return found;
    }
    if let Some(found) = detect_field_correction(state, text) {
        return found;
    }
    if let Some(found) = detect_missing_field(state, text) {
        return found;
    }
    if let Some(found) = detect_direct_value(state, text) {
        return found;
    }
    if let Some(found) = detect_chip_phrase(state, text) {
        return found;
    }
    if let Some(found) = detect_ambiguous_new_search(state, text) {
        return found;
    }
    if let Some(found) = detect_too_brief(config, text) {
        return found;
    }
    Detected::Identify
}

fn detect_command(text: &str) -> Option<Detected> {
    let normalized = text.to_lowercase();
    let command = match normalized.as_str() {
        "start over" | "restart" | "reset" => ChipAction::StartOver,
        "retry" | "try again" => ChipAction::Retry,
        "try harder" => ChipAction::TryHarder,
        "search again" | "new search" => ChipAction::SearchAgain,
        _ => return None,
    };
    Some(Detected::Command(command))
}

fn detect_field_correction(state: &ConvState, text: &str) -> Option<Detected> {
    // An explicit correction prompt is in progress.
    if let Some(field) = state.correction_field {
        return Some(Detected::FieldCorrection {
            field,
            value: text.to_string(),
        });
    }
    // "producer: Ridge" / "vintage is 2019" style corrections while a
    // result is showing.
    if state.result.is_none() {
        return None;
    }
    for (prefix, field) in [
        ("producer", WineField::Producer),
        ("winery", WineField::Producer),
        ("wine name", WineField::WineName),
        ("name", WineField::WineName),
        ("vintage", WineField::Vintage),
        ("year", WineField::Vintage),
        ("region", WineField::Region),
    ] {
        for separator in [":", " is "] {
            let pattern = format!("{prefix}{separator}");
            let head_len = pattern.len();
            if text.len() > head_len
                && text.is_char_boundary(head_len)
                && text[..head_len].eq_ignore_ascii_case(&pattern)
            {
                let value = text[head_len..].trim();
                if !value.is_empty() {
                    return Some(Detected::FieldCorrection {
                        field,
                        value: value.to_string(),
                    });
                }
            }
        }
    }
    None
}

fn detect_missing_field(state: &ConvState, text: &str) -> Option<Detected> {
    state.pending_field.map(|field| Detected::MissingFieldValue {
        field,
        value: text.to_string(),
    })
}

/// Bare values whose meaning is unambiguous in context: a plausible vintage
/// year while a result is on screen.
fn detect_direct_value(state: &ConvState, text: &str) -> Option<Detected> {
    if state.result.is_none() {
        return None;
    }
    let trimmed = text.trim();
    if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let year: u32 = trimmed.parse().ok()?;
        if (1900..=2035).contains(&year) {
            return Some(Detected::DirectValue {
                field: WineField::Vintage,
                value: trimmed.to_string(),
            });
        }
    }
    None
}

fn detect_chip_phrase(state: &ConvState, text: &str) -> Option<Detected> {
    if state.phase != Phase::Confirming {
        return None;
    }
    let normalized = text.to_lowercase().replace(['!', '.'], "");
    let chip = match normalized.trim() {
        "yes" | "yep" | "yeah" | "correct" | "that's it" | "thats it" | "right" => {
            ChipAction::ConfirmResult
        }
        "no" | "nope" | "wrong" | "not correct" | "not right" | "not quite" => {
            ChipAction::NotCorrect
        }
        _ => return None,
    };
    Some(Detected::ChipPhrase(chip))
}

/// While confirming a result, multi-word text that is not a correction is
/// probably a different wine. Ask before throwing the current result away.
fn detect_ambiguous_new_search(state: &ConvState, text: &str) -> Option<Detected> {
    if state.phase != Phase::Confirming || state.result.is_none() {
        return None;
    }
    if text.split_whitespace().count() >= 2 {
        return Some(Detected::NewSearchConfirm {
            text: text.to_string(),
        });
    }
    None
}

fn detect_too_brief(config: &Config, text: &str) -> Option<Detected> {
    if text.chars().count() <= config.brief_input_max_chars {
        return Some(Detected::TooBrief {
            text: text.to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wine::ParsedWine;

    fn state() -> ConvState {
        ConvState::default()
    }

    fn state_with_result() -> ConvState {
        let mut s = ConvState::default();
        let mut wine = ParsedWine::default();
        wine.producer = Some("Opus One".into());
        s.result = Some(wine);
        s.phase = Phase::Confirming;
        s
    }

    #[test]
    fn test_command_beats_everything() {
        let s = state_with_result();
        assert_eq!(
            detect(&s, &Config::default(), "start over"),
            Detected::Command(ChipAction::StartOver)
        );
    }

    #[test]
    fn test_correction_prompt_takes_raw_text() {
        let mut s = state();
        s.correction_field = Some(WineField::Producer);
        assert_eq!(
            detect(&s, &Config::default(), "Ridge Vineyards"),
            Detected::FieldCorrection {
                field: WineField::Producer,
                value: "Ridge Vineyards".into()
            }
        );
    }

    #[test]
    fn test_prefixed_correction() {
        let s = state_with_result();
        assert_eq!(
            detect(&s, &Config::default(), "vintage is 2016"),
            Detected::FieldCorrection {
                field: WineField::Vintage,
                value: "2016".into()
            }
        );
    }

    #[test]
    fn test_missing_field_value() {
        let mut s = state();
        s.pending_field = Some(WineField::WineName);
        assert_eq!(
            detect(&s, &Config::default(), "Insignia"),
            Detected::MissingFieldValue {
                field: WineField::WineName,
                value: "Insignia".into()
            }
        );
    }

    #[test]
    fn test_bare_year_is_a_vintage() {
        let s = state_with_result();
        assert_eq!(
            detect(&s, &Config::default(), "2019"),
            Detected::DirectValue {
                field: WineField::Vintage,
                value: "2019".into()
            }
        );
    }

    #[test]
    fn test_year_without_result_is_identify_or_guard() {
        let s = state();
        // No on-screen result: "2019" means nothing specific.
        assert!(matches!(
            detect(&s, &Config::default(), "2019"),
            Detected::Identify
        ));
    }

    #[test]
    fn test_yes_confirms_while_confirming() {
        let s = state_with_result();
        assert_eq!(
            detect(&s, &Config::default(), "Yes!"),
            Detected::ChipPhrase(ChipAction::ConfirmResult)
        );
    }

    #[test]
    fn test_new_wine_text_asks_first() {
        let s = state_with_result();
        assert_eq!(
            detect(&s, &Config::default(), "Screaming Eagle 2012"),
            Detected::NewSearchConfirm {
                text: "Screaming Eagle 2012".into()
            }
        );
    }

    #[test]
    fn test_too_brief_guard() {
        let s = state();
        assert_eq!(
            detect(&s, &Config::default(), "ab"),
            Detected::TooBrief { text: "ab".into() }
        );
    }

    #[test]
    fn test_fallthrough_to_identify() {
        let s = state();
        assert_eq!(detect(&s, &Config::default(), "Opus One 2019"), Detected::Identify);
    }
}
