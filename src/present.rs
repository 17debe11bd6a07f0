// src/present.rs
// Result-presentation protocol: given a final result and confidence, decide
// which card/message/chip set goes into the transcript and what phase comes
// next. All functions are synchronous log/phase mutations.

use crate::actions::{ChipAction, chips};
use crate::config::Config;
use crate::engine::ConvState;
use crate::quality::{self, ConfidenceBucket, QualityReport};
use crate::transcript::{EntryContent, EntryRole, Phase};

const MSG_ID_FOUND_HIGH: &str = "Here's what I found — does this look right?";
const MSG_ID_FOUND_LOW: &str =
    "I'm not completely sure, but this is my best match. Does it look right?";
const MSG_NOT_FOUND: &str =
    "I couldn't identify that wine. Want to try different wording, or start fresh?";
const MSG_FIELDS_COMPLETE: &str = "That completes the picture. What next?";
const MSG_LOW_AFTER_FIELDS: &str =
    "Here's what we have so far. I can re-run identification with the extra detail, or we can continue as-is.";
const MSG_UPDATED: &str = "Updated. Does it look right now?";

/// Quality report for the current result, with skipped fields treated as
/// satisfied so the prompt loop can move on.
pub(crate) fn quality_of(state: &ConvState, config: &Config) -> QualityReport {
    let parsed = state.result.clone().unwrap_or_default();
    let mut report = quality::analyze(&parsed, state.confidence, config);
    report.missing.retain(|f| !state.skipped_fields.contains(f));
    report
}

/// Present a freshly finalized result: card, grape-only prompt, or
/// not-found, depending on what the result carries.
pub(crate) fn present_result(state: &mut ConvState, config: &Config) {
    let Some(result) = state.result.clone() else {
        present_not_found(state);
        return;
    };
    let report = quality_of(state, config);

    if result.has_core_identity() {
        state.log.disable_chips();
        state.log.push(
            EntryRole::Agent,
            EntryContent::WineCard {
                wine: result,
                confidence: state.confidence,
            },
        );
        let message = match report.bucket {
            ConfidenceBucket::High => MSG_ID_FOUND_HIGH,
            _ => MSG_ID_FOUND_LOW,
        };
        state.log.push_agent_text(message);
        state.log.push_chips(chips(confirmation_actions(state)));
        state.phase = Phase::Confirming;
    } else if report.grape_only {
        let prompt = quality::next_missing_prompt(&state.result.clone().unwrap_or_default(), &report);
        state.pending_field = prompt.field();
        state.log.push_agent_text(prompt.message());
        state
            .log
            .push_chips(chips([ChipAction::SearchAgain, ChipAction::StartOver]));
        state.phase = Phase::AwaitingInput;
    } else {
        present_not_found(state);
    }
}

fn present_not_found(state: &mut ConvState) {
    state.log.push_agent_text(MSG_NOT_FOUND);
    state
        .log
        .push_chips(chips([ChipAction::SearchAgain, ChipAction::StartOver]));
    state.phase = Phase::AwaitingInput;
}

/// Confirmation chip row. Image-sourced, non-escalated results get the
/// extra "verify" affordance.
fn confirmation_actions(state: &ConvState) -> Vec<ChipAction> {
    let mut actions = vec![ChipAction::ConfirmResult, ChipAction::NotCorrect];
    if state.result_from_image && !state.result_escalated {
        actions.push(ChipAction::Verify);
    }
    actions.push(ChipAction::TryHarder);
    actions
}

/// Re-present the card after a user correction.
pub(crate) fn present_correction(state: &mut ConvState) {
    let Some(result) = state.result.clone() else {
        return;
    };
    state.log.push(
        EntryRole::Agent,
        EntryContent::WineCard {
            wine: result,
            confidence: state.confidence,
        },
    );
    state.log.push_agent_text(MSG_UPDATED);
    state.log.push_chips(chips(confirmation_actions(state)));
    state.phase = Phase::Confirming;
}

/// Missing-field continuation: after the user supplies (or skips) a field,
/// either branch on confidence or prompt for the single next missing field.
pub(crate) fn continue_missing_flow(state: &mut ConvState, config: &Config) {
    let report = quality_of(state, config);

    if report.is_complete() {
        match report.bucket {
            ConfidenceBucket::High => {
                state.log.push_agent_text(MSG_FIELDS_COMPLETE);
                state.log.push_chips(chips([
                    ChipAction::AddToCellar,
                    ChipAction::EnrichWine,
                    ChipAction::SearchAgain,
                ]));
                state.phase = Phase::Confirming;
            }
            ConfidenceBucket::Low | ConfidenceBucket::Unknown => {
                if let Some(result) = state.result.clone() {
                    state.log.push(
                        EntryRole::Agent,
                        EntryContent::WineCard {
                            wine: result,
                            confidence: state.confidence,
                        },
                    );
                }
                state.log.push_agent_text(MSG_LOW_AFTER_FIELDS);
                state.log.push_chips(chips([
                    ChipAction::ReIdentify,
                    ChipAction::ContinueManually,
                ]));
                state.phase = Phase::Confirming;
            }
        }
        return;
    }

    let parsed = state.result.clone().unwrap_or_default();
    let prompt = quality::next_missing_prompt(&parsed, &report);
    state.pending_field = prompt.field();
    state.log.push_agent_text(prompt.message());
    state
        .log
        .push_chips(chips([ChipAction::SkipField, ChipAction::SearchAgain]));
    state.phase = Phase::AwaitingInput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wine::ParsedWine;

    fn state_with(wine: ParsedWine, confidence: Option<f32>) -> ConvState {
        let mut state = ConvState::default();
        state.result = Some(wine);
        state.confidence = confidence;
        state
    }

    fn find_chips(state: &ConvState) -> Vec<ChipAction> {
        state
            .log
            .entries()
            .iter()
            .rev()
            .find_map(|e| match &e.content {
                EntryContent::Chips { chips } => {
                    Some(chips.iter().map(|c| c.action.clone()).collect())
                }
                _ => None,
            })
            .unwrap_or_default()
    }

    fn has_card(state: &ConvState) -> bool {
        state
            .log
            .entries()
            .iter()
            .any(|e| matches!(e.content, EntryContent::WineCard { .. }))
    }

    #[test]
    fn test_core_identity_always_gets_a_card() {
        let mut wine = ParsedWine::default();
        wine.producer = Some("Opus One".into());
        let mut state = state_with(wine, Some(0.92));
        present_result(&mut state, &Config::default());

        assert!(has_card(&state));
        assert_eq!(state.phase, Phase::Confirming);
        let actions = find_chips(&state);
        assert!(actions.contains(&ChipAction::ConfirmResult));
        assert!(!actions.contains(&ChipAction::Verify));
    }

    #[test]
    fn test_image_result_gets_verify_chip() {
        let mut wine = ParsedWine::default();
        wine.wine_name = Some("Insignia".into());
        let mut state = state_with(wine, Some(0.8));
        state.result_from_image = true;
        present_result(&mut state, &Config::default());
        assert!(find_chips(&state).contains(&ChipAction::Verify));
    }

    #[test]
    fn test_escalated_image_result_has_no_verify_chip() {
        let mut wine = ParsedWine::default();
        wine.wine_name = Some("Insignia".into());
        let mut state = state_with(wine, Some(0.8));
        state.result_from_image = true;
        state.result_escalated = true;
        present_result(&mut state, &Config::default());
        assert!(!find_chips(&state).contains(&ChipAction::Verify));
    }

    #[test]
    fn test_grape_only_branch() {
        let mut wine = ParsedWine::default();
        wine.grapes = vec!["Zinfandel".into()];
        let mut state = state_with(wine, Some(0.5));
        present_result(&mut state, &Config::default());

        assert!(!has_card(&state));
        assert_eq!(state.phase, Phase::AwaitingInput);
        assert!(state.pending_field.is_some());
    }

    #[test]
    fn test_empty_result_is_not_found() {
        let mut state = state_with(ParsedWine::default(), None);
        present_result(&mut state, &Config::default());
        assert_eq!(state.phase, Phase::AwaitingInput);
        assert!(find_chips(&state).contains(&ChipAction::SearchAgain));
    }

    #[test]
    fn test_continuation_prompts_next_field_in_order() {
        let mut wine = ParsedWine::default();
        wine.wine_name = Some("Insignia".into());
        let mut state = state_with(wine, None);
        continue_missing_flow(&mut state, &Config::default());
        assert_eq!(state.pending_field, Some(crate::wine::WineField::Producer));
        assert_eq!(state.phase, Phase::AwaitingInput);
    }

    #[test]
    fn test_continuation_complete_high_confidence() {
        let mut wine = ParsedWine::default();
        wine.producer = Some("p".into());
        wine.wine_name = Some("w".into());
        wine.vintage = Some("2020".into());
        let mut state = state_with(wine, Some(0.9));
        continue_missing_flow(&mut state, &Config::default());
        assert!(find_chips(&state).contains(&ChipAction::AddToCellar));
        assert_eq!(state.phase, Phase::Confirming);
    }

    #[test]
    fn test_continuation_complete_low_confidence() {
        let mut wine = ParsedWine::default();
        wine.producer = Some("p".into());
        wine.wine_name = Some("w".into());
        wine.vintage = Some("2020".into());
        let mut state = state_with(wine, Some(0.4));
        continue_missing_flow(&mut state, &Config::default());
        let actions = find_chips(&state);
        assert!(actions.contains(&ChipAction::ReIdentify));
        assert!(actions.contains(&ChipAction::ContinueManually));
    }

    #[test]
    fn test_skipped_fields_count_as_satisfied() {
        let mut wine = ParsedWine::default();
        wine.producer = Some("p".into());
        wine.wine_name = Some("w".into());
        let mut state = state_with(wine, Some(0.9));
        state.skipped_fields.push(crate::wine::WineField::Vintage);
        continue_missing_flow(&mut state, &Config::default());
        assert_eq!(state.phase, Phase::Confirming);
    }
}
