// src/actions.rs
// Discrete user actions and the chips that can produce them. Every action
// carries a strongly-typed payload and is matched exhaustively in the router.

use serde::{Deserialize, Serialize};

use crate::backend::EntityKind;
use crate::wine::{BottleForm, ImagePayload, WineField};

/// A user-originated action delivered to the engine's single entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Action {
    /// Free-text submit. Passes through the detector chain before it can
    /// fall through to a full identification call.
    SubmitText { text: String },
    /// Photo submit, optionally with supplementary text.
    SubmitImage {
        image: ImagePayload,
        note: Option<String>,
    },
    /// Chip tap on a transcript entry.
    Chip {
        action: ChipAction,
        message_id: Option<String>,
    },
    /// Bottle-details form submit.
    SubmitBottleForm { form: BottleForm },
}

/// Everything a chip can trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "chip")]
pub enum ChipAction {
    // Result confirmation
    ConfirmResult,
    NotCorrect,
    /// Grounded verification of an image result (tier 2).
    Verify,
    /// Premium escalation (tier 3).
    TryHarder,

    // Navigation
    SearchAgain,
    StartOver,
    Retry,

    // Post-confirmation
    AddToCellar,
    EnrichWine,
    FinishFlow,

    // Low-confidence continuation
    ContinueManually,
    ReIdentify,

    // Field correction / missing-field flow
    FixField { field: WineField },
    SkipField,

    // Ambiguous free-text guard
    ConfirmNewSearch,
    KeepCurrent,

    // Duplicate pre-check
    AddBottleToExisting,
    CreateNewWineAnyway,

    // Entity disambiguation
    SelectCandidate {
        kind: EntityKind,
        candidate_id: String,
    },
    CreateEntity { kind: EntityKind },

    // Enrichment cache confirmation
    AcceptCachedEnrichment,
    RefreshEnrichment,
}

impl ChipAction {
    /// Default button label for this chip.
    pub fn label(&self) -> String {
        match self {
            ChipAction::ConfirmResult => "Yes, that's it".into(),
            ChipAction::NotCorrect => "Not quite right".into(),
            ChipAction::Verify => "Double-check the label".into(),
            ChipAction::TryHarder => "Try harder".into(),
            ChipAction::SearchAgain => "Search again".into(),
            ChipAction::StartOver => "Start over".into(),
            ChipAction::Retry => "Try again".into(),
            ChipAction::AddToCellar => "Add to my cellar".into(),
            ChipAction::EnrichWine => "Tell me about this wine".into(),
            ChipAction::FinishFlow => "Done".into(),
            ChipAction::ContinueManually => "Continue anyway".into(),
            ChipAction::ReIdentify => "Re-identify".into(),
            ChipAction::FixField { field } => format!("Fix {}", field.as_str()),
            ChipAction::SkipField => "Skip".into(),
            ChipAction::ConfirmNewSearch => "Yes, new search".into(),
            ChipAction::KeepCurrent => "No, keep this one".into(),
            ChipAction::AddBottleToExisting => "Add a bottle to it".into(),
            ChipAction::CreateNewWineAnyway => "Create a new wine".into(),
            ChipAction::SelectCandidate { .. } => "Select".into(),
            ChipAction::CreateEntity { kind } => format!("None of these, new {}", kind.as_str()),
            ChipAction::AcceptCachedEnrichment => "Yes, same wine".into(),
            ChipAction::RefreshEnrichment => "No, look it up fresh".into(),
        }
    }
}

/// A rendered chip: an action plus its button label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chip {
    pub action: ChipAction,
    pub label: String,
}

impl Chip {
    pub fn new(action: ChipAction) -> Self {
        let label = action.label();
        Self { action, label }
    }

    pub fn labelled(action: ChipAction, label: impl Into<String>) -> Self {
        Self {
            action,
            label: label.into(),
        }
    }
}

/// Build a chip row from plain actions.
pub fn chips(actions: impl IntoIterator<Item = ChipAction>) -> Vec<Chip> {
    actions.into_iter().map(Chip::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_labels() {
        let chip = Chip::new(ChipAction::FixField {
            field: WineField::Vintage,
        });
        assert_eq!(chip.label, "Fix vintage");
    }

    #[test]
    fn test_action_round_trips_through_json() {
        let action = Action::Chip {
            action: ChipAction::SelectCandidate {
                kind: EntityKind::Producer,
                candidate_id: "p-42".into(),
            },
            message_id: None,
        };
        let json = serde_json::to_string(&action).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
