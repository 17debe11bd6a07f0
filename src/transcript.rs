// src/transcript.rs
// Append-only message log plus the conversation phase. The log is the sole
// source of truth for rendered history; entries are immutable once appended
// except for the `disabled` flag and the single typing placeholder.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actions::Chip;
use crate::wine::{BottleForm, EnrichmentData, ImagePayload, ParsedWine};

/// Conversation phase. Mutated only by engines, never by rendering code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Greeting,
    AwaitingInput,
    Identifying,
    Confirming,
    AddingWine(Option<AddWineSubPhase>),
    Enriching,
    Complete,
    Error,
}

/// Progress within the add-wine flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddWineSubPhase {
    Confirm,
    EntityMatching,
    BottleDetails,
    Enrichment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    User,
    Agent,
}

/// Typed entry payloads, one variant per transcript category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "category")]
pub enum EntryContent {
    Text {
        text: String,
    },
    Image {
        image: ImagePayload,
        note: Option<String>,
    },
    Chips {
        chips: Vec<Chip>,
    },
    Form {
        form: BottleForm,
    },
    WineCard {
        wine: ParsedWine,
        confidence: Option<f32>,
    },
    EnrichmentCard {
        data: EnrichmentData,
        cached: bool,
    },
    Error {
        message: String,
        retryable: bool,
        support_ref: Option<String>,
    },
    /// Streaming placeholder. At most one is active at a time; replaced in
    /// place until finalized.
    Typing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub role: EntryRole,
    pub content: EntryContent,
    /// Set when this entry's chips/buttons have been superseded.
    pub disabled: bool,
    pub created_at: i64,
}

impl TranscriptEntry {
    fn new(role: EntryRole, content: EntryContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            disabled: false,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

/// The append-only message log.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<TranscriptEntry>,
    revision: u64,
}

impl MessageLog {
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. Any active typing placeholder is removed first so
    /// a sibling never lands beside it.
    pub fn push(&mut self, role: EntryRole, content: EntryContent) -> String {
        self.remove_typing();
        let entry = TranscriptEntry::new(role, content);
        let id = entry.id.clone();
        self.entries.push(entry);
        self.revision += 1;
        id
    }

    pub fn push_agent_text(&mut self, text: impl Into<String>) -> String {
        self.push(EntryRole::Agent, EntryContent::Text { text: text.into() })
    }

    pub fn push_user_text(&mut self, text: impl Into<String>) -> String {
        self.push(EntryRole::User, EntryContent::Text { text: text.into() })
    }

    pub fn push_chips(&mut self, chips: Vec<Chip>) -> String {
        self.push(EntryRole::Agent, EntryContent::Chips { chips })
    }

    /// Install the typing placeholder, keeping at most one active.
    pub fn set_typing(&mut self) {
        self.remove_typing();
        self.entries
            .push(TranscriptEntry::new(EntryRole::Agent, EntryContent::Typing));
        self.revision += 1;
    }

    /// Replace the typing placeholder with real content, preserving its
    /// position. Falls back to a plain append when none is active.
    pub fn replace_typing(&mut self, role: EntryRole, content: EntryContent) -> String {
        if let Some(pos) = self.typing_pos() {
            let entry = TranscriptEntry::new(role, content);
            let id = entry.id.clone();
            self.entries[pos] = entry;
            self.revision += 1;
            id
        } else {
            self.push(role, content)
        }
    }

    pub fn clear_typing(&mut self) {
        if self.remove_typing() {
            self.revision += 1;
        }
    }

    pub fn has_typing(&self) -> bool {
        self.typing_pos().is_some()
    }

    /// Mark every still-enabled chip entry as superseded.
    pub fn disable_chips(&mut self) {
        let mut changed = false;
        for entry in &mut self.entries {
            if !entry.disabled && matches!(entry.content, EntryContent::Chips { .. }) {
                entry.disabled = true;
                changed = true;
            }
        }
        if changed {
            self.revision += 1;
        }
    }

    pub fn disable_entry(&mut self, id: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            if !entry.disabled {
                entry.disabled = true;
                self.revision += 1;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }

    fn typing_pos(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e.content, EntryContent::Typing))
    }

    fn remove_typing(&mut self) -> bool {
        if let Some(pos) = self.typing_pos() {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ChipAction, chips};

    #[test]
    fn test_push_preserves_order() {
        let mut log = MessageLog::default();
        log.push_user_text("first");
        log.push_agent_text("second");
        assert_eq!(log.len(), 2);
        assert!(matches!(
            &log.entries()[0].content,
            EntryContent::Text { text } if text == "first"
        ));
    }

    #[test]
    fn test_single_typing_placeholder() {
        let mut log = MessageLog::default();
        log.set_typing();
        log.set_typing();
        assert_eq!(log.len(), 1);
        assert!(log.has_typing());

        // A sibling append removes the placeholder first.
        log.push_agent_text("done");
        assert_eq!(log.len(), 1);
        assert!(!log.has_typing());
    }

    #[test]
    fn test_replace_typing_keeps_position() {
        let mut log = MessageLog::default();
        log.push_user_text("hello");
        log.set_typing();
        log.replace_typing(
            EntryRole::Agent,
            EntryContent::Text { text: "hi".into() },
        );
        assert_eq!(log.len(), 2);
        assert!(matches!(
            &log.entries()[1].content,
            EntryContent::Text { text } if text == "hi"
        ));
    }

    #[test]
    fn test_disable_chips_supersedes_all() {
        let mut log = MessageLog::default();
        log.push_chips(chips([ChipAction::ConfirmResult, ChipAction::NotCorrect]));
        log.push_agent_text("something else");
        log.disable_chips();
        assert!(log.entries()[0].disabled);
        assert!(!log.entries()[1].disabled);
    }

    #[test]
    fn test_revision_bumps_on_mutation() {
        let mut log = MessageLog::default();
        let r0 = log.revision();
        log.push_agent_text("x");
        assert!(log.revision() > r0);
    }
}
