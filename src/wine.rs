// src/wine.rs
// Domain types: parsed wine results, streaming field slots, locked fields.

use serde::{Deserialize, Serialize};

/// The fixed set of fields a recognition result can carry.
///
/// Enum-keyed so that field handling stays exhaustive at compile time while
/// preserving arbitrary-arrival-order, last-write-wins streaming semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WineField {
    Producer,
    WineName,
    Vintage,
    Region,
    Country,
    Grapes,
    Type,
    Appellation,
}

impl WineField {
    pub const ALL: [WineField; 8] = [
        WineField::Producer,
        WineField::WineName,
        WineField::Vintage,
        WineField::Region,
        WineField::Country,
        WineField::Grapes,
        WineField::Type,
        WineField::Appellation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WineField::Producer => "producer",
            WineField::WineName => "wine name",
            WineField::Vintage => "vintage",
            WineField::Region => "region",
            WineField::Country => "country",
            WineField::Grapes => "grapes",
            WineField::Type => "type",
            WineField::Appellation => "appellation",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Raw image payload, already decoded to the content-addressable encoding
/// the backend understands (base64 data + mime type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub data: String,
    pub mime_type: String,
}

/// A structured identification result. All fields optional; confidence is
/// tracked separately by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParsedWine {
    pub producer: Option<String>,
    pub wine_name: Option<String>,
    pub vintage: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub grapes: Vec<String>,
    #[serde(rename = "type")]
    pub wine_type: Option<String>,
    pub appellation: Option<String>,
}

impl ParsedWine {
    pub fn get(&self, field: WineField) -> Option<String> {
        match field {
            WineField::Producer => self.producer.clone(),
            WineField::WineName => self.wine_name.clone(),
            WineField::Vintage => self.vintage.clone(),
            WineField::Region => self.region.clone(),
            WineField::Country => self.country.clone(),
            WineField::Grapes => {
                if self.grapes.is_empty() {
                    None
                } else {
                    Some(self.grapes.join(", "))
                }
            }
            WineField::Type => self.wine_type.clone(),
            WineField::Appellation => self.appellation.clone(),
        }
    }

    pub fn set(&mut self, field: WineField, value: impl Into<String>) {
        let value = value.into();
        match field {
            WineField::Producer => self.producer = Some(value),
            WineField::WineName => self.wine_name = Some(value),
            WineField::Vintage => self.vintage = Some(value),
            WineField::Region => self.region = Some(value),
            WineField::Country => self.country = Some(value),
            WineField::Grapes => {
                self.grapes = value
                    .split(',')
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect()
            }
            WineField::Type => self.wine_type = Some(value),
            WineField::Appellation => self.appellation = Some(value),
        }
    }

    /// Producer or wine name present - enough identity for a result card.
    pub fn has_core_identity(&self) -> bool {
        self.producer.as_deref().is_some_and(|p| !p.trim().is_empty())
            || self.wine_name.as_deref().is_some_and(|w| !w.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        !self.has_core_identity()
            && self.vintage.is_none()
            && self.region.is_none()
            && self.country.is_none()
            && self.grapes.is_empty()
            && self.wine_type.is_none()
            && self.appellation.is_none()
    }

    /// Human-readable one-liner, used to reconstruct search text from a
    /// structured result when no raw input survives.
    pub fn display_name(&self) -> String {
        let mut parts = Vec::new();
        if let Some(p) = &self.producer {
            parts.push(p.clone());
        }
        if let Some(w) = &self.wine_name {
            parts.push(w.clone());
        }
        if let Some(v) = &self.vintage {
            parts.push(v.clone());
        }
        if parts.is_empty() {
            parts.extend(self.grapes.iter().cloned());
        }
        parts.join(" ")
    }
}

/// One in-flight streamed value for a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingValue {
    pub value: String,
    pub is_typing: bool,
}

/// Fixed-slot map of fields currently being streamed: one slot per known
/// field, last write wins. Cleared atomically when the final result is set.
#[derive(Debug, Clone, Default)]
pub struct StreamingFields {
    slots: [Option<StreamingValue>; 8],
}

impl StreamingFields {
    pub fn set(&mut self, field: WineField, value: impl Into<String>) {
        self.slots[field.index()] = Some(StreamingValue {
            value: value.into(),
            is_typing: true,
        });
    }

    /// Mark a field as done typing without changing its value.
    pub fn finish(&mut self, field: WineField) {
        if let Some(slot) = &mut self.slots[field.index()] {
            slot.is_typing = false;
        }
    }

    pub fn get(&self, field: WineField) -> Option<&StreamingValue> {
        self.slots[field.index()].as_ref()
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (WineField, &StreamingValue)> {
        WineField::ALL
            .iter()
            .filter_map(|f| self.slots[f.index()].as_ref().map(|v| (*f, v)))
    }
}

/// Fields the user has explicitly confirmed or corrected. Re-applied over
/// every subsequent backend result so the backend cannot silently undo a
/// user correction.
#[derive(Debug, Clone, Default)]
pub struct LockedFields {
    slots: [Option<String>; 8],
}

impl LockedFields {
    pub fn lock(&mut self, field: WineField, value: impl Into<String>) {
        self.slots[field.index()] = Some(value.into());
    }

    pub fn get(&self, field: WineField) -> Option<&str> {
        self.slots[field.index()].as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    /// Snapshot for sending alongside backend requests.
    pub fn snapshot(&self) -> Vec<(WineField, String)> {
        WineField::ALL
            .iter()
            .filter_map(|f| self.slots[f.index()].clone().map(|v| (*f, v)))
            .collect()
    }

    /// Re-apply locked values over an incoming result. Returns the fields
    /// that were actually overridden. A value differing only by case or
    /// diacritics is left as the backend produced it and is not reported
    /// as overridden.
    pub fn apply(&self, parsed: &mut ParsedWine) -> Vec<WineField> {
        let mut overridden = Vec::new();
        for field in WineField::ALL {
            let Some(locked) = self.get(field) else {
                continue;
            };
            let incoming = parsed.get(field);
            let equivalent = incoming
                .as_deref()
                .is_some_and(|v| fold_for_compare(v) == fold_for_compare(locked));
            if !equivalent {
                parsed.set(field, locked);
                overridden.push(field);
            }
        }
        overridden
    }
}

/// Case- and diacritic-insensitive folding for field comparison.
///
/// Covers the Latin-1 Supplement and Latin Extended-A ranges, which is where
/// wine names live (Château, Rhône, Grüner, Ribera del Duero...).
pub fn fold_for_compare(s: &str) -> String {
    s.trim()
        .chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
            'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
            'ď' | 'đ' => 'd',
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
            'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
            'ĥ' | 'ħ' => 'h',
            'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => 'i',
            'ĵ' => 'j',
            'ķ' => 'k',
            'ĺ' | 'ļ' | 'ľ' | 'ł' => 'l',
            'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
            'ŕ' | 'ŗ' | 'ř' => 'r',
            'ś' | 'ŝ' | 'ş' | 'š' => 's',
            'ţ' | 'ť' | 'ŧ' => 't',
            'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
            'ŵ' => 'w',
            'ý' | 'ÿ' | 'ŷ' => 'y',
            'ź' | 'ż' | 'ž' => 'z',
            other => other,
        })
        .collect()
}

/// Bottle metadata captured by the add-wine form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BottleForm {
    pub quantity: u32,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// Descriptive enrichment data for a resolved wine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrichmentData {
    pub style: Option<String>,
    pub tasting_notes: Option<String>,
    pub pairings: Option<String>,
    pub critic_score: Option<String>,
    pub drink_window: Option<String>,
}

impl EnrichmentData {
    pub fn is_empty(&self) -> bool {
        self.style.is_none()
            && self.tasting_notes.is_none()
            && self.pairings.is_none()
            && self.critic_score.is_none()
            && self.drink_window.is_none()
    }
}

/// The fields an enrichment stream can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnrichmentField {
    Style,
    TastingNotes,
    Pairings,
    CriticScore,
    DrinkWindow,
}

impl EnrichmentData {
    pub fn set(&mut self, field: EnrichmentField, value: impl Into<String>) {
        let value = value.into();
        match field {
            EnrichmentField::Style => self.style = Some(value),
            EnrichmentField::TastingNotes => self.tasting_notes = Some(value),
            EnrichmentField::Pairings => self.pairings = Some(value),
            EnrichmentField::CriticScore => self.critic_score = Some(value),
            EnrichmentField::DrinkWindow => self.drink_window = Some(value),
        }
    }

    /// Append a streamed free-text delta to a field.
    pub fn append(&mut self, field: EnrichmentField, delta: &str) {
        let slot = match field {
            EnrichmentField::Style => &mut self.style,
            EnrichmentField::TastingNotes => &mut self.tasting_notes,
            EnrichmentField::Pairings => &mut self.pairings,
            EnrichmentField::CriticScore => &mut self.critic_score,
            EnrichmentField::DrinkWindow => &mut self.drink_window,
        };
        match slot {
            Some(text) => text.push_str(delta),
            None => *slot = Some(delta.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_for_compare() {
        assert_eq!(fold_for_compare("Château Margaux"), "chateau margaux");
        assert_eq!(fold_for_compare("  RHÔNE "), "rhone");
        assert_eq!(fold_for_compare("Grüner Veltliner"), "gruner veltliner");
    }

    #[test]
    fn test_streaming_fields_last_write_wins() {
        let mut fields = StreamingFields::default();
        fields.set(WineField::Producer, "Opus");
        fields.set(WineField::Producer, "Opus One");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get(WineField::Producer).unwrap().value, "Opus One");

        fields.clear();
        assert!(fields.is_empty());
    }

    #[test]
    fn test_locked_fields_override_disagreement() {
        let mut locked = LockedFields::default();
        locked.lock(WineField::Producer, "Opus One");

        let mut parsed = ParsedWine::default();
        parsed.producer = Some("Overture".into());
        let overridden = locked.apply(&mut parsed);
        assert_eq!(overridden, vec![WineField::Producer]);
        assert_eq!(parsed.producer.as_deref(), Some("Opus One"));
    }

    #[test]
    fn test_locked_fields_ignore_case_and_diacritics() {
        let mut locked = LockedFields::default();
        locked.lock(WineField::Producer, "Chateau Margaux");

        let mut parsed = ParsedWine::default();
        parsed.producer = Some("Château MARGAUX".into());
        let overridden = locked.apply(&mut parsed);
        assert!(overridden.is_empty());
        // Backend casing preserved when values are equivalent.
        assert_eq!(parsed.producer.as_deref(), Some("Château MARGAUX"));
    }

    #[test]
    fn test_parsed_wine_core_identity() {
        let mut wine = ParsedWine::default();
        assert!(!wine.has_core_identity());
        wine.grapes = vec!["Zinfandel".into()];
        assert!(!wine.has_core_identity());
        wine.wine_name = Some("Insignia".into());
        assert!(wine.has_core_identity());
    }

    #[test]
    fn test_display_name_falls_back_to_grapes() {
        let mut wine = ParsedWine::default();
        wine.grapes = vec!["Zinfandel".into()];
        assert_eq!(wine.display_name(), "Zinfandel");

        wine.producer = Some("Ridge".into());
        wine.vintage = Some("2019".into());
        assert_eq!(wine.display_name(), "Ridge 2019");
    }
}
