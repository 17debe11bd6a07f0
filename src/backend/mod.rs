// src/backend/mod.rs
// Contracts with the recognition/catalog backend. The backend is a black
// box; the engine only depends on these traits and event shapes.

mod http;

pub use http::HttpBackend;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::wine::{
    BottleForm, EnrichmentData, EnrichmentField, ImagePayload, ParsedWine, WineField,
};

/// Events emitted during a streaming identification call.
#[derive(Debug, Clone)]
pub enum IdentifyEvent {
    /// A partial field arrived; last write per field wins.
    Field { field: WineField, value: String },
    /// Tier transition mid-stream.
    Tier(TierEvent),
    /// Stream finished with a parsed result.
    Done(IdentifyOutcome),
}

/// Mid-stream tier transitions raised by the backend.
#[derive(Debug, Clone)]
pub enum TierEvent {
    /// Backend started background refinement (tier 2).
    Refining,
    /// Refinement produced a replacement result. Only `improved` results
    /// override the first pass.
    Refined {
        parsed: ParsedWine,
        confidence: f32,
        improved: bool,
    },
}

/// Final output of any identification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyOutcome {
    pub parsed: ParsedWine,
    pub confidence: f32,
}

pub type IdentifyStream = Pin<Box<dyn Stream<Item = Result<IdentifyEvent, EngineError>> + Send>>;

/// Events emitted during a streaming enrichment call.
#[derive(Debug, Clone)]
pub enum EnrichEvent {
    /// A structured field arrived whole.
    Field { field: EnrichmentField, value: String },
    /// Incremental free-text delta for one field.
    TextDelta { field: EnrichmentField, delta: String },
    /// Stream finished.
    Done(EnrichOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichOutcome {
    pub data: EnrichmentData,
    pub source: EnrichmentSource,
    /// Set when a cached match below full confidence needs the user to
    /// confirm it is the same wine before any data is shown.
    #[serde(default)]
    pub pending_confirmation: bool,
    /// Display name of the cached wine the lookup matched against.
    #[serde(default)]
    pub matched_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentSource {
    Fresh,
    Cache,
}

pub type EnrichStream = Pin<Box<dyn Stream<Item = Result<EnrichEvent, EngineError>> + Send>>;

/// Why an escalated (tier 3) pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    UserRejected,
    UserRequested,
}

/// Best available input for an escalated pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "inputType")]
pub enum EscalationInput {
    Image {
        image: ImagePayload,
        #[serde(default)]
        note: Option<String>,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextIdentifyRequest {
    pub text: String,
    pub request_id: u64,
    pub locked_fields: Vec<(WineField, String)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIdentifyRequest {
    pub image: ImagePayload,
    pub supplementary_text: Option<String>,
    pub request_id: u64,
    pub locked_fields: Vec<(WineField, String)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalatedIdentifyRequest {
    pub input: EscalationInput,
    pub prior_result: Option<ParsedWine>,
    pub reason: EscalationReason,
    pub locked_fields: Vec<(WineField, String)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub image: ImagePayload,
    pub prior_result: ParsedWine,
    pub locked_fields: Vec<(WineField, String)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichRequest {
    pub producer: Option<String>,
    pub wine_name: Option<String>,
    pub vintage: Option<String>,
    pub wine_type: Option<String>,
    pub region: Option<String>,
    pub confirm_match: bool,
    pub force_refresh: bool,
}

/// Recognition and enrichment surface of the backend.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    async fn identify_text(&self, req: TextIdentifyRequest)
        -> Result<IdentifyStream, EngineError>;

    async fn identify_image(
        &self,
        req: ImageIdentifyRequest,
    ) -> Result<IdentifyStream, EngineError>;

    /// Premium "try harder" pass. Non-streaming.
    async fn identify_escalated(
        &self,
        req: EscalatedIdentifyRequest,
    ) -> Result<IdentifyOutcome, EngineError>;

    /// Grounded verification of a low-confidence image result. Non-streaming.
    async fn verify_image(&self, req: VerifyRequest) -> Result<IdentifyOutcome, EngineError>;

    async fn enrich(&self, req: EnrichRequest) -> Result<EnrichStream, EngineError>;
}

/// The entity types resolved before bottle capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Region,
    Producer,
    Wine,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Region => "region",
            EntityKind::Producer => "producer",
            EntityKind::Wine => "wine",
        }
    }
}

/// An existing catalog record offered as a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCandidate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Matcher output, exact and similar candidates kept apart so exact ones
/// can be listed first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMatches {
    pub exact: Vec<EntityCandidate>,
    pub similar: Vec<EntityCandidate>,
}

impl EntityMatches {
    pub fn total(&self) -> usize {
        self.exact.len() + self.similar.len()
    }

    /// All candidates, exact listed first.
    pub fn all(&self) -> Vec<EntityCandidate> {
        self.exact.iter().chain(self.similar.iter()).cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityQuery {
    pub kind: EntityKind,
    pub term: String,
    /// Scope producer searches by the resolved region when available.
    pub region_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateQuery {
    pub kind: EntityKind,
    pub name: String,
    pub producer_name: Option<String>,
    pub year: Option<String>,
    pub region_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DuplicateReport {
    pub existing_wine_id: Option<String>,
    pub existing_bottles: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyRequest {
    pub kind: EntityKind,
    pub identified: ParsedWine,
    pub options: Vec<EntityCandidate>,
}

/// Reference to a catalog entity: either an existing record or one to be
/// created with the wine. Selection and creation are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "ref")]
pub enum EntityRef {
    Existing { id: String },
    New { name: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWinePayload {
    pub wine_name: String,
    pub vintage: Option<String>,
    pub wine_type: Option<String>,
    pub region: EntityRef,
    pub producer: EntityRef,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBottlePayload {
    pub wine_id: String,
    pub form: BottleForm,
}

/// Catalog surface of the backend: duplicate checks, entity matching and
/// persistence of new wines/bottles.
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    async fn check_duplicate(&self, q: DuplicateQuery) -> Result<DuplicateReport, EngineError>;

    async fn search_entities(&self, q: EntityQuery) -> Result<EntityMatches, EngineError>;

    /// LLM-generated explanation of candidate differences, shown alongside
    /// disambiguation chips. Best-effort.
    async fn clarify_match(&self, q: ClarifyRequest) -> Result<String, EngineError>;

    /// Persist a new wine. Returns the created wine id.
    async fn submit_wine(&self, payload: NewWinePayload) -> Result<String, EngineError>;

    async fn submit_bottle(&self, payload: NewBottlePayload) -> Result<(), EngineError>;
}
