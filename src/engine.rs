// src/engine.rs
// The conversation engine: single-owner state container plus the action
// router. UI hands in discrete actions; everything surfaces back through
// the observable message log and phase.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::actions::{Action, ChipAction, chips};
use crate::backend::{CatalogBackend, EscalationReason, RecognitionBackend};
use crate::config::Config;
use crate::detect::{self, Detected};
use crate::error::EngineError;
use crate::identify::IdentifyInput;
use crate::lifecycle::Lifecycle;
use crate::present;
use crate::retry::RetryTracker;
use crate::transcript::{EntryContent, EntryRole, MessageLog, Phase, TranscriptEntry};
use crate::wine::{ImagePayload, LockedFields, ParsedWine, StreamingFields, WineField};

pub(crate) use state::*;

mod state {
    use super::*;
    use crate::backend::{EntityCandidate, EntityKind};
    use crate::wine::BottleForm;

    /// Escalation bookkeeping. Only one escalation may be active; completing
    /// or failing it clears the flag.
    #[derive(Debug, Clone, Copy, Default)]
    pub(crate) struct EscalationState {
        pub active: bool,
        pub tier: u8,
    }

    /// Transient carry-over when the user is asked for more information.
    /// Consumed by the next identification call.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct AugmentationContext {
        pub prior_result: Option<String>,
        pub image: Option<ImagePayload>,
        pub brief_prefix: Option<String>,
        pub rejected: bool,
    }

    /// Per-entity-type slot used by the add-wine flow.
    #[derive(Debug, Clone)]
    pub(crate) struct PerEntity<T> {
        pub region: Option<T>,
        pub producer: Option<T>,
        pub wine: Option<T>,
    }

    // Not derived: the slots are empty by default whether or not `T` has a
    // `Default` of its own.
    impl<T> Default for PerEntity<T> {
        fn default() -> Self {
            Self {
                region: None,
                producer: None,
                wine: None,
            }
        }
    }

    impl<T> PerEntity<T> {
        pub fn get(&self, kind: EntityKind) -> Option<&T> {
            match kind {
                EntityKind::Region => self.region.as_ref(),
                EntityKind::Producer => self.producer.as_ref(),
                EntityKind::Wine => self.wine.as_ref(),
            }
        }

        pub fn set(&mut self, kind: EntityKind, value: T) {
            match kind {
                EntityKind::Region => self.region = Some(value),
                EntityKind::Producer => self.producer = Some(value),
                EntityKind::Wine => self.wine = Some(value),
            }
        }

        pub fn take(&mut self, kind: EntityKind) -> Option<T> {
            match kind {
                EntityKind::Region => self.region.take(),
                EntityKind::Producer => self.producer.take(),
                EntityKind::Wine => self.wine.take(),
            }
        }
    }

    /// State of an in-progress add-to-collection flow.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct AddWineFlowState {
        pub wine: ParsedWine,
        /// Entity type currently being resolved, if resolution is mid-flight.
        pub pending_kind: Option<EntityKind>,
        pub selected: PerEntity<EntityCandidate>,
        pub created: PerEntity<String>,
        pub matches: PerEntity<Vec<EntityCandidate>>,
        /// Search term used per entity type, kept for create-new naming.
        pub terms: PerEntity<String>,
        pub existing_wine_id: Option<String>,
        pub existing_bottles: u32,
        pub form_defaults: BottleForm,
    }

    impl AddWineFlowState {
        /// Selection and creation are mutually exclusive per entity type.
        pub fn select(&mut self, kind: EntityKind, candidate: EntityCandidate) {
            self.created.take(kind);
            self.selected.set(kind, candidate);
        }

        pub fn create(&mut self, kind: EntityKind, name: String) {
            self.selected.take(kind);
            self.created.set(kind, name);
        }
    }

    /// Cache-confirmation branch waiting on the user.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct PendingEnrichment {
        pub matched_to: Option<String>,
    }

    /// All mutable conversation state. Single writer at a time by
    /// construction: the lock is never held across an await.
    #[derive(Debug)]
    pub(crate) struct ConvState {
        pub log: MessageLog,
        pub phase: Phase,
        pub result: Option<ParsedWine>,
        pub confidence: Option<f32>,
        pub result_from_image: bool,
        pub result_escalated: bool,
        pub streaming: StreamingFields,
        pub refining: bool,
        pub locked: LockedFields,
        pub escalation: EscalationState,
        pub augmentation: Option<AugmentationContext>,
        pub pending_field: Option<WineField>,
        pub correction_field: Option<WineField>,
        pub skipped_fields: Vec<WineField>,
        pub add_flow: Option<AddWineFlowState>,
        pub retry: RetryTracker,
        pub error: Option<EngineError>,
        pub last_text: Option<String>,
        pub last_image: Option<ImagePayload>,
        pub pending_new_search: Option<String>,
        pub pending_enrichment: Option<PendingEnrichment>,
    }

    impl Default for ConvState {
        fn default() -> Self {
            Self {
                log: MessageLog::default(),
                phase: Phase::Greeting,
                result: None,
                confidence: None,
                result_from_image: false,
                result_escalated: false,
                streaming: StreamingFields::default(),
                refining: false,
                locked: LockedFields::default(),
                escalation: EscalationState::default(),
                augmentation: None,
                pending_field: None,
                correction_field: None,
                skipped_fields: Vec::new(),
                add_flow: None,
                retry: RetryTracker::default(),
                error: None,
                last_text: None,
                last_image: None,
                pending_new_search: None,
                pending_enrichment: None,
            }
        }
    }

    impl ConvState {
        /// Drop everything tied to the current wine, keeping the transcript.
        pub fn reset_wine_context(&mut self) {
            self.result = None;
            self.confidence = None;
            self.result_from_image = false;
            self.result_escalated = false;
            self.streaming.clear();
            self.refining = false;
            self.locked.clear();
            self.escalation = EscalationState::default();
            self.augmentation = None;
            self.pending_field = None;
            self.correction_field = None;
            self.skipped_fields.clear();
            self.add_flow = None;
            self.error = None;
            self.pending_new_search = None;
            self.pending_enrichment = None;
        }
    }
}

const MSG_GREETING: &str =
    "Hi! Tell me about a wine, or send a photo of the label, and I'll identify it for you.";
const MSG_SEARCH_AGAIN: &str = "Sure — which wine should I look for?";
const MSG_NOTHING_TO_RETRY: &str = "There's nothing to retry right now. Want to search for a wine?";
const MSG_KEEPING_CURRENT: &str = "Okay, keeping the current result.";

/// The conversation orchestration engine. Cheap to clone; all state is
/// shared behind the same container.
pub struct Engine<R, C> {
    pub(crate) recognition: Arc<R>,
    pub(crate) catalog: Arc<C>,
    pub(crate) config: Arc<Config>,
    pub(crate) state: Arc<Mutex<ConvState>>,
    pub(crate) lifecycle: Arc<Lifecycle>,
    revision: Arc<watch::Sender<u64>>,
}

impl<R, C> Clone for Engine<R, C> {
    fn clone(&self) -> Self {
        Self {
            recognition: Arc::clone(&self.recognition),
            catalog: Arc::clone(&self.catalog),
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            lifecycle: Arc::clone(&self.lifecycle),
            revision: Arc::clone(&self.revision),
        }
    }
}

impl<R, C> Engine<R, C>
where
    R: RecognitionBackend + 'static,
    C: CatalogBackend + 'static,
{
    pub fn new(recognition: Arc<R>, catalog: Arc<C>, config: Config) -> Self {
        let mut state = ConvState::default();
        state.log.push_agent_text(MSG_GREETING);
        state.phase = Phase::Greeting;

        let (revision_tx, _) = watch::channel(state.log.revision());
        Self {
            recognition,
            catalog,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            lifecycle: Arc::new(Lifecycle::new()),
            revision: Arc::new(revision_tx),
        }
    }

    // ---- observable surface ----

    /// Change notifications for the rendering layer. The value is an opaque
    /// revision counter; re-read the snapshots when it moves.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.lock_state().log.snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.lock_state().phase
    }

    pub fn streaming_fields(&self) -> StreamingFields {
        self.lock_state().streaming.clone()
    }

    pub fn current_result(&self) -> Option<(ParsedWine, Option<f32>)> {
        let state = self.lock_state();
        state.result.clone().map(|r| (r, state.confidence))
    }

    // ---- entry point ----

    /// Single entry point for user actions. Fire-and-forget: all results
    /// surface through the log and phase.
    pub async fn dispatch(&self, action: Action) {
        self.dispatch_impl(action, false).await;
    }

    pub(crate) async fn dispatch_impl(&self, action: Action, synthetic: bool) {
        debug!(?action, synthetic, "dispatching action");
        match action {
            Action::SubmitText { text } => self.handle_text(text, synthetic).await,
            Action::SubmitImage { image, note } => {
                self.record_retry(
                    synthetic,
                    &Action::SubmitImage {
                        image: image.clone(),
                        note: note.clone(),
                    },
                );
                self.run_identification(IdentifyInput::Image { image, note }, !synthetic)
                    .await;
            }
            Action::SubmitBottleForm { form } => self.submit_bottle_form(form).await,
            Action::Chip { action, .. } => self.handle_chip(action, synthetic).await,
        }
    }

    // ---- free text ----

    async fn handle_text(&self, text: String, synthetic: bool) {
        let text = text.trim().to_string();
        if text.is_empty() {
            debug!("ignoring empty text submit");
            return;
        }

        if !synthetic {
            let mut state = self.lock_state();
            state.log.push_user_text(&text);
            self.touch(&state);
        }

        let detected = {
            let state = self.lock_state();
            detect::detect(&state, &self.config, &text)
        };

        match detected {
            Detected::Command(chip) => Box::pin(self.handle_chip(chip, synthetic)).await,
            Detected::FieldCorrection { field, value } => {
                self.apply_field_value(field, value, true)
            }
            Detected::MissingFieldValue { field, value } => {
                self.apply_field_value(field, value, false)
            }
            Detected::DirectValue { field, value } => self.apply_field_value(field, value, true),
            Detected::ChipPhrase(chip) => Box::pin(self.handle_chip(chip, synthetic)).await,
            Detected::NewSearchConfirm { text } => self.guard_new_search(text, false),
            Detected::TooBrief { text } => self.guard_new_search(text, true),
            Detected::Identify => {
                self.record_retry(synthetic, &Action::SubmitText { text: text.clone() });
                // A pending augmentation context is consumed only here, by
                // the next identification call; corrections and explicit
                // commands above route past it untouched.
                let augmented = self.lock_state().augmentation.is_some();
                if augmented {
                    self.run_augmented_identification(text).await;
                } else {
                    self.run_identification(IdentifyInput::Text { text }, false).await;
                }
            }
        }
    }

    /// Ask before treating ambiguous or very brief text as a brand-new search.
    fn guard_new_search(&self, text: String, brief: bool) {
        let mut state = self.lock_state();
        let message = if brief {
            format!("That's quite brief — should I search for \"{text}\"?")
        } else {
            format!("Should I start a new search for \"{text}\"?")
        };
        state.pending_new_search = Some(text);
        state.log.push_agent_text(message);
        state.log.push_chips(chips([
            ChipAction::ConfirmNewSearch,
            ChipAction::KeepCurrent,
        ]));
        self.touch(&state);
    }

    // ---- chips ----

    async fn handle_chip(&self, chip: ChipAction, synthetic: bool) {
        match chip {
            ChipAction::ConfirmResult => self.confirm_result(),
            ChipAction::NotCorrect => self.reject_result(),
            ChipAction::Verify => {
                self.record_retry(
                    synthetic,
                    &Action::Chip {
                        action: ChipAction::Verify,
                        message_id: None,
                    },
                );
                self.run_verification().await;
            }
            ChipAction::TryHarder => {
                self.record_retry(
                    synthetic,
                    &Action::Chip {
                        action: ChipAction::TryHarder,
                        message_id: None,
                    },
                );
                let reason = {
                    let state = self.lock_state();
                    if state.augmentation.as_ref().is_some_and(|a| a.rejected) {
                        EscalationReason::UserRejected
                    } else {
                        EscalationReason::UserRequested
                    }
                };
                self.run_escalation(reason).await;
            }
            ChipAction::SearchAgain => self.search_again(),
            ChipAction::StartOver => self.start_over(),
            ChipAction::Retry => self.handle_retry().await,
            ChipAction::AddToCellar | ChipAction::ContinueManually => {
                self.start_add_flow().await;
            }
            ChipAction::EnrichWine => {
                self.record_retry(
                    synthetic,
                    &Action::Chip {
                        action: ChipAction::EnrichWine,
                        message_id: None,
                    },
                );
                self.run_enrichment(false, false).await;
            }
            ChipAction::FinishFlow => self.finish_flow(),
            ChipAction::ReIdentify => {
                let text = {
                    let state = self.lock_state();
                    state
                        .result
                        .as_ref()
                        .map(|r| r.display_name())
                        .unwrap_or_default()
                };
                if text.is_empty() {
                    self.search_again();
                } else {
                    self.record_retry(
                        synthetic,
                        &Action::Chip {
                            action: ChipAction::ReIdentify,
                            message_id: None,
                        },
                    );
                    self.run_identification(IdentifyInput::Text { text }, false).await;
                }
            }
            ChipAction::FixField { field } => self.begin_field_correction(field),
            ChipAction::SkipField => self.skip_field(),
            ChipAction::ConfirmNewSearch => {
                let pending = self.lock_state().pending_new_search.take();
                if let Some(text) = pending {
                    {
                        let mut state = self.lock_state();
                        state.log.disable_chips();
                        state.reset_wine_context();
                        self.touch(&state);
                    }
                    self.record_retry(synthetic, &Action::SubmitText { text: text.clone() });
                    self.run_identification(IdentifyInput::Text { text }, false).await;
                }
            }
            ChipAction::KeepCurrent => {
                let mut state = self.lock_state();
                state.pending_new_search = None;
                state.log.disable_chips();
                state.log.push_agent_text(MSG_KEEPING_CURRENT);
                state.phase = if state.result.is_some() {
                    Phase::Confirming
                } else {
                    Phase::AwaitingInput
                };
                self.touch(&state);
            }
            ChipAction::AddBottleToExisting => self.add_bottle_to_existing(),
            ChipAction::CreateNewWineAnyway => self.begin_entity_resolution().await,
            ChipAction::SelectCandidate { kind, candidate_id } => {
                self.select_entity(kind, candidate_id).await;
            }
            ChipAction::CreateEntity { kind } => self.create_entity(kind).await,
            ChipAction::AcceptCachedEnrichment => {
                self.record_retry(
                    synthetic,
                    &Action::Chip {
                        action: ChipAction::AcceptCachedEnrichment,
                        message_id: None,
                    },
                );
                self.run_enrichment(true, false).await;
            }
            ChipAction::RefreshEnrichment => {
                self.record_retry(
                    synthetic,
                    &Action::Chip {
                        action: ChipAction::RefreshEnrichment,
                        message_id: None,
                    },
                );
                self.run_enrichment(false, true).await;
            }
        }
    }

    // ---- result confirmation flows ----

    fn confirm_result(&self) {
        let mut state = self.lock_state();
        if state.result.is_none() {
            warn!("confirm with no result; ignoring");
            return;
        }
        state.log.disable_chips();
        state.log.push_agent_text("Great. What would you like to do next?");
        state.log.push_chips(chips([
            ChipAction::AddToCellar,
            ChipAction::EnrichWine,
            ChipAction::SearchAgain,
        ]));
        state.phase = Phase::Confirming;
        self.touch(&state);
    }

    /// "Not correct" on a confirmed result: stash augmentation context and
    /// offer per-field corrections.
    fn reject_result(&self) {
        let mut state = self.lock_state();
        let Some(result) = state.result.clone() else {
            warn!("reject with no result; ignoring");
            return;
        };
        let serialized = serde_json::to_string(&result).ok();
        state.augmentation = Some(AugmentationContext {
            prior_result: serialized,
            image: state.last_image.clone(),
            brief_prefix: state.last_text.clone(),
            rejected: true,
        });
        state.log.disable_chips();
        state
            .log
            .push_agent_text("Thanks for flagging that. What's wrong?");

        let mut correction = Vec::new();
        for field in [
            WineField::Producer,
            WineField::WineName,
            WineField::Vintage,
            WineField::Region,
        ] {
            if result.get(field).is_some() {
                correction.push(ChipAction::FixField { field });
            }
        }
        correction.push(ChipAction::TryHarder);
        correction.push(ChipAction::SearchAgain);
        state.log.push_chips(chips(correction));
        state.phase = Phase::AwaitingInput;
        self.touch(&state);
    }

    fn begin_field_correction(&self, field: WineField) {
        let mut state = self.lock_state();
        state.correction_field = Some(field);
        state.log.disable_chips();
        state
            .log
            .push_agent_text(format!("What's the correct {}?", field.as_str()));
        state.phase = Phase::AwaitingInput;
        self.touch(&state);
    }

    /// Apply a user-supplied field value: update the result, lock the field,
    /// then either re-present the card (correction) or continue the
    /// missing-field flow.
    fn apply_field_value(&self, field: WineField, value: String, correction: bool) {
        let mut state = self.lock_state();
        let mut result = state.result.take().unwrap_or_default();
        result.set(field, value.clone());
        state.locked.lock(field, value);
        state.result = Some(result);
        state.correction_field = None;
        state.pending_field = None;
        state.log.disable_chips();

        if correction {
            present::present_correction(&mut state);
        } else {
            present::continue_missing_flow(&mut state, &self.config);
        }
        self.touch(&state);
    }

    fn skip_field(&self) {
        let mut state = self.lock_state();
        if let Some(field) = state.pending_field.take() {
            state.skipped_fields.push(field);
        }
        state.log.disable_chips();
        present::continue_missing_flow(&mut state, &self.config);
        self.touch(&state);
    }

    // ---- navigation ----

    fn search_again(&self) {
        self.lifecycle.cancel_all();
        let mut state = self.lock_state();
        state.log.disable_chips();
        state.log.clear_typing();
        state.reset_wine_context();
        state.log.push_agent_text(MSG_SEARCH_AGAIN);
        state.phase = Phase::AwaitingInput;
        self.touch(&state);
    }

    /// Full reset: cancel anything in flight and suppress its callbacks.
    fn start_over(&self) {
        self.lifecycle.cancel_all();
        let mut state = self.lock_state();
        state.log.disable_chips();
        state.log.clear_typing();
        state.reset_wine_context();
        state.retry.clear();
        state.last_text = None;
        state.last_image = None;
        state.log.push_agent_text(MSG_GREETING);
        state.phase = Phase::AwaitingInput;
        self.touch(&state);
    }

    fn finish_flow(&self) {
        let mut state = self.lock_state();
        state.log.disable_chips();
        state.add_flow = None;
        state
            .log
            .push_agent_text("Enjoy! Send another label whenever you're ready.");
        state.phase = Phase::Complete;
        self.touch(&state);
    }

    // ---- retry ----

    async fn handle_retry(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            state.error = None;
            let snapshot = state.retry.take_fresh(self.config.last_action_expiry());
            match snapshot {
                Some(action) => {
                    state.log.disable_chips();
                    state.phase = Phase::Identifying;
                    self.touch(&state);
                    Some(action)
                }
                None => {
                    state.log.disable_chips();
                    state.log.push_agent_text(MSG_NOTHING_TO_RETRY);
                    state
                        .log
                        .push_chips(chips([ChipAction::SearchAgain, ChipAction::StartOver]));
                    state.phase = Phase::AwaitingInput;
                    self.touch(&state);
                    None
                }
            }
        };

        if let Some(action) = snapshot {
            Box::pin(self.dispatch_impl(action, true)).await;
        }
    }

    // ---- shared plumbing ----

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ConvState> {
        self.state.lock().expect("conversation state lock poisoned")
    }

    /// Notify observers that something changed.
    pub(crate) fn touch(&self, _state: &ConvState) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn record_retry(&self, synthetic: bool, action: &Action) {
        if !synthetic {
            self.lock_state().retry.record(action);
        }
    }

    /// Normalize a backend failure into the taxonomy and surface it with
    /// retry-appropriate chips. Cancellation never reaches the transcript.
    pub(crate) fn fail_with(&self, err: EngineError) {
        if err.is_cancelled() {
            debug!("suppressing cancellation error");
            return;
        }
        let mut state = self.lock_state();
        state.log.clear_typing();
        state.streaming.clear();
        state.refining = false;
        state.escalation = EscalationState::default();
        state.log.push(
            EntryRole::Agent,
            EntryContent::Error {
                message: err.user_message().to_string(),
                retryable: err.retryable(),
                support_ref: err.support_ref().map(str::to_string),
            },
        );
        let actions = if err.retryable() {
            vec![ChipAction::Retry, ChipAction::StartOver]
        } else {
            vec![ChipAction::StartOver]
        };
        state.log.push_chips(chips(actions));
        state.error = Some(err);
        state.phase = Phase::Error;
        self.touch(&state);
    }
}
