// src/identify.rs
// Identification engine: tiered streaming pipeline with supersession checks
// after every suspension point. Cancellation is a true no-op, not a rollback.

use futures::StreamExt;
use tracing::{debug, warn};

use crate::actions::{ChipAction, chips};
use crate::backend::{
    CatalogBackend, EscalatedIdentifyRequest, EscalationInput, EscalationReason, IdentifyEvent,
    IdentifyOutcome, IdentifyStream, ImageIdentifyRequest, RecognitionBackend,
    TextIdentifyRequest, TierEvent, VerifyRequest,
};
use crate::engine::{Engine, EscalationState};
use crate::error::EngineError;
use crate::lifecycle::RequestTicket;
use crate::present;
use crate::transcript::{EntryContent, EntryRole, Phase};
use crate::wine::ImagePayload;

/// Raw input to an identification pass.
#[derive(Debug, Clone)]
pub(crate) enum IdentifyInput {
    Text { text: String },
    Image {
        image: ImagePayload,
        note: Option<String>,
    },
}

impl<R, C> Engine<R, C>
where
    R: RecognitionBackend + 'static,
    C: CatalogBackend + 'static,
{
    /// Tier-1 identification: open the stream, mirror partial fields live,
    /// honor mid-stream refinement, then finalize.
    pub(crate) async fn run_identification(&self, input: IdentifyInput, echo_user: bool) {
        let ticket = self.lifecycle.begin();
        let from_image = matches!(input, IdentifyInput::Image { .. });

        {
            let mut state = self.lock_state();
            state.error = None;
            if echo_user {
                if let IdentifyInput::Image { image, note } = &input {
                    state.log.push(
                        EntryRole::User,
                        EntryContent::Image {
                            image: image.clone(),
                            note: note.clone(),
                        },
                    );
                }
            }
            match &input {
                IdentifyInput::Text { text } => {
                    state.last_text = Some(text.clone());
                    state.last_image = None;
                }
                IdentifyInput::Image { image, note } => {
                    state.last_image = Some(image.clone());
                    state.last_text = note.clone();
                }
            }
            state.streaming.clear();
            state.refining = false;
            state.escalation = EscalationState::default();
            state.log.disable_chips();
            state.log.set_typing();
            state.phase = Phase::Identifying;
            self.touch(&state);
        }

        let locked_fields = self.lock_state().locked.snapshot();
        let opened = match input {
            IdentifyInput::Text { text } => {
                self.recognition
                    .identify_text(TextIdentifyRequest {
                        text,
                        request_id: ticket.id,
                        locked_fields,
                    })
                    .await
            }
            IdentifyInput::Image { image, note } => {
                self.recognition
                    .identify_image(ImageIdentifyRequest {
                        image,
                        supplementary_text: note,
                        request_id: ticket.id,
                        locked_fields,
                    })
                    .await
            }
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                if !err.is_cancelled() && !self.lifecycle.superseded(&ticket) {
                    self.fail_with(err);
                }
                return;
            }
        };

        self.consume_identify_stream(stream, ticket, from_image, false).await;
    }

    async fn consume_identify_stream(
        &self,
        mut stream: IdentifyStream,
        ticket: RequestTicket,
        from_image: bool,
        escalated: bool,
    ) {
        let mut refined: Option<IdentifyOutcome> = None;
        let mut first_pass: Option<IdentifyOutcome> = None;
        let mut failure: Option<EngineError> = None;

        loop {
            let event = tokio::select! {
                _ = ticket.token.cancelled() => return,
                event = stream.next() => event,
            };
            let Some(event) = event else { break };

            match event {
                Ok(IdentifyEvent::Field { field, value }) => {
                    let mut state = self.lock_state();
                    if self.lifecycle.superseded(&ticket) {
                        return;
                    }
                    state.streaming.set(field, value);
                    self.touch(&state);
                }
                Ok(IdentifyEvent::Tier(TierEvent::Refining)) => {
                    let mut state = self.lock_state();
                    if self.lifecycle.superseded(&ticket) {
                        return;
                    }
                    state.refining = true;
                    state.escalation.tier = 2;
                    self.touch(&state);
                }
                Ok(IdentifyEvent::Tier(TierEvent::Refined {
                    parsed,
                    confidence,
                    improved,
                })) => {
                    if improved {
                        refined = Some(IdentifyOutcome { parsed, confidence });
                    } else {
                        debug!("refined result not an improvement; keeping first pass");
                    }
                }
                Ok(IdentifyEvent::Done(outcome)) => {
                    first_pass = Some(outcome);
                }
                Err(err) if err.is_cancelled() => return,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if self.lifecycle.superseded(&ticket) {
            return;
        }
        if let Some(err) = failure {
            self.fail_with(err);
            return;
        }
        // A refined improvement overrides the first-pass result.
        let Some(outcome) = refined.or(first_pass) else {
            self.fail_with(EngineError::server(
                "The recognition service returned no result.",
            ));
            return;
        };

        self.finalize_identification(ticket, outcome, from_image, escalated)
            .await;
    }

    /// Apply locked fields, run grounded verification for low-confidence
    /// image results, then atomically set the final result and present it.
    async fn finalize_identification(
        &self,
        ticket: RequestTicket,
        mut outcome: IdentifyOutcome,
        from_image: bool,
        escalated: bool,
    ) {
        {
            let state = self.lock_state();
            let overridden = state.locked.apply(&mut outcome.parsed);
            if !overridden.is_empty() {
                debug!(?overridden, "locked fields re-applied over backend result");
            }
        }

        if from_image && !escalated && outcome.confidence < self.config.low_confidence {
            // Keep the partial card visible with a refining indicator rather
            // than finalizing early.
            let image = {
                let mut state = self.lock_state();
                if self.lifecycle.superseded(&ticket) {
                    return;
                }
                state.refining = true;
                state.escalation.tier = 2;
                self.touch(&state);
                state.last_image.clone()
            };

            if let Some(image) = image {
                let request = VerifyRequest {
                    image,
                    prior_result: outcome.parsed.clone(),
                    locked_fields: self.lock_state().locked.snapshot(),
                };
                let verified = tokio::select! {
                    _ = ticket.token.cancelled() => return,
                    result = self.recognition.verify_image(request) => result,
                };
                match verified {
                    Ok(mut v) => {
                        self.lock_state().locked.apply(&mut v.parsed);
                        outcome = v;
                    }
                    Err(err) if err.is_cancelled() => return,
                    Err(err) => {
                        // Silent fallback; the verify chip stays available.
                        warn!("grounded verification failed, keeping pre-verification result: {err}");
                    }
                }
            }
        }

        let mut state = self.lock_state();
        if self.lifecycle.superseded(&ticket) {
            return;
        }
        state.result = Some(outcome.parsed);
        state.confidence = Some(outcome.confidence);
        state.result_from_image = from_image;
        state.result_escalated = escalated;
        state.streaming.clear();
        state.refining = false;
        state.escalation = EscalationState::default();
        state.log.clear_typing();
        state.augmentation = None;
        present::present_result(&mut state, &self.config);
        self.touch(&state);
    }

    /// Identification that consumes a pending augmentation context: prior
    /// image, brief-input prefix and rejection flag all feed the next call.
    pub(crate) async fn run_augmented_identification(&self, text: String) {
        let augmentation = self.lock_state().augmentation.take();
        let Some(augmentation) = augmentation else {
            self.run_identification(IdentifyInput::Text { text }, false).await;
            return;
        };

        let combined = match &augmentation.brief_prefix {
            Some(prefix) if text.split_whitespace().count() < 3 => {
                format!("{prefix} {text}")
            }
            _ => text,
        };

        if let Some(image) = augmentation.image {
            self.run_identification(
                IdentifyInput::Image {
                    image,
                    note: Some(combined),
                },
                false,
            )
            .await;
        } else if augmentation.rejected {
            let prior = augmentation
                .prior_result
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok());
            self.run_escalation_with(
                EscalationInput::Text { text: combined },
                prior,
                EscalationReason::UserRejected,
            )
            .await;
        } else {
            self.run_identification(IdentifyInput::Text { text: combined }, false)
                .await;
        }
    }

    /// Tier-3 escalation using the best available input: image bytes, last
    /// submitted text, or text reconstructed from the prior result.
    pub(crate) async fn run_escalation(&self, reason: EscalationReason) {
        let (input, prior) = {
            let state = self.lock_state();
            let input = if let Some(image) = state.last_image.clone() {
                Some(EscalationInput::Image {
                    image,
                    note: state.last_text.clone(),
                })
            } else if let Some(text) = state.last_text.clone() {
                Some(EscalationInput::Text { text })
            } else {
                state
                    .result
                    .as_ref()
                    .map(|r| r.display_name())
                    .filter(|t| !t.is_empty())
                    .map(|text| EscalationInput::Text { text })
            };
            (input, state.result.clone())
        };

        let Some(input) = input else {
            let mut state = self.lock_state();
            state
                .log
                .push_agent_text("I don't have anything to work from yet — tell me about the wine first.");
            self.touch(&state);
            return;
        };

        self.run_escalation_with(input, prior, reason).await;
    }

    pub(crate) async fn run_escalation_with(
        &self,
        input: EscalationInput,
        prior: Option<crate::wine::ParsedWine>,
        reason: EscalationReason,
    ) {
        let from_image = matches!(input, EscalationInput::Image { .. });
        {
            let mut state = self.lock_state();
            // Strictly sequential: one escalation at a time.
            if state.escalation.active {
                debug!("escalation already active; ignoring");
                return;
            }
            state.escalation = EscalationState { active: true, tier: 3 };
            state.error = None;
            state.log.disable_chips();
            state.log.set_typing();
            state.phase = Phase::Identifying;
            self.touch(&state);
        }

        let ticket = self.lifecycle.begin();
        let request = EscalatedIdentifyRequest {
            input,
            prior_result: prior,
            reason,
            locked_fields: self.lock_state().locked.snapshot(),
        };

        let outcome = tokio::select! {
            _ = ticket.token.cancelled() => {
                self.clear_escalation();
                return;
            }
            result = self.recognition.identify_escalated(request) => result,
        };
        // Completion always clears escalation state, even on failure.
        self.clear_escalation();

        match outcome {
            Ok(outcome) => {
                self.finalize_identification(ticket, outcome, from_image, true).await;
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                if !self.lifecycle.superseded(&ticket) {
                    self.fail_with(err);
                }
            }
        }
    }

    fn clear_escalation(&self) {
        let mut state = self.lock_state();
        state.escalation = EscalationState::default();
        self.touch(&state);
    }

    /// User-requested grounded verification of the current image result.
    pub(crate) async fn run_verification(&self) {
        let (image, prior) = {
            let state = self.lock_state();
            (state.last_image.clone(), state.result.clone())
        };
        let (Some(image), Some(prior)) = (image, prior) else {
            let mut state = self.lock_state();
            state
                .log
                .push_agent_text("I can only double-check results that came from a label photo.");
            self.touch(&state);
            return;
        };

        {
            let mut state = self.lock_state();
            state.refining = true;
            state.escalation.tier = 2;
            state.log.disable_chips();
            state.phase = Phase::Identifying;
            self.touch(&state);
        }

        let ticket = self.lifecycle.begin();
        let request = VerifyRequest {
            image,
            prior_result: prior,
            locked_fields: self.lock_state().locked.snapshot(),
        };
        let verified = tokio::select! {
            _ = ticket.token.cancelled() => return,
            result = self.recognition.verify_image(request) => result,
        };

        match verified {
            Ok(outcome) => {
                self.finalize_identification(ticket, outcome, true, false).await;
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                warn!("verification failed: {err}");
                let mut state = self.lock_state();
                if self.lifecycle.superseded(&ticket) {
                    return;
                }
                state.refining = false;
                state.escalation = EscalationState::default();
                state
                    .log
                    .push_agent_text("I couldn't verify that label just now — keeping what we had.");
                state.log.push_chips(chips([
                    ChipAction::ConfirmResult,
                    ChipAction::NotCorrect,
                    ChipAction::TryHarder,
                ]));
                state.phase = Phase::Confirming;
                self.touch(&state);
            }
        }
    }
}
