// src/enrich.rs
// Enrichment engine: streams descriptive data for the current wine into a
// single card. Cached matches below full confidence go through an explicit
// "same wine?" confirmation before any data is shown.

use std::time::Instant;

use futures::StreamExt;
use tracing::debug;

use crate::actions::{ChipAction, chips};
use crate::backend::{
    CatalogBackend, EnrichEvent, EnrichOutcome, EnrichRequest, EnrichmentSource,
    RecognitionBackend,
};
use crate::engine::{Engine, PendingEnrichment};
use crate::error::EngineError;
use crate::transcript::{AddWineSubPhase, EntryContent, EntryRole, Phase};
use crate::wine::EnrichmentData;

impl<R, C> Engine<R, C>
where
    R: RecognitionBackend + 'static,
    C: CatalogBackend + 'static,
{
    /// Run one enrichment pass. `confirm_match` answers a pending cache
    /// confirmation; `force_refresh` bypasses the cache entirely.
    pub(crate) async fn run_enrichment(&self, confirm_match: bool, force_refresh: bool) {
        let (request, in_add_flow) = {
            let mut state = self.lock_state();
            let Some(result) = state.result.clone() else {
                state
                    .log
                    .push_agent_text("Identify a wine first and I'll pull together notes for it.");
                self.touch(&state);
                return;
            };
            state.log.disable_chips();
            state.error = None;
            state.pending_enrichment = None;
            let in_add_flow = state.add_flow.is_some();
            state.phase = if in_add_flow {
                Phase::AddingWine(Some(AddWineSubPhase::Enrichment))
            } else {
                Phase::Enriching
            };
            state.log.set_typing();
            self.touch(&state);
            (
                EnrichRequest {
                    producer: result.producer.clone(),
                    wine_name: result.wine_name.clone(),
                    vintage: result.vintage.clone(),
                    wine_type: result.wine_type.clone(),
                    region: result.region.clone(),
                    confirm_match,
                    force_refresh,
                },
                in_add_flow,
            )
        };

        let ticket = self.lifecycle.begin();
        let started = Instant::now();

        let mut stream = match self.recognition.enrich(request).await {
            Ok(stream) => stream,
            Err(err) => {
                if !err.is_cancelled() && !self.lifecycle.superseded(&ticket) {
                    self.fail_with(err);
                }
                return;
            }
        };

        let mut streamed = EnrichmentData::default();
        let mut outcome: Option<EnrichOutcome> = None;
        let throttle = self.config.text_delta_throttle();
        let mut last_notify = Instant::now();

        loop {
            let event = tokio::select! {
                _ = ticket.token.cancelled() => return,
                event = stream.next() => event,
            };
            let Some(event) = event else { break };

            match event {
                Ok(EnrichEvent::Field { field, value }) => {
                    streamed.set(field, value);
                }
                Ok(EnrichEvent::TextDelta { field, delta }) => {
                    streamed.append(field, &delta);
                    // Progress heartbeat, throttled so bursty deltas don't
                    // flood observers.
                    if last_notify.elapsed() >= throttle {
                        let state = self.lock_state();
                        if self.lifecycle.superseded(&ticket) {
                            return;
                        }
                        self.touch(&state);
                        last_notify = Instant::now();
                    }
                }
                Ok(EnrichEvent::Done(done)) => {
                    outcome = Some(done);
                }
                Err(err) if err.is_cancelled() => return,
                Err(err) => {
                    if !self.lifecycle.superseded(&ticket) {
                        self.fail_with(err);
                    }
                    return;
                }
            }
        }

        if self.lifecycle.superseded(&ticket) {
            return;
        }
        let Some(outcome) = outcome else {
            self.fail_with(EngineError::enrichment(
                "I couldn't put together notes for this wine just now.",
            ));
            return;
        };

        // A low-confidence cache hit asks before showing anything.
        if outcome.pending_confirmation && !confirm_match {
            let mut state = self.lock_state();
            state.log.clear_typing();
            let matched = outcome
                .matched_to
                .clone()
                .unwrap_or_else(|| "a wine already in the guide".into());
            state.log.push_agent_text(format!(
                "I have notes on file for {matched}. Is that the same wine?"
            ));
            state.log.push_chips(chips([
                ChipAction::AcceptCachedEnrichment,
                ChipAction::RefreshEnrichment,
            ]));
            state.pending_enrichment = Some(PendingEnrichment {
                matched_to: outcome.matched_to,
            });
            self.touch(&state);
            return;
        }

        // The final payload is authoritative where present; streamed text
        // fills whatever it left out.
        let data = merge_enrichment(streamed, outcome.data);
        let cached = outcome.source == EnrichmentSource::Cache;

        // Hold the card briefly so fast responses don't flash past the
        // typing indicator. Cache hits skip the hold.
        if !cached {
            let elapsed = started.elapsed();
            let delay = self.config.card_delay();
            if elapsed < delay {
                tokio::select! {
                    _ = ticket.token.cancelled() => return,
                    _ = tokio::time::sleep(delay - elapsed) => {}
                }
            }
        } else {
            debug!("cache hit; presenting enrichment immediately");
        }

        let mut state = self.lock_state();
        if self.lifecycle.superseded(&ticket) {
            return;
        }
        state.pending_enrichment = None;
        state
            .log
            .replace_typing(EntryRole::Agent, EntryContent::EnrichmentCard { data, cached });

        let mut follow_up = Vec::new();
        if cached {
            follow_up.push(ChipAction::RefreshEnrichment);
        }
        if in_add_flow {
            follow_up.push(ChipAction::FinishFlow);
        } else {
            follow_up.push(ChipAction::AddToCellar);
            follow_up.push(ChipAction::SearchAgain);
        }
        state.log.push_chips(chips(follow_up));
        state.phase = Phase::Complete;
        self.touch(&state);
    }
}

fn merge_enrichment(streamed: EnrichmentData, authoritative: EnrichmentData) -> EnrichmentData {
    let mut data = streamed;
    if authoritative.style.is_some() {
        data.style = authoritative.style;
    }
    if authoritative.tasting_notes.is_some() {
        data.tasting_notes = authoritative.tasting_notes;
    }
    if authoritative.pairings.is_some() {
        data.pairings = authoritative.pairings;
    }
    if authoritative.critic_score.is_some() {
        data.critic_score = authoritative.critic_score;
    }
    if authoritative.drink_window.is_some() {
        data.drink_window = authoritative.drink_window;
    }
    data
}
