// tests/engine_scenarios.rs
// End-to-end conversation scenarios against a scripted in-memory backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use tokio::sync::Notify;

use sommelier::actions::{Action, ChipAction};
use sommelier::backend::{
    CatalogBackend, ClarifyRequest, DuplicateQuery, DuplicateReport, EnrichEvent, EnrichOutcome,
    EnrichRequest, EnrichStream, EnrichmentSource, EntityCandidate, EntityKind, EntityMatches,
    EntityQuery, EntityRef, EscalatedIdentifyRequest, EscalationReason, IdentifyEvent,
    IdentifyOutcome, IdentifyStream, ImageIdentifyRequest, NewBottlePayload, NewWinePayload,
    RecognitionBackend, TextIdentifyRequest, TierEvent, VerifyRequest,
};
use sommelier::config::Config;
use sommelier::engine::Engine;
use sommelier::error::EngineError;
use sommelier::transcript::{AddWineSubPhase, EntryContent, EntryRole, Phase, TranscriptEntry};
use sommelier::wine::{
    BottleForm, EnrichmentData, EnrichmentField, ImagePayload, ParsedWine, WineField,
};

/// Scripted backend. Each identification/enrichment call pops the next
/// queued event list; catalog calls serve canned data and record requests.
#[derive(Default)]
struct MockBackend {
    identify_streams: Mutex<VecDeque<Vec<IdentifyEvent>>>,
    /// When set, the stream waits on this before yielding its final event.
    gate: Mutex<Option<Arc<Notify>>>,
    escalated_outcome: Mutex<Option<IdentifyOutcome>>,
    escalated_calls: Mutex<Vec<EscalatedIdentifyRequest>>,
    verify_calls: Mutex<u32>,
    verify_fails: Mutex<bool>,
    enrich_streams: Mutex<VecDeque<Vec<EnrichEvent>>>,
    enrich_calls: Mutex<Vec<EnrichRequest>>,
    duplicate: Mutex<DuplicateReport>,
    matches: Mutex<HashMap<&'static str, EntityMatches>>,
    searches: Mutex<Vec<EntityQuery>>,
    wines: Mutex<Vec<NewWinePayload>>,
    bottles: Mutex<Vec<NewBottlePayload>>,
}

impl MockBackend {
    fn queue_identify(&self, events: Vec<IdentifyEvent>) {
        self.identify_streams.lock().unwrap().push_back(events);
    }

    fn queue_enrich(&self, events: Vec<EnrichEvent>) {
        self.enrich_streams.lock().unwrap().push_back(events);
    }

    fn gated(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn scripted_stream(&self) -> IdentifyStream {
        let events = self
            .identify_streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let gate = self.gate.lock().unwrap().clone();
        let total = events.len();
        Box::pin(stream! {
            for (i, event) in events.into_iter().enumerate() {
                if i + 1 == total {
                    if let Some(gate) = &gate {
                        gate.notified().await;
                    }
                }
                yield Ok(event);
            }
        })
    }
}

#[async_trait]
impl RecognitionBackend for MockBackend {
    async fn identify_text(
        &self,
        _req: TextIdentifyRequest,
    ) -> Result<IdentifyStream, EngineError> {
        Ok(self.scripted_stream())
    }

    async fn identify_image(
        &self,
        _req: ImageIdentifyRequest,
    ) -> Result<IdentifyStream, EngineError> {
        Ok(self.scripted_stream())
    }

    async fn identify_escalated(
        &self,
        req: EscalatedIdentifyRequest,
    ) -> Result<IdentifyOutcome, EngineError> {
        self.escalated_calls.lock().unwrap().push(req);
        Ok(self
            .escalated_outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(IdentifyOutcome {
                parsed: ParsedWine::default(),
                confidence: 0.3,
            }))
    }

    async fn verify_image(&self, req: VerifyRequest) -> Result<IdentifyOutcome, EngineError> {
        *self.verify_calls.lock().unwrap() += 1;
        if *self.verify_fails.lock().unwrap() {
            return Err(EngineError::server("verification unavailable"));
        }
        Ok(IdentifyOutcome {
            parsed: req.prior_result,
            confidence: 0.9,
        })
    }

    async fn enrich(&self, req: EnrichRequest) -> Result<EnrichStream, EngineError> {
        self.enrich_calls.lock().unwrap().push(req);
        let events = self
            .enrich_streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::pin(stream! {
            for event in events {
                yield Ok(event);
            }
        }))
    }
}

#[async_trait]
impl CatalogBackend for MockBackend {
    async fn check_duplicate(&self, _q: DuplicateQuery) -> Result<DuplicateReport, EngineError> {
        Ok(self.duplicate.lock().unwrap().clone())
    }

    async fn search_entities(&self, q: EntityQuery) -> Result<EntityMatches, EngineError> {
        let result = self
            .matches
            .lock()
            .unwrap()
            .get(q.kind.as_str())
            .cloned()
            .unwrap_or_default();
        self.searches.lock().unwrap().push(q);
        Ok(result)
    }

    async fn clarify_match(&self, _q: ClarifyRequest) -> Result<String, EngineError> {
        Ok(String::new())
    }

    async fn submit_wine(&self, payload: NewWinePayload) -> Result<String, EngineError> {
        self.wines.lock().unwrap().push(payload);
        Ok("wine-1".into())
    }

    async fn submit_bottle(&self, payload: NewBottlePayload) -> Result<(), EngineError> {
        self.bottles.lock().unwrap().push(payload);
        Ok(())
    }
}

// ---- helpers ----

fn test_config() -> Config {
    Config {
        card_delay_ms: 0,
        text_delta_throttle_ms: 0,
        ..Default::default()
    }
}

fn engine(backend: &Arc<MockBackend>) -> Engine<MockBackend, MockBackend> {
    Engine::new(Arc::clone(backend), Arc::clone(backend), test_config())
}

fn opus_one() -> ParsedWine {
    let mut wine = ParsedWine::default();
    wine.producer = Some("Opus One".into());
    wine.wine_name = Some("Opus One".into());
    wine.vintage = Some("2019".into());
    wine.region = Some("Napa Valley".into());
    wine
}

fn full_identify(parsed: ParsedWine, confidence: f32) -> Vec<IdentifyEvent> {
    vec![
        IdentifyEvent::Field {
            field: WineField::Producer,
            value: parsed.producer.clone().unwrap_or_default(),
        },
        IdentifyEvent::Field {
            field: WineField::WineName,
            value: parsed.wine_name.clone().unwrap_or_default(),
        },
        IdentifyEvent::Done(IdentifyOutcome { parsed, confidence }),
    ]
}

fn active_chips(entries: &[TranscriptEntry]) -> Vec<ChipAction> {
    entries
        .iter()
        .rev()
        .find_map(|e| match &e.content {
            EntryContent::Chips { chips } if !e.disabled => {
                Some(chips.iter().map(|c| c.action.clone()).collect())
            }
            _ => None,
        })
        .unwrap_or_default()
}

fn has_wine_card(entries: &[TranscriptEntry]) -> bool {
    entries
        .iter()
        .any(|e| matches!(e.content, EntryContent::WineCard { .. }))
}

fn wine_card_count(entries: &[TranscriptEntry]) -> usize {
    entries
        .iter()
        .filter(|e| matches!(e.content, EntryContent::WineCard { .. }))
        .count()
}

async fn submit_text(engine: &Engine<MockBackend, MockBackend>, text: &str) {
    engine
        .dispatch(Action::SubmitText { text: text.into() })
        .await;
}

async fn tap(engine: &Engine<MockBackend, MockBackend>, action: ChipAction) {
    engine
        .dispatch(Action::Chip {
            action,
            message_id: None,
        })
        .await;
}

// ---- scenarios ----

#[tokio::test]
async fn high_confidence_text_identification_presents_card() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;

    let transcript = engine.transcript();
    assert!(has_wine_card(&transcript));
    assert_eq!(engine.phase(), Phase::Confirming);
    let chips = active_chips(&transcript);
    assert!(chips.contains(&ChipAction::ConfirmResult));
    assert!(chips.contains(&ChipAction::NotCorrect));
    assert!(chips.contains(&ChipAction::TryHarder));
    // Text-sourced results never offer label verification.
    assert!(!chips.contains(&ChipAction::Verify));
    // The live field map is cleared once the final result lands.
    assert!(engine.streaming_fields().is_empty());
}

#[tokio::test]
async fn grape_only_result_prompts_for_wine_name() {
    let backend = Arc::new(MockBackend::default());
    let mut grape_only = ParsedWine::default();
    grape_only.grapes = vec!["Zinfandel".into()];
    backend.queue_identify(vec![IdentifyEvent::Done(IdentifyOutcome {
        parsed: grape_only,
        confidence: 0.5,
    })]);
    let engine = engine(&backend);

    submit_text(&engine, "a nice zinfandel").await;

    let transcript = engine.transcript();
    assert!(!has_wine_card(&transcript));
    assert_eq!(engine.phase(), Phase::AwaitingInput);
    let prompted = transcript.iter().any(|e| {
        matches!(&e.content, EntryContent::Text { text } if text.contains("Zinfandel"))
    });
    assert!(prompted, "expected a grape-conditioned wine-name prompt");
}

#[tokio::test]
async fn rejection_offers_field_fixes_and_escalates_on_new_text() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let mut better = ParsedWine::default();
    better.producer = Some("Ridge".into());
    better.wine_name = Some("Monte Bello".into());
    *backend.escalated_outcome.lock().unwrap() = Some(IdentifyOutcome {
        parsed: better,
        confidence: 0.88,
    });
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    tap(&engine, ChipAction::NotCorrect).await;

    let chips = active_chips(&engine.transcript());
    assert!(chips.contains(&ChipAction::FixField {
        field: WineField::Producer
    }));
    assert!(chips.contains(&ChipAction::TryHarder));
    assert_eq!(engine.phase(), Phase::AwaitingInput);

    // Free text after a rejection goes through the escalated pass with the
    // rejected result attached.
    submit_text(&engine, "it's a Ridge Monte Bello").await;

    let calls = backend.escalated_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].reason, EscalationReason::UserRejected);
    assert!(calls[0].prior_result.is_some());
    drop(calls);

    let (result, _) = engine.current_result().expect("escalated result");
    assert_eq!(result.producer.as_deref(), Some("Ridge"));
    assert_eq!(engine.phase(), Phase::Confirming);
}

#[tokio::test]
async fn field_correction_locks_value_and_represents_card() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    submit_text(&engine, "vintage is 2016").await;

    let (result, _) = engine.current_result().expect("corrected result");
    assert_eq!(result.vintage.as_deref(), Some("2016"));
    assert_eq!(engine.phase(), Phase::Confirming);
    assert_eq!(wine_card_count(&engine.transcript()), 2);
}

#[tokio::test]
async fn duplicate_precheck_short_circuits_to_existing_wine() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    *backend.duplicate.lock().unwrap() = DuplicateReport {
        existing_wine_id: Some("w-9".into()),
        existing_bottles: 2,
    };
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    tap(&engine, ChipAction::ConfirmResult).await;
    tap(&engine, ChipAction::AddToCellar).await;

    let chips = active_chips(&engine.transcript());
    assert!(chips.contains(&ChipAction::AddBottleToExisting));
    assert!(chips.contains(&ChipAction::CreateNewWineAnyway));

    tap(&engine, ChipAction::AddBottleToExisting).await;
    let shows_form = engine
        .transcript()
        .iter()
        .any(|e| matches!(e.content, EntryContent::Form { .. }));
    assert!(shows_form);

    engine
        .dispatch(Action::SubmitBottleForm {
            form: BottleForm {
                quantity: 1,
                ..Default::default()
            },
        })
        .await;

    // Bottle attached to the existing wine; nothing new created.
    assert!(backend.wines.lock().unwrap().is_empty());
    let bottles = backend.bottles.lock().unwrap();
    assert_eq!(bottles.len(), 1);
    assert_eq!(bottles[0].wine_id, "w-9");
    drop(bottles);
    assert!(
        active_chips(&engine.transcript()).contains(&ChipAction::EnrichWine)
    );
}

#[tokio::test]
async fn entity_resolution_auto_creates_and_auto_selects() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    // Region and wine are unknown to the catalog; the producer has exactly
    // one exact match.
    backend.matches.lock().unwrap().insert(
        "producer",
        EntityMatches {
            exact: vec![EntityCandidate {
                id: "p-1".into(),
                name: "Opus One".into(),
                detail: None,
            }],
            similar: vec![],
        },
    );
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    tap(&engine, ChipAction::ConfirmResult).await;
    tap(&engine, ChipAction::AddToCellar).await;

    // No user input needed: straight to the bottle form.
    assert_eq!(
        engine.phase(),
        Phase::AddingWine(Some(AddWineSubPhase::BottleDetails))
    );

    engine
        .dispatch(Action::SubmitBottleForm {
            form: BottleForm {
                quantity: 3,
                ..Default::default()
            },
        })
        .await;

    let wines = backend.wines.lock().unwrap();
    assert_eq!(wines.len(), 1);
    assert_eq!(
        wines[0].region,
        EntityRef::New {
            name: "Napa Valley".into()
        }
    );
    assert_eq!(wines[0].producer, EntityRef::Existing { id: "p-1".into() });
    drop(wines);

    let bottles = backend.bottles.lock().unwrap();
    assert_eq!(bottles[0].wine_id, "wine-1");
    assert_eq!(bottles[0].form.quantity, 3);
}

#[tokio::test]
async fn ambiguous_entity_match_waits_for_selection() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    backend.matches.lock().unwrap().insert(
        "producer",
        EntityMatches {
            exact: vec![EntityCandidate {
                id: "p-1".into(),
                name: "Opus One".into(),
                detail: Some("Napa Valley".into()),
            }],
            similar: vec![EntityCandidate {
                id: "p-2".into(),
                name: "Opus One Winery".into(),
                detail: None,
            }],
        },
    );
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    tap(&engine, ChipAction::ConfirmResult).await;
    tap(&engine, ChipAction::AddToCellar).await;

    let chips = active_chips(&engine.transcript());
    assert!(chips.iter().any(|c| matches!(
        c,
        ChipAction::SelectCandidate { kind: EntityKind::Producer, candidate_id } if candidate_id == "p-1"
    )));
    assert!(chips.contains(&ChipAction::CreateEntity {
        kind: EntityKind::Producer
    }));

    tap(
        &engine,
        ChipAction::SelectCandidate {
            kind: EntityKind::Producer,
            candidate_id: "p-1".into(),
        },
    )
    .await;

    // Resolution continued through the remaining types to the bottle form.
    assert_eq!(
        engine.phase(),
        Phase::AddingWine(Some(AddWineSubPhase::BottleDetails))
    );
}

#[tokio::test]
async fn enrichment_streams_into_a_single_card() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let mut data = EnrichmentData::default();
    data.style = Some("Bold Bordeaux blend".into());
    data.pairings = Some("Lamb, aged cheeses".into());
    backend.queue_enrich(vec![
        EnrichEvent::TextDelta {
            field: EnrichmentField::TastingNotes,
            delta: "Dark fruit, ".into(),
        },
        EnrichEvent::TextDelta {
            field: EnrichmentField::TastingNotes,
            delta: "cedar and cocoa.".into(),
        },
        EnrichEvent::Done(EnrichOutcome {
            data,
            source: EnrichmentSource::Fresh,
            pending_confirmation: false,
            matched_to: None,
        }),
    ]);
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    tap(&engine, ChipAction::ConfirmResult).await;
    tap(&engine, ChipAction::EnrichWine).await;

    let card = engine.transcript().iter().find_map(|e| match &e.content {
        EntryContent::EnrichmentCard { data, cached } => Some((data.clone(), *cached)),
        _ => None,
    });
    let (data, cached) = card.expect("enrichment card");
    assert!(!cached);
    assert_eq!(data.style.as_deref(), Some("Bold Bordeaux blend"));
    assert_eq!(engine.phase(), Phase::Complete);
}

#[tokio::test]
async fn low_confidence_cache_hit_asks_before_showing_data() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    backend.queue_enrich(vec![EnrichEvent::Done(EnrichOutcome {
        data: EnrichmentData::default(),
        source: EnrichmentSource::Cache,
        pending_confirmation: true,
        matched_to: Some("Opus One 2019".into()),
    })]);
    let mut confirmed = EnrichmentData::default();
    confirmed.tasting_notes = Some("Blackcurrant and graphite.".into());
    backend.queue_enrich(vec![EnrichEvent::Done(EnrichOutcome {
        data: confirmed,
        source: EnrichmentSource::Cache,
        pending_confirmation: false,
        matched_to: Some("Opus One 2019".into()),
    })]);
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    tap(&engine, ChipAction::ConfirmResult).await;
    tap(&engine, ChipAction::EnrichWine).await;

    // No data shown yet, just the confirmation question.
    let transcript = engine.transcript();
    assert!(
        !transcript
            .iter()
            .any(|e| matches!(e.content, EntryContent::EnrichmentCard { .. }))
    );
    let chips = active_chips(&transcript);
    assert!(chips.contains(&ChipAction::AcceptCachedEnrichment));
    assert!(chips.contains(&ChipAction::RefreshEnrichment));

    tap(&engine, ChipAction::AcceptCachedEnrichment).await;

    let calls = backend.enrich_calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].confirm_match);
    drop(calls);
    assert!(
        engine
            .transcript()
            .iter()
            .any(|e| matches!(e.content, EntryContent::EnrichmentCard { cached: true, .. }))
    );
}

#[tokio::test]
async fn start_over_cancels_in_flight_identification() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let gate = backend.gated();
    let engine = engine(&backend);

    let in_flight = {
        let engine = engine.clone();
        tokio::spawn(async move {
            submit_text(&engine, "Opus One 2019").await;
        })
    };
    // Let the stream deliver its partial fields, then bail out mid-flight.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!engine.streaming_fields().is_empty());
    assert_eq!(engine.phase(), Phase::Identifying);

    tap(&engine, ChipAction::StartOver).await;
    gate.notify_one();
    in_flight.await.unwrap();

    // The cancelled call must be a true no-op: no card, no result, and the
    // reset state untouched.
    assert!(!has_wine_card(&engine.transcript()));
    assert!(engine.current_result().is_none());
    assert!(engine.streaming_fields().is_empty());
    assert_eq!(engine.phase(), Phase::AwaitingInput);
}

#[tokio::test]
async fn too_brief_text_asks_before_searching() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let engine = engine(&backend);

    submit_text(&engine, "ab").await;
    let chips = active_chips(&engine.transcript());
    assert!(chips.contains(&ChipAction::ConfirmNewSearch));
    assert!(chips.contains(&ChipAction::KeepCurrent));
    // Nothing dispatched yet.
    assert!(engine.current_result().is_none());

    tap(&engine, ChipAction::ConfirmNewSearch).await;
    assert!(engine.current_result().is_some());
}

#[tokio::test]
async fn retry_replays_the_last_action_without_duplicate_user_entries() {
    let backend = Arc::new(MockBackend::default());
    // First call yields nothing usable, second succeeds.
    backend.queue_identify(vec![]);
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    assert_eq!(engine.phase(), Phase::Error);

    tap(&engine, ChipAction::Retry).await;

    assert_eq!(engine.phase(), Phase::Confirming);
    // The user's text appears exactly once in the transcript.
    let user_entries = engine
        .transcript()
        .iter()
        .filter(|e| {
            matches!(&e.content, EntryContent::Text { text } if text == "Opus One 2019")
                && matches!(e.role, EntryRole::User)
        })
        .count();
    assert_eq!(user_entries, 1);
}

fn label_photo() -> ImagePayload {
    ImagePayload {
        data: "ZmFrZS1sYWJlbC1ieXRlcw==".into(),
        mime_type: "image/jpeg".into(),
    }
}

#[tokio::test]
async fn correction_after_rejection_stays_local() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    tap(&engine, ChipAction::NotCorrect).await;
    tap(
        &engine,
        ChipAction::FixField {
            field: WineField::Vintage,
        },
    )
    .await;
    // The typed value answers the correction prompt; it must not be fired
    // off as another identification pass.
    submit_text(&engine, "2016").await;

    assert_eq!(backend.escalated_calls.lock().unwrap().len(), 0);
    let (result, _) = engine.current_result().expect("corrected result");
    assert_eq!(result.vintage.as_deref(), Some("2016"));
    assert_eq!(engine.phase(), Phase::Confirming);
}

#[tokio::test]
async fn explicit_command_after_rejection_is_obeyed() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(full_identify(opus_one(), 0.92));
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;
    tap(&engine, ChipAction::NotCorrect).await;
    submit_text(&engine, "start over").await;

    assert_eq!(backend.escalated_calls.lock().unwrap().len(), 0);
    assert!(engine.current_result().is_none());
    assert_eq!(engine.phase(), Phase::AwaitingInput);
}

#[tokio::test]
async fn mid_stream_refinement_overrides_first_pass() {
    let backend = Arc::new(MockBackend::default());
    let mut refined = ParsedWine::default();
    refined.producer = Some("Ridge".into());
    refined.wine_name = Some("Monte Bello".into());
    backend.queue_identify(vec![
        IdentifyEvent::Field {
            field: WineField::Producer,
            value: "Opus One".into(),
        },
        IdentifyEvent::Tier(TierEvent::Refining),
        IdentifyEvent::Tier(TierEvent::Refined {
            parsed: refined,
            confidence: 0.9,
            improved: true,
        }),
        IdentifyEvent::Done(IdentifyOutcome {
            parsed: opus_one(),
            confidence: 0.6,
        }),
    ]);
    let engine = engine(&backend);

    submit_text(&engine, "some faded label").await;

    let (result, confidence) = engine.current_result().expect("refined result");
    assert_eq!(result.producer.as_deref(), Some("Ridge"));
    assert_eq!(confidence, Some(0.9));
    assert!(engine.streaming_fields().is_empty());
}

#[tokio::test]
async fn unimproved_refinement_keeps_first_pass() {
    let backend = Arc::new(MockBackend::default());
    let mut worse = ParsedWine::default();
    worse.producer = Some("Wrong Winery".into());
    backend.queue_identify(vec![
        IdentifyEvent::Tier(TierEvent::Refining),
        IdentifyEvent::Tier(TierEvent::Refined {
            parsed: worse,
            confidence: 0.5,
            improved: false,
        }),
        IdentifyEvent::Done(IdentifyOutcome {
            parsed: opus_one(),
            confidence: 0.8,
        }),
    ]);
    let engine = engine(&backend);

    submit_text(&engine, "Opus One 2019").await;

    let (result, confidence) = engine.current_result().expect("first-pass result");
    assert_eq!(result.producer.as_deref(), Some("Opus One"));
    assert_eq!(confidence, Some(0.8));
}

#[tokio::test]
async fn low_confidence_image_result_is_auto_verified() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(vec![IdentifyEvent::Done(IdentifyOutcome {
        parsed: opus_one(),
        confidence: 0.4,
    })]);
    let engine = engine(&backend);

    engine
        .dispatch(Action::SubmitImage {
            image: label_photo(),
            note: None,
        })
        .await;

    assert_eq!(*backend.verify_calls.lock().unwrap(), 1);
    let (_, confidence) = engine.current_result().expect("verified result");
    assert_eq!(confidence, Some(0.9));
    // Still image-sourced and non-escalated, so the chip stays available.
    assert!(active_chips(&engine.transcript()).contains(&ChipAction::Verify));
}

#[tokio::test]
async fn failed_verification_falls_back_to_unverified_result() {
    let backend = Arc::new(MockBackend::default());
    backend.queue_identify(vec![IdentifyEvent::Done(IdentifyOutcome {
        parsed: opus_one(),
        confidence: 0.4,
    })]);
    *backend.verify_fails.lock().unwrap() = true;
    let engine = engine(&backend);

    engine
        .dispatch(Action::SubmitImage {
            image: label_photo(),
            note: None,
        })
        .await;

    // Silent fallback: the original result is presented, no error surfaces,
    // and manual verification is still offered.
    assert_eq!(*backend.verify_calls.lock().unwrap(), 1);
    let (result, confidence) = engine.current_result().expect("unverified result");
    assert_eq!(result.producer.as_deref(), Some("Opus One"));
    assert_eq!(confidence, Some(0.4));
    assert!(
        !engine
            .transcript()
            .iter()
            .any(|e| matches!(e.content, EntryContent::Error { .. }))
    );
    assert!(active_chips(&engine.transcript()).contains(&ChipAction::Verify));
    assert_eq!(engine.phase(), Phase::Confirming);
}
