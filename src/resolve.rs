// src/resolve.rs
// Add-to-cellar flow: duplicate pre-check, then region -> producer -> wine
// entity resolution, then the bottle form and catalog submission. Resolution
// auto-selects or auto-creates wherever the answer is unambiguous and only
// stops to ask the user when candidates genuinely conflict.

use tracing::{debug, warn};

use crate::actions::{Action, Chip, ChipAction, chips};
use crate::backend::{
    CatalogBackend, ClarifyRequest, DuplicateQuery, EntityKind, EntityMatches, EntityQuery,
    EntityRef, NewBottlePayload, NewWinePayload, RecognitionBackend,
};
use crate::engine::{AddWineFlowState, Engine};
use crate::transcript::{AddWineSubPhase, EntryContent, EntryRole, Phase};
use crate::wine::{BottleForm, ParsedWine};

const RESOLUTION_ORDER: [EntityKind; 3] =
    [EntityKind::Region, EntityKind::Producer, EntityKind::Wine];

fn next_unresolved(flow: &AddWineFlowState) -> Option<EntityKind> {
    RESOLUTION_ORDER
        .into_iter()
        .find(|kind| flow.selected.get(*kind).is_none() && flow.created.get(*kind).is_none())
}

/// The text to search the catalog with for one entity type.
fn search_term(wine: &ParsedWine, kind: EntityKind) -> String {
    match kind {
        EntityKind::Region => wine
            .region
            .clone()
            .or_else(|| wine.country.clone())
            .unwrap_or_default(),
        EntityKind::Producer => wine.producer.clone().unwrap_or_default(),
        EntityKind::Wine => wine.wine_name.clone().unwrap_or_default(),
    }
}

fn placeholder_name(kind: EntityKind) -> String {
    match kind {
        EntityKind::Region => "Unknown region".into(),
        EntityKind::Producer => "Unknown producer".into(),
        EntityKind::Wine => "Unnamed wine".into(),
    }
}

impl<R, C> Engine<R, C>
where
    R: RecognitionBackend + 'static,
    C: CatalogBackend + 'static,
{
    /// Entry point for "add to cellar": set up flow state, run the duplicate
    /// pre-check, then hand off to entity resolution.
    pub(crate) async fn start_add_flow(&self) {
        let wine = {
            let mut state = self.lock_state();
            let Some(result) = state.result.clone() else {
                state
                    .log
                    .push_agent_text("Identify a wine first, then I can add it to your cellar.");
                self.touch(&state);
                return;
            };
            state.log.disable_chips();
            state.add_flow = Some(AddWineFlowState {
                wine: result.clone(),
                ..Default::default()
            });
            state.phase = Phase::AddingWine(Some(AddWineSubPhase::Confirm));
            self.touch(&state);
            result
        };

        // Best-effort: a failed pre-check degrades to proceeding as new.
        let query = DuplicateQuery {
            kind: EntityKind::Wine,
            name: wine
                .wine_name
                .clone()
                .or_else(|| wine.producer.clone())
                .unwrap_or_default(),
            producer_name: wine.producer.clone(),
            year: wine.vintage.clone(),
            region_id: None,
        };
        match self.catalog.check_duplicate(query).await {
            Ok(report) => {
                let existing = report
                    .existing_wine_id
                    .filter(|_| report.existing_bottles >= 1);
                if let Some(wine_id) = existing {
                    let count = report.existing_bottles;
                    let mut state = self.lock_state();
                    if let Some(flow) = state.add_flow.as_mut() {
                        flow.existing_wine_id = Some(wine_id);
                        flow.existing_bottles = count;
                    }
                    let noun = if count == 1 { "bottle" } else { "bottles" };
                    state.log.push_agent_text(format!(
                        "You already have {count} {noun} of this wine in your cellar. \
                         Add another bottle to it, or create a separate entry?"
                    ));
                    state.log.push_chips(chips([
                        ChipAction::AddBottleToExisting,
                        ChipAction::CreateNewWineAnyway,
                    ]));
                    self.touch(&state);
                    return;
                }
            }
            Err(err) => warn!("duplicate pre-check failed, proceeding as new: {err}"),
        }

        self.begin_entity_resolution().await;
    }

    /// Walk the region -> producer -> wine chain, stopping whenever user
    /// disambiguation is required.
    pub(crate) async fn begin_entity_resolution(&self) {
        {
            let mut state = self.lock_state();
            state.log.disable_chips();
            if state.add_flow.is_none() {
                let wine = state.result.clone().unwrap_or_default();
                state.add_flow = Some(AddWineFlowState {
                    wine,
                    ..Default::default()
                });
            }
            state.phase = Phase::AddingWine(Some(AddWineSubPhase::EntityMatching));
            self.touch(&state);
        }
        self.resolve_next().await;
    }

    async fn resolve_next(&self) {
        loop {
            let pending = {
                let state = self.lock_state();
                let Some(flow) = state.add_flow.as_ref() else {
                    return;
                };
                next_unresolved(flow)
            };
            let Some(kind) = pending else { break };
            if !self.resolve_kind(kind).await {
                // Waiting on the user, or the flow was torn down mid-search.
                return;
            }
        }
        self.present_bottle_form();
    }

    /// Resolve one entity type. Returns true when resolution continued
    /// automatically, false when it stopped to ask the user.
    async fn resolve_kind(&self, kind: EntityKind) -> bool {
        let (term, region_id) = {
            let mut state = self.lock_state();
            let Some(flow) = state.add_flow.as_mut() else {
                return false;
            };
            let term = search_term(&flow.wine, kind);
            flow.terms.set(kind, term.clone());
            let region_id = flow
                .selected
                .get(EntityKind::Region)
                .map(|c| c.id.clone())
                .filter(|_| kind == EntityKind::Producer);
            (term, region_id)
        };

        if term.trim().is_empty() {
            return self.auto_create(kind, placeholder_name(kind));
        }

        let query = EntityQuery {
            kind,
            term: term.clone(),
            region_id,
        };
        let matches = match self.catalog.search_entities(query).await {
            Ok(matches) => matches,
            Err(err) => {
                warn!(
                    "entity search failed for {}, creating new: {err}",
                    kind.as_str()
                );
                return self.auto_create(kind, term);
            }
        };

        if matches.total() == 0 {
            return self.auto_create(kind, term);
        }
        if matches.exact.len() == 1 && matches.similar.is_empty() {
            let candidate = matches.exact[0].clone();
            debug!(kind = kind.as_str(), id = %candidate.id, "auto-selected sole exact match");
            let mut state = self.lock_state();
            let Some(flow) = state.add_flow.as_mut() else {
                return false;
            };
            flow.select(kind, candidate);
            return true;
        }

        self.present_candidates(kind, matches).await;
        false
    }

    fn auto_create(&self, kind: EntityKind, name: String) -> bool {
        debug!(kind = kind.as_str(), %name, "no catalog match, creating new");
        let mut state = self.lock_state();
        let Some(flow) = state.add_flow.as_mut() else {
            return false;
        };
        flow.create(kind, name);
        true
    }

    /// Ambiguous matches: list candidates (exact first) with a best-effort
    /// clarification blurb, then wait for a selection.
    async fn present_candidates(&self, kind: EntityKind, matches: EntityMatches) {
        let identified = {
            let state = self.lock_state();
            state
                .add_flow
                .as_ref()
                .map(|f| f.wine.clone())
                .unwrap_or_default()
        };
        let options = matches.all();

        let clarification = self
            .catalog
            .clarify_match(ClarifyRequest {
                kind,
                identified,
                options: options.clone(),
            })
            .await;

        let mut state = self.lock_state();
        let Some(flow) = state.add_flow.as_mut() else {
            return;
        };
        flow.pending_kind = Some(kind);
        flow.matches.set(kind, options.clone());

        state.log.push_agent_text(format!(
            "I found existing {} entries that might match. Which one is it?",
            kind.as_str()
        ));
        match clarification {
            Ok(text) if !text.trim().is_empty() => {
                state.log.push_agent_text(text);
            }
            Ok(_) => {}
            Err(err) => debug!("clarification unavailable: {err}"),
        }

        let mut row: Vec<Chip> = options
            .iter()
            .map(|candidate| {
                let label = match &candidate.detail {
                    Some(detail) => format!("{} ({detail})", candidate.name),
                    None => candidate.name.clone(),
                };
                Chip::labelled(
                    ChipAction::SelectCandidate {
                        kind,
                        candidate_id: candidate.id.clone(),
                    },
                    label,
                )
            })
            .collect();
        row.push(Chip::new(ChipAction::CreateEntity { kind }));
        state.log.push(EntryRole::Agent, EntryContent::Chips { chips: row });
        state.phase = Phase::AddingWine(Some(AddWineSubPhase::EntityMatching));
        self.touch(&state);
    }

    pub(crate) async fn select_entity(&self, kind: EntityKind, candidate_id: String) {
        {
            let mut state = self.lock_state();
            state.log.disable_chips();
            let Some(flow) = state.add_flow.as_mut() else {
                warn!("candidate selected with no add flow; ignoring");
                return;
            };
            let candidate = flow
                .matches
                .get(kind)
                .and_then(|m| m.iter().find(|c| c.id == candidate_id).cloned());
            let Some(candidate) = candidate else {
                warn!(%candidate_id, "selected candidate no longer known; ignoring");
                return;
            };
            flow.select(kind, candidate);
            flow.pending_kind = None;
            self.touch(&state);
        }
        self.resolve_next().await;
    }

    pub(crate) async fn create_entity(&self, kind: EntityKind) {
        {
            let mut state = self.lock_state();
            state.log.disable_chips();
            let Some(flow) = state.add_flow.as_mut() else {
                warn!("create-entity with no add flow; ignoring");
                return;
            };
            let name = flow
                .terms
                .get(kind)
                .cloned()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| placeholder_name(kind));
            flow.create(kind, name);
            flow.pending_kind = None;
            self.touch(&state);
        }
        self.resolve_next().await;
    }

    /// Duplicate pre-check short-circuit: skip entity resolution entirely and
    /// go straight to bottle details for the existing wine.
    pub(crate) fn add_bottle_to_existing(&self) {
        {
            let mut state = self.lock_state();
            state.log.disable_chips();
            self.touch(&state);
        }
        self.present_bottle_form();
    }

    fn present_bottle_form(&self) {
        let mut state = self.lock_state();
        let Some(flow) = state.add_flow.as_ref() else {
            return;
        };
        let mut form = flow.form_defaults.clone();
        if form.quantity == 0 {
            form.quantity = 1;
        }
        state
            .log
            .push_agent_text("Almost there. A few details about the bottle:");
        state.log.push(EntryRole::Agent, EntryContent::Form { form });
        state.phase = Phase::AddingWine(Some(AddWineSubPhase::BottleDetails));
        self.touch(&state);
    }

    /// Final submission: create the wine when needed (with entity refs for
    /// region and producer), then attach the bottle.
    pub(crate) async fn submit_bottle_form(&self, form: BottleForm) {
        let flow = {
            let mut state = self.lock_state();
            state
                .retry
                .record(&Action::SubmitBottleForm { form: form.clone() });
            let Some(flow) = state.add_flow.clone() else {
                state
                    .log
                    .push_agent_text("There's no add-to-cellar in progress right now.");
                self.touch(&state);
                return;
            };
            state.log.disable_chips();
            self.touch(&state);
            flow
        };

        let existing_only =
            flow.selected.wine.is_none() && flow.created.wine.is_none();
        let wine_id = if let Some(id) = flow.existing_wine_id.clone().filter(|_| existing_only) {
            id
        } else if let Some(candidate) = flow.selected.wine.clone() {
            candidate.id
        } else {
            let wine_name = flow
                .created
                .wine
                .clone()
                .or_else(|| flow.wine.wine_name.clone())
                .unwrap_or_else(|| flow.wine.display_name());
            let payload = NewWinePayload {
                wine_name,
                vintage: flow.wine.vintage.clone(),
                wine_type: flow.wine.wine_type.clone(),
                region: entity_ref(&flow, EntityKind::Region),
                producer: entity_ref(&flow, EntityKind::Producer),
            };
            match self.catalog.submit_wine(payload).await {
                Ok(id) => id,
                Err(err) => {
                    self.fail_with(err);
                    return;
                }
            }
        };

        if let Err(err) = self
            .catalog
            .submit_bottle(NewBottlePayload { wine_id, form })
            .await
        {
            self.fail_with(err);
            return;
        }

        let mut state = self.lock_state();
        state
            .log
            .push_agent_text("Added to your cellar! Want tasting notes and pairings for it?");
        state
            .log
            .push_chips(chips([ChipAction::EnrichWine, ChipAction::FinishFlow]));
        state.phase = Phase::AddingWine(Some(AddWineSubPhase::Enrichment));
        self.touch(&state);
    }
}

fn entity_ref(flow: &AddWineFlowState, kind: EntityKind) -> EntityRef {
    if let Some(candidate) = flow.selected.get(kind) {
        return EntityRef::Existing {
            id: candidate.id.clone(),
        };
    }
    if let Some(name) = flow.created.get(kind) {
        return EntityRef::New { name: name.clone() };
    }
    EntityRef::New {
        name: placeholder_name(kind),
    }
}
