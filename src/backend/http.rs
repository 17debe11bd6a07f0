// src/backend/http.rs
// HTTP implementation of the backend traits. Streaming endpoints speak SSE
// with named events (field / tier / done); the rest is plain JSON.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::wine::{EnrichmentField, ParsedWine, WineField};

use super::{
    CatalogBackend, ClarifyRequest, DuplicateQuery, DuplicateReport, EnrichEvent, EnrichOutcome,
    EnrichRequest, EnrichStream, EntityMatches, EntityQuery, EscalatedIdentifyRequest,
    IdentifyEvent, IdentifyOutcome, IdentifyStream, ImageIdentifyRequest, NewBottlePayload,
    NewWinePayload, RecognitionBackend, TextIdentifyRequest, TierEvent, VerifyRequest,
};

/// Production backend client over HTTP + SSE.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, path: &str, body: &impl serde::Serialize) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<T, EngineError> {
        let response = self.request(path, body).send().await.map_err(net_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_err(status));
        }
        response.json::<T>().await.map_err(net_err)
    }

    fn open_sse(&self, path: &str, body: &impl serde::Serialize) -> Result<EventSource, EngineError> {
        EventSource::new(self.request(path, body)).map_err(|e| {
            warn!("failed to open SSE stream on {path}: {e}");
            EngineError::server("Could not reach the recognition service.")
        })
    }
}

/// Map a transport error into the engine taxonomy.
fn net_err(e: reqwest::Error) -> EngineError {
    let retryable = e.is_timeout() || e.is_connect() || e.is_request();
    EngineError::Server {
        user_message: "The wine service is unreachable right now.".into(),
        retryable,
        support_ref: None,
    }
}

fn status_err(status: reqwest::StatusCode) -> EngineError {
    EngineError::Server {
        user_message: "The wine service had a problem with that request.".into(),
        retryable: status.is_server_error(),
        support_ref: Some(format!("http-{}", status.as_u16())),
    }
}

#[derive(Debug, Deserialize)]
struct FieldFrame {
    field: WineField,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum TierFrame {
    Refining,
    Refined {
        parsed: ParsedWine,
        confidence: f32,
        #[serde(default)]
        improved: bool,
    },
}

#[derive(Debug, Deserialize)]
struct EnrichFieldFrame {
    field: EnrichmentField,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    delta: Option<String>,
}

/// Adapt an identification SSE connection into an `IdentifyStream`.
fn identify_stream(mut es: EventSource) -> IdentifyStream {
    let stream = async_stream::stream! {
        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("identification SSE opened");
                }
                Ok(Event::Message(msg)) => match msg.event.as_str() {
                    "field" => match serde_json::from_str::<FieldFrame>(&msg.data) {
                        Ok(frame) => {
                            yield Ok(IdentifyEvent::Field {
                                field: frame.field,
                                value: frame.value,
                            });
                        }
                        Err(e) => warn!("unparseable field frame: {e}"),
                    },
                    "tier" => match serde_json::from_str::<TierFrame>(&msg.data) {
                        Ok(TierFrame::Refining) => yield Ok(IdentifyEvent::Tier(TierEvent::Refining)),
                        Ok(TierFrame::Refined { parsed, confidence, improved }) => {
                            yield Ok(IdentifyEvent::Tier(TierEvent::Refined {
                                parsed,
                                confidence,
                                improved,
                            }));
                        }
                        Err(e) => warn!("unparseable tier frame: {e}"),
                    },
                    "done" => {
                        match serde_json::from_str::<IdentifyOutcome>(&msg.data) {
                            Ok(outcome) => yield Ok(IdentifyEvent::Done(outcome)),
                            Err(e) => {
                                yield Err(EngineError::server(format!(
                                    "The recognition service sent a malformed result: {e}"
                                )));
                            }
                        }
                        es.close();
                        break;
                    }
                    other => debug!("ignoring unknown SSE event {other}"),
                },
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    es.close();
                    yield Err(EngineError::server(format!(
                        "Lost connection to the recognition service: {e}"
                    )));
                    break;
                }
            }
        }
    };
    Box::pin(stream)
}

fn enrich_stream(mut es: EventSource) -> EnrichStream {
    let stream = async_stream::stream! {
        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("enrichment SSE opened");
                }
                Ok(Event::Message(msg)) => match msg.event.as_str() {
                    "field" => match serde_json::from_str::<EnrichFieldFrame>(&msg.data) {
                        Ok(frame) => {
                            if let Some(delta) = frame.delta {
                                yield Ok(EnrichEvent::TextDelta { field: frame.field, delta });
                            } else if let Some(value) = frame.value {
                                yield Ok(EnrichEvent::Field { field: frame.field, value });
                            }
                        }
                        Err(e) => warn!("unparseable enrichment frame: {e}"),
                    },
                    "done" => {
                        match serde_json::from_str::<EnrichOutcome>(&msg.data) {
                            Ok(outcome) => yield Ok(EnrichEvent::Done(outcome)),
                            Err(e) => {
                                yield Err(EngineError::enrichment(format!(
                                    "Malformed enrichment result: {e}"
                                )));
                            }
                        }
                        es.close();
                        break;
                    }
                    other => debug!("ignoring unknown SSE event {other}"),
                },
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    es.close();
                    yield Err(EngineError::enrichment(format!(
                        "Lost connection while fetching wine details: {e}"
                    )));
                    break;
                }
            }
        }
    };
    Box::pin(stream)
}

#[async_trait]
impl RecognitionBackend for HttpBackend {
    async fn identify_text(
        &self,
        req: TextIdentifyRequest,
    ) -> Result<IdentifyStream, EngineError> {
        let es = self.open_sse("/v1/identify/text", &req)?;
        Ok(identify_stream(es))
    }

    async fn identify_image(
        &self,
        req: ImageIdentifyRequest,
    ) -> Result<IdentifyStream, EngineError> {
        let es = self.open_sse("/v1/identify/image", &req)?;
        Ok(identify_stream(es))
    }

    async fn identify_escalated(
        &self,
        req: EscalatedIdentifyRequest,
    ) -> Result<IdentifyOutcome, EngineError> {
        self.post_json("/v1/identify/escalated", &req).await
    }

    async fn verify_image(&self, req: VerifyRequest) -> Result<IdentifyOutcome, EngineError> {
        self.post_json("/v1/identify/verify", &req).await
    }

    async fn enrich(&self, req: EnrichRequest) -> Result<EnrichStream, EngineError> {
        let es = self.open_sse("/v1/enrich", &req)?;
        Ok(enrich_stream(es))
    }
}

#[derive(Debug, Deserialize)]
struct SubmitWineResponse {
    #[serde(rename = "wineID")]
    wine_id: String,
}

#[async_trait]
impl CatalogBackend for HttpBackend {
    async fn check_duplicate(&self, q: DuplicateQuery) -> Result<DuplicateReport, EngineError> {
        self.post_json("/v1/catalog/check-duplicate", &q).await
    }

    async fn search_entities(&self, q: EntityQuery) -> Result<EntityMatches, EngineError> {
        self.post_json("/v1/catalog/search", &q).await
    }

    async fn clarify_match(&self, q: ClarifyRequest) -> Result<String, EngineError> {
        #[derive(Deserialize)]
        struct Explanation {
            explanation: String,
        }
        let out: Explanation = self.post_json("/v1/catalog/clarify", &q).await?;
        Ok(out.explanation)
    }

    async fn submit_wine(&self, payload: NewWinePayload) -> Result<String, EngineError> {
        let out: SubmitWineResponse = self.post_json("/v1/catalog/wines", &payload).await?;
        Ok(out.wine_id)
    }

    async fn submit_bottle(&self, payload: NewBottlePayload) -> Result<(), EngineError> {
        let response = self
            .request("/v1/catalog/bottles", &payload)
            .send()
            .await
            .map_err(net_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_err(status));
        }
        Ok(())
    }
}
