//! Route handlers.
//!
//! Thin adapters from JSON/multipart requests to pipeline calls. Malformed
//! client input maps to 400; model failures the pipeline cannot degrade
//! map to 502.

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use snapfix_core::conversation::Turn;
use snapfix_core::error::{ActError, GatewayError, IdentifyError, MediaError};
use snapfix_core::media::{self, NormalizedAudio};
use snapfix_core::pipeline::{ActOutcome, PendingIdentification, SearchIntent};

use crate::AppState;

type ApiError = (StatusCode, String);

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/identify", post(identify))
        .route("/v1/confirm", post(confirm))
        .route("/v1/chat", post(chat))
        .route("/v1/transcribe", post(transcribe))
        .route("/v1/reset", post(reset))
        .route("/v1/history", get(history))
}

#[derive(Debug, Deserialize)]
struct IdentifyRequest {
    /// Data-URL or bare base64 image.
    image: String,
    note: Option<String>,
    previous_context_limit: Option<usize>,
}

async fn identify(
    State(state): State<AppState>,
    Json(request): Json<IdentifyRequest>,
) -> Result<Json<PendingIdentification>, ApiError> {
    state
        .pipeline
        .identify(
            &request.image,
            request.note.as_deref(),
            request.previous_context_limit,
        )
        .await
        .map(Json)
        .map_err(identify_error)
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    /// Echoed back from the identify response.
    candidate_queries: Vec<String>,
    query_index: i64,
    intent: SearchIntent,
    /// Original image, re-sent for reverse-image search on buy/info.
    image: Option<String>,
}

async fn confirm(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ActOutcome>, ApiError> {
    state
        .pipeline
        .confirm_and_act(
            &request.candidate_queries,
            request.query_index,
            request.intent,
            request.image.as_deref(),
        )
        .await
        .map(Json)
        .map_err(act_error)
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    via_voice: bool,
    image: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response_text: String,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let response_text = state
        .pipeline
        .follow_up(message, request.via_voice, request.image.as_deref())
        .await
        .map_err(media_error)?;
    Ok(Json(ChatResponse { response_text }))
}

#[derive(Debug, Deserialize)]
struct TranscribeJsonRequest {
    /// Data-URL or bare base64 audio.
    audio: String,
}

#[derive(Debug, Serialize)]
struct TranscribeResponse {
    transcript: String,
}

/// Accepts either a multipart upload with a `file` field or a JSON body
/// with a base64 `audio` payload.
async fn transcribe(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    let audio = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| bad_request(format!("Invalid multipart body: {e}")))?;
        audio_from_multipart(multipart).await?
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), crate::MAX_BODY_BYTES)
            .await
            .map_err(|e| bad_request(format!("Could not read request body: {e}")))?;
        let body: TranscribeJsonRequest = serde_json::from_slice(&bytes)
            .map_err(|e| bad_request(format!("Invalid JSON body: {e}")))?;
        media::normalize_audio_payload(&body.audio).map_err(media_error)?
    };

    let transcript = state
        .pipeline
        .transcribe(&audio)
        .await
        .map_err(gateway_error)?;
    Ok(Json(TranscribeResponse { transcript }))
}

async fn audio_from_multipart(mut multipart: Multipart) -> Result<NormalizedAudio, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Invalid multipart field: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("audio").to_string();
        let declared_mime = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("Could not read upload: {e}")))?;
        return media::normalize_audio_upload(bytes.to_vec(), &filename, declared_mime.as_deref())
            .map_err(media_error);
    }
    Err(bad_request("Missing `file` field in multipart body"))
}

async fn reset(State(state): State<AppState>) -> Json<Turn> {
    tracing::info!("conversation reset");
    Json(state.pipeline.log().reset())
}

async fn history(State(state): State<AppState>) -> Json<Vec<Turn>> {
    Json(state.pipeline.log().all())
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}

fn media_error(e: MediaError) -> ApiError {
    bad_request(e.to_string())
}

fn gateway_error(e: GatewayError) -> ApiError {
    tracing::error!(kind = %e.kind, error = %e, "model call failed");
    (StatusCode::BAD_GATEWAY, e.to_string())
}

fn identify_error(e: IdentifyError) -> ApiError {
    match e {
        IdentifyError::Media(e) => media_error(e),
        IdentifyError::Model(e) => gateway_error(e),
    }
}

fn act_error(e: ActError) -> ApiError {
    match e {
        ActError::Media(inner) => media_error(inner),
        ActError::RepairPlanUnavailable(inner) => gateway_error(inner),
    }
}
