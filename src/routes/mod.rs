//! API routes

use std::convert::Infallible;

use async_stream::stream;
use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audio::{AudioBlob, AudioError, LEVEL_BARS};
use crate::conversation::Message;
use crate::core::ChatError;
use crate::db::{DbError, ResultSet};
use crate::graphs::{render_dashboard, Chart, GraphError};
use crate::providers::ProviderError;
use crate::session::{SessionError, SessionView};
use crate::state::StoreSnapshot;
use crate::AppState;

/// Inline error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::ChatDisabled => StatusCode::FORBIDDEN,
            SessionError::EmptyInput => StatusCode::BAD_REQUEST,
            SessionError::Chat(ChatError::Provider(_)) | SessionError::Transcription(_) => {
                StatusCode::BAD_GATEWAY
            }
            SessionError::Chat(_) => StatusCode::BAD_REQUEST,
            SessionError::Audio(AudioError::Empty) => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::Audio(_) | SessionError::Conversation(_) => StatusCode::CONFLICT,
        };
        Self::new(status, err.to_string())
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        SessionError::from(err).into()
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, err.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(e) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            DbError::Io(e) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct LevelsRequest {
    pub bins: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct LevelsResponse {
    pub levels: [f32; LEVEL_BARS],
}

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub recorded_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: Vec<ResultSet>,
    pub data_version: u64,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub charts: Vec<Chart>,
    pub data_version: u64,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub chat_enabled: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.config.chat_model.clone(),
    })
}

/// Stream one assistant turn for a conversation held by the client
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if !state.store.is_chat_enabled() {
        return Err(SessionError::ChatDisabled.into());
    }

    let mut frames = state.engine.reply(&request.messages)?;
    let store = state.store.clone();
    let body = stream! {
        while let Some(frame) = frames.next().await {
            yield Ok::<_, Infallible>(frame);
        }
        store.increment_data_version();
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        [("x-vercel-ai-data-stream", "v1")],
        Body::from_stream(body),
    )
        .into_response())
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    let session = state.sessions.create().await;
    (StatusCode::CREATED, Json(session.view()))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<SessionView> {
    let session = state.sessions.get(id).await?;
    Ok(Json(session.view()))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sessions.close(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendRequest>,
) -> ApiResult<SessionView> {
    let session = state.sessions.get(id).await?;
    session
        .send(&state.engine, &state.store, &request.content)
        .await?;
    Ok(Json(session.view()))
}

async fn start_audio(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<SessionView> {
    let session = state.sessions.get(id).await?;
    session.start_audio()?;
    Ok(Json(session.view()))
}

async fn push_audio_chunk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    chunk: Bytes,
) -> ApiResult<ChunkResponse> {
    let session = state.sessions.get(id).await?;
    let recorded_bytes = session.push_chunk(&chunk)?;
    Ok(Json(ChunkResponse { recorded_bytes }))
}

async fn record_levels(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<LevelsRequest>,
) -> ApiResult<LevelsResponse> {
    let session = state.sessions.get(id).await?;
    let levels = session.record_levels(&request.bins)?;
    Ok(Json(LevelsResponse { levels }))
}

async fn stop_audio(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<TranscriptionResponse> {
    let session = state.sessions.get(id).await?;
    let text = session.stop_audio(state.transcriber.as_ref()).await?;
    Ok(Json(TranscriptionResponse { text }))
}

/// Transcribe an uploaded recording (multipart field `file`)
async fn transcribe(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<TranscriptionResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let mut blob = AudioBlob::webm(Vec::new());
        if let Some(name) = field.file_name() {
            blob.file_name = name.to_string();
        }
        if let Some(mime) = field.content_type() {
            blob.mime_type = mime.to_string();
        }
        blob.bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
            .to_vec();

        if blob.bytes.is_empty() {
            return Err(SessionError::from(AudioError::Empty).into());
        }

        let text = state.transcriber.transcribe(&blob).await.map_err(|e| {
            tracing::error!("Error transcribing audio: {}", e);
            ApiError::from(e)
        })?;
        return Ok(Json(TranscriptionResponse { text }));
    }

    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        "Missing multipart field 'file'",
    ))
}

/// SQL console
async fn run_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<QueryResponse> {
    let results = state.db.execute(&request.query).await.map_err(|e| {
        tracing::error!("Error executing query: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(QueryResponse {
        results,
        data_version: state.store.increment_data_version(),
    }))
}

async fn dashboard(State(state): State<AppState>) -> ApiResult<DashboardResponse> {
    let charts = render_dashboard(&state.db).await.map_err(|e| {
        tracing::error!("Error loading graphs: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(DashboardResponse {
        charts,
        data_version: state.store.data_version(),
    }))
}

async fn app_state(State(state): State<AppState>) -> Json<StoreSnapshot> {
    Json(state.store.snapshot())
}

async fn toggle_chat(State(state): State<AppState>) -> Json<ToggleResponse> {
    Json(ToggleResponse {
        chat_enabled: state.store.toggle_chat_enabled(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:id", get(get_session).delete(close_session))
        .route("/v1/sessions/:id/messages", post(send_message))
        .route("/v1/sessions/:id/audio/start", post(start_audio))
        .route("/v1/sessions/:id/audio/chunk", post(push_audio_chunk))
        .route("/v1/sessions/:id/audio/levels", post(record_levels))
        .route("/v1/sessions/:id/audio/stop", post(stop_audio))
        .route("/v1/transcribe", post(transcribe))
        .route("/v1/query", post(run_query))
        .route("/v1/graphs", get(dashboard))
        .route("/v1/state", get(app_state))
        .route("/v1/state/chat", post(toggle_chat))
}
