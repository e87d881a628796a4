use std::{io::Cursor, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use hue_core::{
    ControlError, ControlSpec, ControlValues, GenerationError, Generator, Loader, Outcome,
    Session, SessionStatus, Style, SAMPLE_PROMPTS,
};
use image::DynamicImage;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::sessions::SessionRegistry;

pub const DOWNLOAD_FILENAME: &str = "generated_image.png";
pub const DESCRIPTION_PLACEHOLDER: &str = "Generate an image to see its description.";

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Application state shared by every request.
pub struct AppState<L: Loader> {
    pub generator: Generator<L>,
    pub sessions: SessionRegistry,
}

impl<L: Loader> AppState<L> {
    pub fn new(generator: Generator<L>, max_sessions: usize) -> Self {
        Self {
            generator,
            sessions: SessionRegistry::new(max_sessions),
        }
    }
}

pub fn router<L: Loader + 'static>(state: Arc<AppState<L>>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health::<L>))
        .route("/api/controls", get(controls::<L>))
        .route("/api/sessions", post(create_session::<L>))
        .route("/api/sessions/{id}", get(session_view::<L>))
        .route("/api/sessions/{id}/generate", post(generate::<L>))
        .route("/api/sessions/{id}/image.png", get(download::<L>))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Control(ControlError),
    Generation(GenerationError),
    SessionNotFound(Uuid),
    NoImage,
    Internal(anyhow::Error),
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError::Control(err)
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        ApiError::Generation(err)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Control(_) => (StatusCode::BAD_REQUEST, "invalid_control"),
            ApiError::Generation(err) => {
                let status = match err {
                    GenerationError::PipelineConstruction { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    GenerationError::ResourceExhausted(_) => StatusCode::INSUFFICIENT_STORAGE,
                    GenerationError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    GenerationError::Busy => StatusCode::CONFLICT,
                };
                (status, err.kind())
            }
            ApiError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            ApiError::NoImage => (StatusCode::NOT_FOUND, "no_image"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Control(err) => err.to_string(),
            ApiError::Generation(err) => err.to_string(),
            ApiError::SessionNotFound(id) => format!("session {id} does not exist"),
            ApiError::NoImage => "no image has been generated yet".to_string(),
            ApiError::Internal(err) => format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(kind, "request failed: {}", self.message());
        }
        let body = json!({ "error": { "kind": kind, "message": self.message() } });
        (status, Json(body)).into_response()
    }
}

/// Encodes an image as a base64 PNG, converting it to RGB first.
fn image_to_base64_png(img: &DynamicImage) -> Result<String> {
    Ok(BASE64_STANDARD.encode(image_to_png(img)?))
}

fn image_to_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut bytes = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

/// What the page needs to draw a session.
#[derive(Serialize, Debug)]
pub struct SessionView {
    pub id: Uuid,
    pub status: SessionStatus,
    pub last_outcome: Option<Outcome>,
    pub caption: Option<String>,
    /// Base64 PNG of the current image.
    pub image: Option<String>,
    pub placeholder: Option<&'static str>,
}

impl SessionView {
    fn render(id: Uuid, session: &Session) -> Result<Self> {
        let (caption, image) = match session.result() {
            Some(result) => (
                Some(result.caption.clone()),
                Some(image_to_base64_png(&result.image)?),
            ),
            None => (None, None),
        };
        Ok(Self {
            id,
            status: session.status(),
            last_outcome: session.last_outcome().cloned(),
            placeholder: caption.is_none().then_some(DESCRIPTION_PLACEHOLDER),
            caption,
            image,
        })
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health<L: Loader + 'static>(State(state): State<Arc<AppState<L>>>) -> Json<Value> {
    let pipeline = state.generator.pipeline();
    Json(json!({
        "status": "ok",
        "model": pipeline.loader().model_id(),
        "pipeline_loaded": pipeline.is_loaded(),
    }))
}

#[derive(Serialize)]
struct ControlsResponse<'a> {
    spec: &'a ControlSpec,
    styles: Vec<String>,
    samples: &'a [&'a str],
    defaults: ControlValues,
}

async fn controls<L: Loader + 'static>(State(state): State<Arc<AppState<L>>>) -> Response {
    let spec = state.generator.spec();
    Json(ControlsResponse {
        spec,
        styles: Style::ALL.iter().map(Style::to_string).collect(),
        samples: &SAMPLE_PROMPTS,
        defaults: ControlValues::defaults(spec),
    })
    .into_response()
}

async fn create_session<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
) -> (StatusCode, Json<Value>) {
    let id = state.sessions.create().await;
    tracing::info!(session = %id, "session created");
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

async fn session_view<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let slot = state.sessions.get(id).await.ok_or(ApiError::SessionNotFound(id))?;
    let session = slot.lock().await;
    Ok(Json(SessionView::render(id, &session).map_err(ApiError::Internal)?))
}

async fn generate<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<Uuid>,
    Json(values): Json<ControlValues>,
) -> Result<Json<SessionView>, ApiError> {
    let request = values.resolve(state.generator.spec())?;
    let slot = state.sessions.get(id).await.ok_or(ApiError::SessionNotFound(id))?;
    let permit = slot.lock().await.begin()?;
    tracing::info!(session = %id, style = %request.style, steps = request.steps, "generation triggered");

    // Detached so that a client hanging up does not leave the session generating forever. The
    // session is only locked to commit, so views and downloads keep serving the previous result.
    let task = tokio::spawn(async move {
        let outcome = state.generator.run(request, permit).await;
        let mut session = slot.lock().await;
        let outcome = session.finish(outcome);
        (outcome, SessionView::render(id, &session))
    });
    let (outcome, view) = task
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("generation task failed: {e}")))?;
    outcome?;
    Ok(Json(view.map_err(ApiError::Internal)?))
}

async fn download<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let slot = state.sessions.get(id).await.ok_or(ApiError::SessionNotFound(id))?;
    let session = slot.lock().await;
    let result = session.result().ok_or(ApiError::NoImage)?;
    let bytes = image_to_png(&result.image).map_err(ApiError::Internal)?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{DOWNLOAD_FILENAME}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
