//! HTTP API handlers for the gateway.
//!
//! # Endpoints
//!
//! - `POST /analyze` - multipart image analysis (bearer token required)
//! - `POST /analyze-base64` - JSON/base64 image analysis (bearer token required)
//! - `GET /health` - inference service liveness
//! - `GET /models` - inference service model list, passed through
//!
//! The two analysis routes are also served under `/api/FacialAnalysis`.
//!
//! # Privacy Note
//!
//! Handlers never log image content, base64 payloads or bearer tokens.
//! Only the caller's subject id, the selected model and the outcome are
//! recorded.

use std::any::Any;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, instrument};

use crate::auth::{CallerContext, Credential, JwtValidator};
use crate::clients::{HistoryClient, InferenceClient, http_client};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{self, UploadedFile};
use crate::model::{AnalysisResponse, Base64AnalysisBody};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub jwt: JwtValidator,
    pub inference: InferenceClient,
    /// `None` when no history service is configured.
    pub history: Option<HistoryClient>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = http_client(config.upstream_timeout)?;

        let inference = InferenceClient::new(
            client.clone(),
            &config.inference_url,
            config.inference_api_key.clone(),
        );
        let history = config
            .history_url
            .as_deref()
            .map(|url| HistoryClient::new(client, url, config.history_route));

        Ok(Self {
            jwt: JwtValidator::new(&config.jwt),
            inference,
            history,
            config: Arc::new(config),
        })
    }
}

/// Build the full router with its middleware stack.
pub fn router(state: AppState) -> Router {
    let expose = state.config.environment.exposes_details();
    let body_limit = state.config.max_upload_bytes;

    let analysis = Router::new()
        .route("/analyze", post(analyze_upload))
        .route("/analyze-base64", post(analyze_base64));

    Router::new()
        .merge(analysis.clone())
        .nest("/api/FacialAnalysis", analysis)
        .route("/health", get(health_check))
        .route("/models", get(list_models))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CookieManagerLayer::new())
        .layer(CatchPanicLayer::custom(
            move |panic: Box<dyn Any + Send + 'static>| panic_response(panic, expose),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>, expose: bool) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()));
    error!(panic = ?detail, "Handler panicked");

    GatewayError::Internal {
        message: "Internal server error".to_string(),
        trace: detail.filter(|_| expose),
    }
    .into_response()
}

/// POST /analyze - Analyze an uploaded image.
///
/// # Request
///
/// `multipart/form-data` with:
///
/// - `file` (required): the image bytes
/// - `model` (optional): defaults to the configured model (`Facenet`)
/// - `detector` (optional): defaults to the configured detector (`opencv`)
///
/// # Response
///
/// ```json
/// {
///     "sucesso": true,
///     "userId": "12",
///     "userRole": "Caregiver",
///     "emocao": "happy",
///     "emocoes": {"happy": 72.5, "neutral": 17.5, "sad": 10.0},
///     "idade": 31.0,
///     "genero": "Woman",
///     "modelo_usado": "Facenet",
///     "detector_usado": "opencv",
///     "mensagem_sugerida": "...",
///     "salvo_no_historico": true
/// }
/// ```
#[instrument(skip_all)]
pub async fn analyze_upload(
    State(state): State<AppState>,
    credential: Credential,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResponse>, GatewayError> {
    let mut multipart = multipart.map_err(|e| GatewayError::validation(e.body_text()))?;

    let mut file = None;
    let mut model = None;
    let mut detector = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(malformed_multipart)?;
                file = Some(UploadedFile {
                    bytes: bytes.to_vec(),
                    filename,
                    content_type,
                });
            }
            Some("model") => model = Some(field.text().await.map_err(malformed_multipart)?),
            Some("detector") => detector = Some(field.text().await.map_err(malformed_multipart)?),
            // Callers also send `actions`; the gateway always requests its own set.
            _ => {}
        }
    }

    let request = gateway::upload_request(file, model, detector, &state.config)?;
    let caller = CallerContext::from_credential(credential)?;

    gateway::analyze(&state, &caller, request).await.map(Json)
}

fn malformed_multipart(e: MultipartError) -> GatewayError {
    GatewayError::validation(format!("Malformed multipart body: {}", e.body_text()))
}

/// POST /analyze-base64 - Analyze a base64-encoded image.
///
/// # Request Body
///
/// ```json
/// {
///     "imageBase64": "data:image/jpeg;base64,/9j/4AAQ...",
///     "model": "Facenet",
///     "detector": "opencv"
/// }
/// ```
///
/// `model` and `detector` are optional. Same response as `POST /analyze`.
#[instrument(skip_all)]
pub async fn analyze_base64(
    State(state): State<AppState>,
    credential: Credential,
    body: Result<Json<Base64AnalysisBody>, JsonRejection>,
) -> Result<Json<AnalysisResponse>, GatewayError> {
    let Json(body) = body.map_err(|e| GatewayError::validation(e.body_text()))?;

    let request = gateway::base64_request(body, &state.config)?;
    let caller = CallerContext::from_credential(credential)?;

    gateway::analyze(&state, &caller, request).await.map(Json)
}

/// GET /health - Report whether the inference service is reachable.
///
/// Returns `200` with `{"sucesso": true, "status": "healthy", "python": true}`
/// or `503` with `status` set to `degraded` or `unhealthy`.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = gateway::check_health(&state).await;
    (status, Json(body))
}

/// GET /models - Relay the inference service's model list unchanged.
pub async fn list_models(State(state): State<AppState>) -> Result<Response, GatewayError> {
    let models = gateway::list_models(&state).await?;

    let mut response = (models.status, models.body).into_response();
    if let Some(content_type) = models.content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    Ok(response)
}
