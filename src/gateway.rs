//! The analysis relay.
//!
//! One analysis is a strictly sequential chain: validate, call inference,
//! then (if a history service is configured) look up the display name and
//! store the record. Only the inference call can fail the request. The two
//! history calls return results that are downgraded right here, at the call
//! site, to a `salvo_no_historico` flag.

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::api::AppState;
use crate::auth::CallerContext;
use crate::clients::{HistoryClient, HistoryError, HistorySaved, InferenceError, Passthrough};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::model::{
    AnalysisRequest, AnalysisResponse, Base64AnalysisBody, EmotionRecord, FALLBACK_PATIENT_NAME,
    HealthResponse, HealthStatus, ImageSource, UpstreamAnalysis,
};

/// Filename used when an upload arrives without one.
pub const DEFAULT_FILENAME: &str = "capture.jpg";

/// MIME type used when an upload arrives without one.
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// A file field as read from a multipart body.
#[derive(Debug, Default)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Validate a multipart upload and apply defaults.
pub fn upload_request(
    file: Option<UploadedFile>,
    model: Option<String>,
    detector: Option<String>,
    config: &GatewayConfig,
) -> Result<AnalysisRequest, GatewayError> {
    let file = file
        .filter(|f| !f.bytes.is_empty())
        .ok_or_else(|| GatewayError::validation("No image sent. Use the 'file' field"))?;

    let filename = non_blank(file.filename).unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    let content_type =
        non_blank(file.content_type).unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    Ok(AnalysisRequest {
        image: ImageSource::Upload {
            bytes: file.bytes,
            filename,
            content_type,
        },
        model: non_blank(model).unwrap_or_else(|| config.default_model.clone()),
        detector: non_blank(detector).unwrap_or_else(|| config.default_detector.clone()),
    })
}

/// Validate a base64 JSON body and apply defaults.
///
/// An optional `data:<mime>;base64,` prefix is stripped, as is any whitespace
/// inside the payload (line-wrapped encoders). The remainder must decode as
/// standard base64.
pub fn base64_request(
    body: Base64AnalysisBody,
    config: &GatewayConfig,
) -> Result<AnalysisRequest, GatewayError> {
    let raw = body.image_base64.unwrap_or_default();
    let payload: String = strip_data_url(raw.trim())
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    if payload.is_empty() {
        return Err(GatewayError::validation("Field 'imageBase64' is required"));
    }
    if STANDARD.decode(&payload).is_err() {
        return Err(GatewayError::validation("Field 'imageBase64' is not valid base64"));
    }

    Ok(AnalysisRequest {
        image: ImageSource::Base64(payload),
        model: non_blank(body.model).unwrap_or_else(|| config.default_model.clone()),
        detector: non_blank(body.detector).unwrap_or_else(|| config.default_detector.clone()),
    })
}

fn strip_data_url(value: &str) -> &str {
    match value.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data.trim(),
        _ => value,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Relay one analysis and assemble the caller-facing response.
#[instrument(
    skip(state, caller, request),
    fields(caller = %caller.subject_id, model = %request.model, detector = %request.detector)
)]
pub async fn analyze(
    state: &AppState,
    caller: &CallerContext,
    request: AnalysisRequest,
) -> Result<AnalysisResponse, GatewayError> {
    let expose = state.config.environment.exposes_details();

    let body = state
        .inference
        .analyze(&request)
        .await
        .map_err(|e| upstream_error(e, expose))?;
    let analysis = UpstreamAnalysis::from_json(&body);

    let (salvo_no_historico, mensagem_sugerida) = match &state.history {
        Some(history) => match record_history(history, caller, &analysis).await {
            Ok(saved) => (Some(true), saved.suggested_message),
            Err(e) => {
                warn!(error = %e, "History write failed; analysis returned without it");
                (Some(false), None)
            }
        },
        None => (None, None),
    };

    let response = AnalysisResponse {
        sucesso: true,
        user_id: caller.subject_id.clone(),
        user_role: caller.role.clone(),
        emocao: analysis.dominant_emotion.unwrap_or_default(),
        emocoes: analysis.emotions,
        idade: analysis.age,
        genero: analysis.gender,
        modelo_usado: analysis.model_used.unwrap_or(request.model),
        detector_usado: analysis.detector_used.unwrap_or(request.detector),
        mensagem_sugerida,
        salvo_no_historico,
    };

    info!(
        emotion = %response.emocao,
        emotion_count = response.emocoes.len(),
        saved = ?response.salvo_no_historico,
        "Analysis relayed"
    );
    Ok(response)
}

/// Resolve the display name and store the record.
///
/// The profile lookup is advisory: its failure only changes which name is
/// written. The write's own result is returned for the caller to downgrade.
async fn record_history(
    history: &HistoryClient,
    caller: &CallerContext,
    analysis: &UpstreamAnalysis,
) -> Result<HistorySaved, HistoryError> {
    let profile_name = match history.fetch_display_name(caller).await {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "Profile lookup failed; using fallback name");
            None
        }
    };

    let patient_name = profile_name
        .or_else(|| caller.display_name_hint.clone())
        .unwrap_or_else(|| FALLBACK_PATIENT_NAME.to_string());

    let record = EmotionRecord {
        caller_id: caller.subject_id.clone(),
        patient_name,
        emotions_detected: analysis.emotions.clone(),
        dominant_emotion: analysis.dominant_emotion.clone().unwrap_or_default(),
        age: analysis.age,
        gender: analysis.gender.clone(),
        timestamp: Utc::now(),
    };

    history.save_emotion(caller, &record).await
}

/// Map an inference failure onto the taxonomy.
///
/// 4xx/5xx statuses are forwarded; other non-success statuses and unreadable
/// bodies become 502; unreachable services and timeouts become 503. Bodies
/// and error text are attached only when `expose` is set.
pub fn upstream_error(err: InferenceError, expose: bool) -> GatewayError {
    match err {
        InferenceError::Transport(e) if e.is_builder() => GatewayError::internal(
            anyhow::Error::new(e).context("could not build inference request"),
            expose,
        ),
        InferenceError::Transport(e) => {
            warn!(error = %e, timeout = e.is_timeout(), "Inference service unreachable");
            GatewayError::Upstream {
                status: StatusCode::SERVICE_UNAVAILABLE,
                detail: expose.then(|| e.to_string()),
            }
        }
        InferenceError::Status { status, body } => {
            warn!(%status, "Inference service rejected the request");
            let status = if status.is_client_error() || status.is_server_error() {
                status
            } else {
                StatusCode::BAD_GATEWAY
            };
            GatewayError::Upstream {
                status,
                detail: expose.then_some(body),
            }
        }
        InferenceError::InvalidBody(e) => {
            warn!(error = %e, "Inference service sent an unreadable body");
            GatewayError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                detail: expose.then(|| e.to_string()),
            }
        }
    }
}

/// Probe the inference service. Never cached, never retried.
#[instrument(skip(state))]
pub async fn check_health(state: &AppState) -> (StatusCode, HealthResponse) {
    match state.inference.health().await {
        Ok(status) if status.is_success() => (
            StatusCode::OK,
            HealthResponse {
                sucesso: true,
                status: HealthStatus::Healthy,
                python: true,
                code: None,
                erro: None,
            },
        ),
        Ok(status) => {
            warn!(%status, "Inference service degraded");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthResponse {
                    sucesso: false,
                    status: HealthStatus::Degraded,
                    python: false,
                    code: Some(status.as_u16()),
                    erro: None,
                },
            )
        }
        Err(e) => {
            warn!(error = %e, "Inference service unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthResponse {
                    sucesso: false,
                    status: HealthStatus::Unhealthy,
                    python: false,
                    code: None,
                    erro: state
                        .config
                        .environment
                        .exposes_details()
                        .then(|| e.to_string()),
                },
            )
        }
    }
}

/// Fetch the model list for passthrough.
#[instrument(skip(state))]
pub async fn list_models(state: &AppState) -> Result<Passthrough, GatewayError> {
    state
        .inference
        .models()
        .await
        .map_err(|e| upstream_error(e, state.config.environment.exposes_details()))
}
