//! Failure taxonomy for the gateway.
//!
//! Every failure a caller can observe is one of four kinds, rendered with a
//! single JSON shape:
//!
//! ```json
//! { "sucesso": false, "erro": "...", "tipo": "validation" }
//! ```
//!
//! Upstream bodies and internal error chains only reach the response when
//! they were attached by the gateway, which does so in development
//! configurations only.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Caller input malformed or missing.
    #[error("{0}")]
    Validation(String),

    /// Missing, invalid or unusable credential.
    #[error("{0}")]
    Auth(String),

    /// The inference service failed or was unreachable.
    #[error("inference service returned {status}")]
    Upstream {
        status: StatusCode,
        detail: Option<String>,
    },

    /// Anything unexpected.
    #[error("{message}")]
    Internal {
        message: String,
        trace: Option<String>,
    },
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        GatewayError::Auth(message.into())
    }

    /// Build an internal error, keeping the full error chain only when
    /// `expose` is set.
    pub fn internal(err: anyhow::Error, expose: bool) -> Self {
        GatewayError::Internal {
            message: err.to_string(),
            trace: expose.then(|| format!("{err:?}")),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream { status, .. } => *status,
            GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::Auth(_) => "auth",
            GatewayError::Upstream { .. } => "upstream",
            GatewayError::Internal { .. } => "internal",
        }
    }
}

/// Wire shape of every failure response.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    sucesso: bool,
    erro: String,
    tipo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detalhes: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<&'a str>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            GatewayError::Validation(_) | GatewayError::Auth(_) => ErrorBody {
                sucesso: false,
                erro: self.to_string(),
                tipo: self.kind(),
                status: None,
                detalhes: None,
                stack: None,
            },
            GatewayError::Upstream { status, detail } => ErrorBody {
                sucesso: false,
                erro: "Inference service error".to_string(),
                tipo: self.kind(),
                status: Some(status.as_u16()),
                detalhes: detail.as_deref(),
                stack: None,
            },
            GatewayError::Internal { message, trace } => ErrorBody {
                sucesso: false,
                erro: message.clone(),
                tipo: self.kind(),
                status: None,
                detalhes: None,
                stack: trace.as_deref(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::auth("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                detail: None
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::internal(anyhow::anyhow!("boom"), false).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_trace_only_when_exposed() {
        let err = anyhow::anyhow!("root cause").context("while relaying");

        match GatewayError::internal(err, false) {
            GatewayError::Internal { message, trace } => {
                assert_eq!(message, "while relaying");
                assert!(trace.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = anyhow::anyhow!("root cause").context("while relaying");
        match GatewayError::internal(err, true) {
            GatewayError::Internal { trace, .. } => {
                assert!(trace.unwrap().contains("root cause"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_upstream_response_status_is_forwarded() {
        let response = GatewayError::Upstream {
            status: StatusCode::SERVICE_UNAVAILABLE,
            detail: Some("model loading".into()),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
