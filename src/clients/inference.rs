//! Facial-analysis (inference) service client.
//!
//! The service is a black box reached over HTTP:
//!
//! - `POST /analyze` - multipart `file`, `model`, `detector`, `actions`
//! - `POST /analyze-base64` - JSON `{image_base64, model, detector, actions}`
//! - `GET /health`, `GET /models`
//!
//! Every request carries `X-API-Key` when a key is configured.

use axum::body::Bytes;
use reqwest::{
    Method, RequestBuilder, StatusCode,
    header::{CONTENT_TYPE, HeaderValue},
    multipart::{Form, Part},
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::{AnalysisRequest, ImageSource, REQUESTED_ACTIONS, UpstreamBase64Body};

/// Header carrying the inference service's shared secret.
pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Error)]
pub enum InferenceError {
    /// Connection failure, timeout, or a request that could not be built.
    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("inference service returned {status}")]
    Status { status: StatusCode, body: String },

    #[error("inference service returned a non-JSON body: {0}")]
    InvalidBody(#[source] serde_json::Error),
}

/// An upstream response relayed without interpretation.
#[derive(Debug, Clone)]
pub struct Passthrough {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl InferenceClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    /// Build a request with the API key attached when configured.
    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.header(API_KEY_HEADER, key),
            None => req,
        }
    }

    /// Relay an analysis request and return the raw JSON answer.
    ///
    /// Uploads go to `/analyze` as multipart, base64 payloads to
    /// `/analyze-base64` as JSON. Non-success statuses are returned as
    /// [`InferenceError::Status`] with the body text attached.
    #[instrument(skip(self, request), fields(model = %request.model, detector = %request.detector))]
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<Value, InferenceError> {
        let req = match &request.image {
            ImageSource::Upload {
                bytes,
                filename,
                content_type,
            } => {
                let file = Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str(content_type)?;
                let form = Form::new()
                    .part("file", file)
                    .text("model", request.model.clone())
                    .text("detector", request.detector.clone())
                    .text("actions", REQUESTED_ACTIONS.join(","));
                self.build_request(Method::POST, "/analyze").multipart(form)
            }
            ImageSource::Base64(data) => self
                .build_request(Method::POST, "/analyze-base64")
                .json(&UpstreamBase64Body {
                    image_base64: data,
                    model: &request.model,
                    detector: &request.detector,
                    actions: REQUESTED_ACTIONS,
                }),
        };

        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(InferenceError::Status { status, body });
        }

        debug!(%status, bytes = body.len(), "Inference response received");
        serde_json::from_str(&body).map_err(InferenceError::InvalidBody)
    }

    /// Probe the service's health endpoint and return its status code.
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<StatusCode, InferenceError> {
        let response = self.build_request(Method::GET, "/health").send().await?;
        Ok(response.status())
    }

    /// Fetch the model list exactly as the service returns it.
    #[instrument(skip(self))]
    pub async fn models(&self) -> Result<Passthrough, InferenceError> {
        let response = self.build_request(Method::GET, "/models").send().await?;
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response.bytes().await?;

        Ok(Passthrough {
            status,
            content_type,
            body,
        })
    }
}
