//! History (CRUD) service client.
//!
//! Both calls act on behalf of the caller: the caller's bearer token is
//! forwarded unmodified. Neither call is allowed to fail an analysis; the
//! gateway decides at the call site how a failure is downgraded.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::auth::CallerContext;
use crate::config::HistoryRoute;
use crate::model::EmotionRecord;

/// Profile endpoint used to resolve the patient's display name.
const PROFILE_PATH: &str = "/api/users/me";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("history service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Outcome of a successful history write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySaved {
    pub suggested_message: Option<String>,
}

#[derive(Clone)]
pub struct HistoryClient {
    client: reqwest::Client,
    base_url: String,
    route: HistoryRoute,
}

impl HistoryClient {
    pub fn new(client: reqwest::Client, base_url: &str, route: HistoryRoute) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            route,
        }
    }

    /// Look up the caller's profile and return its patient display name, if
    /// the profile has one.
    #[instrument(skip(self, caller), fields(caller = %caller.subject_id))]
    pub async fn fetch_display_name(
        &self,
        caller: &CallerContext,
    ) -> Result<Option<String>, HistoryError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, PROFILE_PATH))
            .bearer_auth(caller.bearer())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::Status { status, body });
        }

        // A profile we cannot read is treated as a profile without a name.
        let profile: Value = response.json().await.unwrap_or(Value::Null);
        Ok(["patientName", "name"].iter().find_map(|key| {
            profile
                .get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        }))
    }

    /// Store an emotion record and return the service's suggested message.
    #[instrument(skip(self, caller, record), fields(caller = %caller.subject_id))]
    pub async fn save_emotion(
        &self,
        caller: &CallerContext,
        record: &EmotionRecord,
    ) -> Result<HistorySaved, HistoryError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, self.route.path()))
            .bearer_auth(caller.bearer())
            .json(record)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HistoryError::Status { status, body });
        }

        let suggested_message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .get("suggestedMessage")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .filter(|message| !message.trim().is_empty());

        debug!(
            has_message = suggested_message.is_some(),
            "Emotion record stored"
        );
        Ok(HistorySaved { suggested_message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use chrono::Utc;
    use mockito::Matcher;
    use serde_json::json;

    fn caller() -> CallerContext {
        CallerContext::from_credential(Credential {
            token: "tok".into(),
            claims: json!({"userId": "9"}).as_object().cloned().unwrap(),
        })
        .unwrap()
    }

    fn record() -> EmotionRecord {
        EmotionRecord {
            caller_id: "9".into(),
            patient_name: "Maria".into(),
            emotions_detected: [("sad".to_string(), 55.0)].into(),
            dominant_emotion: "sad".into(),
            age: Some(70.0),
            gender: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_display_name_from_profile() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/users/me")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"patientName": " Maria ", "email": "x@y.z"}"#)
            .create_async()
            .await;

        let client = HistoryClient::new(
            reqwest::Client::new(),
            &server.url(),
            HistoryRoute::Caregiver,
        );
        let name = client.fetch_display_name(&caller()).await.unwrap();

        assert_eq!(name.as_deref(), Some("Maria"));
    }

    #[tokio::test]
    async fn test_profile_without_name() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/users/me")
            .with_status(200)
            .with_body(r#"{"patientName": ""}"#)
            .create_async()
            .await;

        let client = HistoryClient::new(
            reqwest::Client::new(),
            &server.url(),
            HistoryRoute::Caregiver,
        );
        assert_eq!(client.fetch_display_name(&caller()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_emotion_on_configured_route() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/history/cuidador-emotion")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({
                "callerId": "9",
                "patientName": "Maria",
                "dominantEmotion": "sad",
                "age": 70.0
            })))
            .with_status(200)
            .with_body(r#"{"suggestedMessage": "Call her today"}"#)
            .create_async()
            .await;

        let client = HistoryClient::new(
            reqwest::Client::new(),
            &server.url(),
            HistoryRoute::Cuidador,
        );
        let saved = client.save_emotion(&caller(), &record()).await.unwrap();

        assert_eq!(saved.suggested_message.as_deref(), Some("Call her today"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_save_emotion_failure_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/history/caregiver-emotion")
            .with_status(500)
            .with_body("db down")
            .create_async()
            .await;

        let client = HistoryClient::new(
            reqwest::Client::new(),
            &server.url(),
            HistoryRoute::Caregiver,
        );
        match client.save_emotion(&caller(), &record()).await {
            Err(HistoryError::Status { status, body }) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "db down");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_save_emotion_success_without_json_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/history/caregiver-emotion")
            .with_status(201)
            .create_async()
            .await;

        let client = HistoryClient::new(
            reqwest::Client::new(),
            &server.url(),
            HistoryRoute::Caregiver,
        );
        let saved = client.save_emotion(&caller(), &record()).await.unwrap();

        assert_eq!(saved, HistorySaved::default());
    }
}
