//! Data models for the gateway.
//!
//! # Privacy
//!
//! Image payloads are carried only for the lifetime of one request. None of
//! these types implement logging of their image bytes; [`ImageSource`]'s
//! `Debug` output reports sizes, never content.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attributes requested from the inference service on every analysis.
pub const REQUESTED_ACTIONS: [&str; 3] = ["emotion", "age", "gender"];

/// Display name used in history records when none can be resolved.
pub const FALLBACK_PATIENT_NAME: &str = "Paciente";

/// Emotion label to confidence percentage.
pub type EmotionScores = BTreeMap<String, f64>;

/// The image as the caller supplied it.
#[derive(Clone)]
pub enum ImageSource {
    /// Raw bytes from a multipart upload.
    Upload {
        bytes: Vec<u8>,
        filename: String,
        content_type: String,
    },
    /// Base64 text from a JSON body, without any `data:` prefix.
    Base64(String),
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Upload {
                bytes,
                filename,
                content_type,
            } => f
                .debug_struct("Upload")
                .field("len", &bytes.len())
                .field("filename", filename)
                .field("content_type", content_type)
                .finish(),
            ImageSource::Base64(data) => f.debug_tuple("Base64").field(&data.len()).finish(),
        }
    }
}

/// A validated analysis request with defaults applied.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image: ImageSource,
    pub model: String,
    pub detector: String,
}

/// JSON body for `POST /analyze-base64`.
#[derive(Debug, Clone, Deserialize)]
pub struct Base64AnalysisBody {
    #[serde(default, rename = "imageBase64", alias = "image_base64")]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub detector: Option<String>,
}

/// JSON body sent to the inference service's `/analyze-base64`.
#[derive(Debug, Serialize)]
pub struct UpstreamBase64Body<'a> {
    pub image_base64: &'a str,
    pub model: &'a str,
    pub detector: &'a str,
    pub actions: [&'static str; 3],
}

/// The inference service's answer, read defensively.
///
/// The service has changed shape across versions: results may be nested
/// under `analise` (or `analysis`), or sit at the top level; keys have been
/// Portuguese or DeepFace-native; gender has been a label or a score map.
/// Every field is independently optional and a missing or mistyped field
/// never fails the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamAnalysis {
    pub dominant_emotion: Option<String>,
    pub emotions: EmotionScores,
    pub age: Option<f64>,
    pub gender: Option<String>,
    pub model_used: Option<String>,
    pub detector_used: Option<String>,
}

impl UpstreamAnalysis {
    /// Extract the analysis from an arbitrary JSON document.
    pub fn from_json(value: &Value) -> Self {
        let root = match value {
            Value::Array(items) => items.first().and_then(Value::as_object),
            other => other.as_object(),
        };

        let Some(root) = root else {
            return Self::default();
        };

        let block = ["analise", "analysis"]
            .iter()
            .find_map(|key| root.get(*key).and_then(Value::as_object));

        let lookup = |keys: &[&str]| nested_or_top(block, root, keys);

        Self {
            dominant_emotion: lookup(&["emocao_dominante", "dominant_emotion", "emocao"])
                .and_then(as_label),
            emotions: lookup(&["emocoes", "emotions", "emotion"])
                .map(as_scores)
                .unwrap_or_default(),
            age: lookup(&["idade", "age"]).and_then(as_number),
            gender: lookup(&["genero", "dominant_gender", "gender"]).and_then(as_gender),
            model_used: lookup(&["modelo_usado", "model_used"]).and_then(as_label),
            detector_used: lookup(&["detector_usado", "detector_used"]).and_then(as_label),
        }
    }
}

/// Look in the analysis block first, then at the top level.
fn nested_or_top<'a>(
    block: Option<&'a Map<String, Value>>,
    root: &'a Map<String, Value>,
    keys: &[&str],
) -> Option<&'a Value> {
    block
        .and_then(|b| first_non_null(b, keys))
        .or_else(|| first_non_null(root, keys))
}

fn first_non_null<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn as_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn as_scores(value: &Value) -> EmotionScores {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(label, score)| as_number(score).map(|s| (label.clone(), s)))
                .collect()
        })
        .unwrap_or_default()
}

/// A gender label, or the best-scoring label of a `{label: score}` map.
fn as_gender(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => as_scores(value)
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(label, _)| label),
        other => as_label(other),
    }
}

/// The gateway's response to a successful analysis.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisResponse {
    pub sucesso: bool,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userRole")]
    pub user_role: Option<String>,
    pub emocao: String,
    pub emocoes: EmotionScores,
    pub idade: Option<f64>,
    pub genero: Option<String>,
    pub modelo_usado: String,
    pub detector_usado: String,
    /// Only present when the history service returned a message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensagem_sugerida: Option<String>,
    /// Only present when a history service is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salvo_no_historico: Option<bool>,
}

/// An emotion reading as stored by the history service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionRecord {
    pub caller_id: String,
    pub patient_name: String,
    pub emotions_detected: EmotionScores,
    pub dominant_emotion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Health probe result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub sucesso: bool,
    pub status: HealthStatus,
    pub python: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Inference service answered with a success status.
    Healthy,
    /// Inference service answered, but not successfully.
    Degraded,
    /// Inference service could not be reached.
    Unhealthy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_analysis() {
        let body = json!({
            "sucesso": true,
            "modelo_usado": "VGG-Face",
            "analise": {
                "emocao_dominante": "happy",
                "emocoes": {"happy": 72.5, "sad": 10.0, "neutral": 17.5},
                "idade": 28,
                "genero": "Man"
            }
        });

        let analysis = UpstreamAnalysis::from_json(&body);

        assert_eq!(analysis.dominant_emotion.as_deref(), Some("happy"));
        assert_eq!(analysis.emotions.len(), 3);
        assert_eq!(analysis.emotions["happy"], 72.5);
        assert_eq!(analysis.emotions["sad"], 10.0);
        assert_eq!(analysis.emotions["neutral"], 17.5);
        assert_eq!(analysis.age, Some(28.0));
        assert_eq!(analysis.gender.as_deref(), Some("Man"));
        assert_eq!(analysis.model_used.as_deref(), Some("VGG-Face"));
    }

    #[test]
    fn test_flat_deepface_shape() {
        let body = json!([{
            "dominant_emotion": "sad",
            "emotion": {"sad": 90.1, "happy": "9.9"},
            "age": "41",
            "gender": {"Woman": 98.2, "Man": 1.8}
        }]);

        let analysis = UpstreamAnalysis::from_json(&body);

        assert_eq!(analysis.dominant_emotion.as_deref(), Some("sad"));
        assert_eq!(analysis.emotions["happy"], 9.9);
        assert_eq!(analysis.age, Some(41.0));
        assert_eq!(analysis.gender.as_deref(), Some("Woman"));
        assert_eq!(analysis.model_used, None);
    }

    #[test]
    fn test_missing_fields_default() {
        let analysis = UpstreamAnalysis::from_json(&json!({"sucesso": true, "analise": {}}));
        assert_eq!(analysis, UpstreamAnalysis::default());

        let analysis = UpstreamAnalysis::from_json(&json!("not an object"));
        assert_eq!(analysis, UpstreamAnalysis::default());
    }

    #[test]
    fn test_null_and_mistyped_fields_are_skipped() {
        let body = json!({
            "analise": {
                "emocao_dominante": null,
                "emocoes": {"happy": "lots", "fear": 3.0},
                "idade": null,
                "genero": ["Man"]
            },
            "emocao": "neutral"
        });

        let analysis = UpstreamAnalysis::from_json(&body);

        // Falls back to the top-level key when the nested one is null.
        assert_eq!(analysis.dominant_emotion.as_deref(), Some("neutral"));
        assert_eq!(analysis.emotions.len(), 1);
        assert_eq!(analysis.emotions["fear"], 3.0);
        assert_eq!(analysis.age, None);
        assert_eq!(analysis.gender, None);
    }

    #[test]
    fn test_dominant_gender_preferred_over_scores() {
        let body = json!({
            "analysis": {
                "dominant_gender": "Man",
                "gender": {"Woman": 60.0, "Man": 40.0}
            }
        });

        let analysis = UpstreamAnalysis::from_json(&body);
        assert_eq!(analysis.gender.as_deref(), Some("Man"));
    }

    #[test]
    fn test_response_omits_history_fields_when_unset() {
        let response = AnalysisResponse {
            sucesso: true,
            user_id: "7".into(),
            user_role: None,
            emocao: String::new(),
            emocoes: EmotionScores::new(),
            idade: None,
            genero: None,
            modelo_usado: "Facenet".into(),
            detector_usado: "opencv".into(),
            mensagem_sugerida: None,
            salvo_no_historico: None,
        };

        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("mensagem_sugerida").is_none());
        assert!(value.get("salvo_no_historico").is_none());
        assert!(value["idade"].is_null());
        assert_eq!(value["userId"], "7");
    }

    #[test]
    fn test_emotion_record_wire_names() {
        let record = EmotionRecord {
            caller_id: "7".into(),
            patient_name: FALLBACK_PATIENT_NAME.into(),
            emotions_detected: EmotionScores::from([("happy".to_string(), 80.0)]),
            dominant_emotion: "happy".into(),
            age: None,
            gender: Some("Woman".into()),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["callerId"], "7");
        assert_eq!(value["patientName"], "Paciente");
        assert_eq!(value["emotionsDetected"]["happy"], 80.0);
        assert_eq!(value["dominantEmotion"], "happy");
        assert_eq!(value["gender"], "Woman");
        assert!(value.get("age").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_image_debug_hides_content() {
        let image = ImageSource::Base64("aGVsbG8=".into());
        assert_eq!(format!("{image:?}"), "Base64(8)");
    }
}
