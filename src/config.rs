//! Runtime configuration for the gateway.
//!
//! All settings come from the environment (optionally seeded from a `.env`
//! file in `main`). Nothing here is reloaded after startup.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 5236;

/// Default inference service location.
pub const DEFAULT_INFERENCE_URL: &str = "http://localhost:5000";

/// Model substituted when the caller omits one.
pub const DEFAULT_MODEL: &str = "Facenet";

/// Detector substituted when the caller omits one.
pub const DEFAULT_DETECTOR: &str = "opencv";

/// Per-outbound-call timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Inbound body limit (multipart uploads and base64 bodies).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// HS256 keys shorter than this are rejected at startup.
pub const MIN_JWT_KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("SINOUT_JWT_KEY must be at least 32 bytes")]
    JwtKeyTooShort,
}

/// Deployment flavour. Development exposes upstream bodies and internal
/// error details in responses; production never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn exposes_details(self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(()),
        }
    }
}

/// Which history endpoint receives emotion records.
///
/// The history service has shipped both an English and a Portuguese route
/// name for the same operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRoute {
    Caregiver,
    Cuidador,
}

impl HistoryRoute {
    pub fn path(self) -> &'static str {
        match self {
            HistoryRoute::Caregiver => "/api/history/caregiver-emotion",
            HistoryRoute::Cuidador => "/api/history/cuidador-emotion",
        }
    }
}

impl FromStr for HistoryRoute {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "caregiver" => Ok(HistoryRoute::Caregiver),
            "cuidador" => Ok(HistoryRoute::Cuidador),
            _ => Err(()),
        }
    }
}

/// JWT validation parameters.
#[derive(Clone)]
pub struct JwtSettings {
    pub key: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_secs: u64,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("key", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub environment: Environment,
    pub inference_url: String,
    pub inference_api_key: Option<String>,
    /// `None` disables the profile lookup and the history write.
    pub history_url: Option<String>,
    pub history_route: HistoryRoute,
    pub jwt: JwtSettings,
    pub default_model: String,
    pub default_detector: String,
    pub upstream_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars().collect())
    }

    /// Load configuration from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = parse_or(get("SINOUT_PORT"), "SINOUT_PORT", DEFAULT_PORT)?;

        let environment = match get("SINOUT_ENV") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "SINOUT_ENV",
                value,
            })?,
            None => Environment::Production,
        };

        let history_route = match get("SINOUT_HISTORY_ROUTE") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "SINOUT_HISTORY_ROUTE",
                value,
            })?,
            None => HistoryRoute::Caregiver,
        };

        let key = get("SINOUT_JWT_KEY").ok_or(ConfigError::Missing("SINOUT_JWT_KEY"))?;
        if key.len() < MIN_JWT_KEY_LEN {
            return Err(ConfigError::JwtKeyTooShort);
        }

        let jwt = JwtSettings {
            key,
            issuer: get("SINOUT_JWT_ISSUER"),
            audience: get("SINOUT_JWT_AUDIENCE"),
            leeway_secs: parse_or(get("SINOUT_JWT_LEEWAY_SECS"), "SINOUT_JWT_LEEWAY_SECS", 0)?,
        };

        let timeout_secs = parse_or(
            get("SINOUT_UPSTREAM_TIMEOUT_SECS"),
            "SINOUT_UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?;

        Ok(Self {
            port,
            environment,
            inference_url: trim_base_url(
                &get("SINOUT_INFERENCE_URL").unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string()),
            ),
            inference_api_key: get("SINOUT_INFERENCE_API_KEY"),
            history_url: get("SINOUT_HISTORY_URL").map(|url| trim_base_url(&url)),
            history_route,
            jwt,
            default_model: get("SINOUT_DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            default_detector: get("SINOUT_DEFAULT_DETECTOR")
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            upstream_timeout: Duration::from_secs(timeout_secs),
            max_upload_bytes: parse_or(
                get("SINOUT_MAX_UPLOAD_BYTES"),
                "SINOUT_MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
        })
    }
}

fn parse_or<T: FromStr>(
    value: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_vars(vars(&[("SINOUT_JWT_KEY", KEY)])).unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.inference_url, DEFAULT_INFERENCE_URL);
        assert_eq!(config.inference_api_key, None);
        assert_eq!(config.history_url, None);
        assert_eq!(config.history_route, HistoryRoute::Caregiver);
        assert_eq!(config.default_model, "Facenet");
        assert_eq!(config.default_detector, "opencv");
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
        assert_eq!(config.jwt.leeway_secs, 0);
    }

    #[test]
    fn test_missing_jwt_key() {
        let err = GatewayConfig::from_vars(vars(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("SINOUT_JWT_KEY"));
    }

    #[test]
    fn test_short_jwt_key() {
        let err = GatewayConfig::from_vars(vars(&[("SINOUT_JWT_KEY", "short")])).unwrap_err();
        assert_eq!(err, ConfigError::JwtKeyTooShort);
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_vars(vars(&[
            ("SINOUT_JWT_KEY", KEY),
            ("SINOUT_ENV", "Development"),
            ("SINOUT_INFERENCE_URL", "http://inference:5000/"),
            ("SINOUT_INFERENCE_API_KEY", "secret"),
            ("SINOUT_HISTORY_URL", "http://crud:5240/"),
            ("SINOUT_HISTORY_ROUTE", "cuidador"),
            ("SINOUT_UPSTREAM_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert!(config.environment.exposes_details());
        assert_eq!(config.inference_url, "http://inference:5000");
        assert_eq!(config.inference_api_key.as_deref(), Some("secret"));
        assert_eq!(config.history_url.as_deref(), Some("http://crud:5240"));
        assert_eq!(
            config.history_route.path(),
            "/api/history/cuidador-emotion"
        );
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = GatewayConfig::from_vars(vars(&[
            ("SINOUT_JWT_KEY", KEY),
            ("SINOUT_INFERENCE_API_KEY", "   "),
            ("SINOUT_HISTORY_URL", ""),
        ]))
        .unwrap();

        assert_eq!(config.inference_api_key, None);
        assert_eq!(config.history_url, None);
    }

    #[test]
    fn test_invalid_values() {
        let err = GatewayConfig::from_vars(vars(&[
            ("SINOUT_JWT_KEY", KEY),
            ("SINOUT_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SINOUT_PORT", .. }));

        let err = GatewayConfig::from_vars(vars(&[
            ("SINOUT_JWT_KEY", KEY),
            ("SINOUT_HISTORY_ROUTE", "patient"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "SINOUT_HISTORY_ROUTE",
                ..
            }
        ));
    }
}
