//! Bearer credential handling.
//!
//! Tokens are issued elsewhere. The gateway only validates them, reads the
//! caller's identity out of the claims, and forwards the raw token to the
//! history service. Tokens are never logged.

use axum::{
    RequestPartsExt, async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Map, Value};
use tower_cookies::Cookies;
use tracing::debug;

use crate::api::AppState;
use crate::config::JwtSettings;
use crate::error::GatewayError;

/// Cookie carrying the session token. Takes precedence over the
/// `Authorization` header when both are present.
pub const TOKEN_COOKIE: &str = "accessToken";

/// Identity claim names, in lookup order.
pub const IDENTITY_CLAIMS: [&str; 4] = [
    "userId",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier",
    "nameid",
    "sub",
];

/// Role claim. Optional, no alternates.
pub const ROLE_CLAIM: &str = "role";

/// Claims that may carry a human-readable name for history records.
pub const DISPLAY_NAME_CLAIMS: [&str; 3] = ["patientName", "name", "unique_name"];

/// Decoded token claims, kept loose so alternate claim names can be probed.
pub type Claims = Map<String, Value>;

/// Return the first claim in `names` that is present and non-blank.
///
/// String and numeric claim values are accepted; numbers are rendered in
/// their JSON form.
pub fn first_present_claim(claims: &Claims, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match claims.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Validates HS256 tokens against the configured key, issuer and audience.
#[derive(Clone)]
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(settings: &JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = settings.leeway_secs;

        if let Some(issuer) = &settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &settings.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(settings.key.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, GatewayError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Rejected bearer token");
                GatewayError::auth("Invalid or expired token")
            })
    }
}

/// Extract the token from an `Authorization: Bearer` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|auth| {
            let (scheme, token) = auth.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// A validated bearer token and its claims.
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub claims: Claims,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("claims", &self.claims.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Credential {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookie_token = parts
            .extract::<Cookies>()
            .await
            .ok()
            .and_then(|cookies| cookies.get(TOKEN_COOKIE).map(|c| c.value().to_string()))
            .filter(|token| !token.is_empty());

        let token = cookie_token
            .or_else(|| extract_bearer_token(&parts.headers))
            .ok_or_else(|| GatewayError::auth("No authentication token"))?;

        let claims = state.jwt.validate(&token)?;
        Ok(Credential { token, claims })
    }
}

/// Who is calling, plus the token to forward on their behalf.
///
/// Built once per request and passed explicitly to every outbound call that
/// acts for the caller.
#[derive(Clone)]
pub struct CallerContext {
    pub subject_id: String,
    pub role: Option<String>,
    pub display_name_hint: Option<String>,
    bearer: String,
}

impl CallerContext {
    pub fn from_credential(credential: Credential) -> Result<Self, GatewayError> {
        let subject_id = first_present_claim(&credential.claims, &IDENTITY_CLAIMS)
            .ok_or_else(|| GatewayError::auth("Token carries no usable identity claim"))?;

        Ok(Self {
            subject_id,
            role: first_present_claim(&credential.claims, &[ROLE_CLAIM]),
            display_name_hint: first_present_claim(&credential.claims, &DISPLAY_NAME_CLAIMS),
            bearer: credential.token,
        })
    }

    /// The caller's token, for forwarding.
    pub fn bearer(&self) -> &str {
        &self.bearer
    }
}

impl std::fmt::Debug for CallerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerContext")
            .field("subject_id", &self.subject_id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
