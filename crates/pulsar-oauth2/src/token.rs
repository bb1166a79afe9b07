//! OAuth tokens
//!
//! [`TokenResult`] is what the token endpoint returns; [`Token`] is what the
//! rest of the crate works with and what gets persisted in the keyring.
//! `expires_in` is a delta in seconds from the response time; it is turned
//! into an absolute expiry with the injected [`Clock`].

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Token type recorded for every token issued through this crate.
pub const TOKEN_TYPE_BEARER: &str = "bearer";

/// JWT claim carrying the human-readable user name of a device-code login.
pub const CLAIM_NAME_USER_NAME: &str = "https://streamnative.io/username";

/// Response from the token endpoint for every grant type.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_token: String,
    /// Empty when the server did not issue a new refresh token
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: i64,
}

impl fmt::Debug for TokenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResult")
            .field("access_token", &redact(&self.access_token))
            .field("id_token", &redact(&self.id_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// An access token with its optional refresh token and absolute expiry.
///
/// An empty `access_token` means the token was invalidated; the refresh token
/// (if any) is still usable. A missing `expiry` means the token never expires;
/// so does the zero instant `0001-01-01T00:00:00Z` that other clients write
/// for "no expiry".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_token_type", skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(
        default,
        deserialize_with = "deserialize_expiry",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    TOKEN_TYPE_BEARER.to_string()
}

/// Unix seconds of `0001-01-01T00:00:00Z`.
const ZERO_INSTANT_UNIX_SECS: i64 = -62_135_596_800;

fn deserialize_expiry<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let expiry = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(expiry.filter(|t| t.timestamp() > ZERO_INSTANT_UNIX_SECS))
}

impl Token {
    /// Convert a token endpoint response, anchoring `expires_in` at `clock.now()`.
    pub fn from_result(result: TokenResult, clock: &dyn Clock) -> Self {
        Self {
            access_token: result.access_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            refresh_token: result.refresh_token,
            expiry: Some(clock.now() + Duration::seconds(result.expires_in)),
        }
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Whether the token is expired, or will be within `delta`, at `now`.
    ///
    /// Tokens without an expiry never expire.
    pub fn expires_within(&self, now: DateTime<Utc>, delta: Duration) -> bool {
        match self.expiry {
            Some(expiry) => now >= expiry - delta,
            None => false,
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &redact(&self.access_token))
            .field("token_type", &self.token_type)
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expiry", &self.expiry)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "[REDACTED]" }
}

/// Read the user name claim from a JWT access token.
///
/// The signature is not verified; the claim is only used as a display label.
pub fn extract_user_name(token: &Token) -> Result<String> {
    let payload = token
        .access_token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::InvalidToken("access token is not a JWT".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::InvalidToken(format!("decoding claims: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidToken(format!("parsing claims: {e}")))?;

    claims
        .get(CLAIM_NAME_USER_NAME)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::InvalidToken(format!(
                "access token doesn't contain a {CLAIM_NAME_USER_NAME} claim"
            ))
        })
}
