//! Session credentials.
//!
//! A [`Credential`] is the bearer token the endpoint authenticates the
//! connection with, plus its expiry. The expiry is checked locally before any
//! transport is created so an already-expired token never costs a handshake.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::text::truncate_with_suffix;

/// Number of leading token bytes kept when a credential is logged.
const REDACTED_PREFIX_BYTES: usize = 12;

/// Errors raised while deriving a credential from a token.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The token is not a three-segment JWT.
    #[error("token is not a JWT (expected 3 segments, found {segments})")]
    NotAJwt {
        /// Number of `.`-separated segments found.
        segments: usize,
    },
    /// The payload segment is not valid base64url.
    #[error("token payload is not base64url: {reason}")]
    Base64 {
        /// Decoder error.
        reason: String,
    },
    /// The payload is not a JSON object.
    #[error("token payload is not JSON: {reason}")]
    Json {
        /// Parser error.
        reason: String,
    },
    /// The payload carries no `exp` claim.
    #[error("token has no exp claim")]
    MissingExpiry,
    /// The `exp` claim is outside the representable range.
    #[error("token exp claim out of range: {exp}")]
    ExpiryOutOfRange {
        /// Raw claim value.
        exp: i64,
    },
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// A bearer credential with a known expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential from a raw token and its expiry.
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Derive a credential from a JWT, reading expiry from its `exp` claim.
    ///
    /// The signature is not verified; only the endpoint can do that.
    pub fn from_jwt(token: impl Into<String>) -> Result<Self, CredentialError> {
        let token = token.into();
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(CredentialError::NotAJwt {
                segments: segments.len(),
            });
        }

        let payload = segments[1];
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .or_else(|_| URL_SAFE.decode(payload))
            .map_err(|e| CredentialError::Base64 {
                reason: e.to_string(),
            })?;
        let claims: Claims = serde_json::from_slice(&bytes).map_err(|e| CredentialError::Json {
            reason: e.to_string(),
        })?;
        let exp = claims.exp.ok_or(CredentialError::MissingExpiry)?;
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or(CredentialError::ExpiryOutOfRange { exp })?;

        Ok(Self {
            value: token,
            expires_at,
        })
    }

    /// The raw token.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Expiry instant.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token string is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Whether the credential has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the credential has expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Log-safe rendering of the token.
    pub fn redacted(&self) -> String {
        truncate_with_suffix(&self.value, REDACTED_PREFIX_BYTES, "…")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &self.redacted())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
