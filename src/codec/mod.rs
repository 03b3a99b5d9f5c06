//! Token codecs turning [`SessionData`] into a cookie-safe string and back.
//!
//! Every codec shares one contract: encoding fails only for data that cannot be represented
//! as JSON, and decoding never fails. A token that is malformed, forged, expired or does not
//! carry a JSON object decodes to an empty mapping.

use std::{fmt, str::FromStr};

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};

use crate::{
    SecretKey,
    error::{DecodeError, Result},
};

mod encrypted;
mod jwt;
mod signed;

pub use encrypted::EncryptedCodec;
pub use jsonwebtoken::Algorithm;
pub use jwt::JwtCodec;
pub use signed::SignedCodec;

/// The key/value content of a session.
pub type SessionData = Map<String, Value>;

/// The token scheme used for the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionKind {
    /// `base64(json) | timestamp | HMAC-SHA256` signature.
    PlainSigned,
    /// A signed JWT whose claim set is the session data.
    #[default]
    Jwt,
    /// AES-256-GCM sealed JSON.
    Encrypted,
}

impl SessionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::PlainSigned => "plain-signed",
            SessionKind::Jwt => "jwt",
            SessionKind::Encrypted => "encrypted",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown session type `{0}`")]
pub struct ParseSessionKindError(String);

impl FromStr for SessionKind {
    type Err = ParseSessionKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain-signed" | "signed" | "base" => Ok(SessionKind::PlainSigned),
            "jwt" => Ok(SessionKind::Jwt),
            "encrypted" | "fernet" => Ok(SessionKind::Encrypted),
            other => Err(ParseSessionKindError(other.to_owned())),
        }
    }
}

/// Converts session data to and from a token.
pub trait TokenCodec: fmt::Debug + Send + Sync + 'static {
    /// Encode `data` into a token.
    fn encode(&self, data: &SessionData) -> Result<String>;

    /// Decode a token, reporting why it was rejected.
    fn try_decode(&self, token: &str) -> Result<SessionData, DecodeError>;

    /// Decode a token, degrading to an empty mapping on any failure.
    fn decode(&self, token: &str) -> SessionData {
        self.try_decode(token).unwrap_or_else(|err| {
            tracing::warn!(err = %err, "cookie session decode failed");
            SessionData::new()
        })
    }
}

/// One of the three codecs, selected by [`SessionKind`].
#[derive(Debug, Clone)]
pub enum Codec {
    PlainSigned(SignedCodec),
    Jwt(JwtCodec),
    Encrypted(EncryptedCodec),
}

impl Codec {
    #[must_use]
    pub fn new(kind: SessionKind, secret: &SecretKey) -> Self {
        match kind {
            SessionKind::PlainSigned => Codec::PlainSigned(SignedCodec::new(secret.clone())),
            SessionKind::Jwt => Codec::Jwt(JwtCodec::new(secret)),
            SessionKind::Encrypted => Codec::Encrypted(EncryptedCodec::new(secret)),
        }
    }

    /// Reject tokens issued more than `max_age` ago. Ignored by the JWT codec, which
    /// honours an `exp` claim instead.
    #[must_use]
    pub fn with_max_age(self, max_age: Option<Duration>) -> Self {
        match self {
            Codec::PlainSigned(codec) => Codec::PlainSigned(codec.with_max_age(max_age)),
            Codec::Encrypted(codec) => Codec::Encrypted(codec.with_max_age(max_age)),
            jwt @ Codec::Jwt(_) => jwt,
        }
    }

    /// Set the JWT signing algorithm. Ignored by the other codecs.
    #[must_use]
    pub fn with_algorithm(self, algorithm: Algorithm) -> Self {
        match self {
            Codec::Jwt(codec) => Codec::Jwt(codec.with_algorithm(algorithm)),
            other => other,
        }
    }

    #[must_use]
    pub fn kind(&self) -> SessionKind {
        match self {
            Codec::PlainSigned(_) => SessionKind::PlainSigned,
            Codec::Jwt(_) => SessionKind::Jwt,
            Codec::Encrypted(_) => SessionKind::Encrypted,
        }
    }
}

impl TokenCodec for Codec {
    fn encode(&self, data: &SessionData) -> Result<String> {
        match self {
            Codec::PlainSigned(codec) => codec.encode(data),
            Codec::Jwt(codec) => codec.encode(data),
            Codec::Encrypted(codec) => codec.encode(data),
        }
    }

    fn try_decode(&self, token: &str) -> Result<SessionData, DecodeError> {
        match self {
            Codec::PlainSigned(codec) => codec.try_decode(token),
            Codec::Jwt(codec) => codec.try_decode(token),
            Codec::Encrypted(codec) => codec.try_decode(token),
        }
    }
}

/// Encode `data` with the codec for `kind`.
pub fn encode(data: &SessionData, secret: &SecretKey, kind: SessionKind) -> Result<String> {
    Codec::new(kind, secret).encode(data)
}

/// Decode an optional token with the codec for `kind`. Never fails.
#[must_use]
pub fn decode(token: Option<&str>, secret: &SecretKey, kind: SessionKind) -> SessionData {
    match token {
        Some(token) => Codec::new(kind, secret).decode(token),
        None => SessionData::new(),
    }
}

// A literal JSON `null` payload is an empty session, not an error.
pub(crate) fn object_from_value(value: Value) -> Result<SessionData, DecodeError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(SessionData::new()),
        _ => Err(DecodeError::NotAnObject),
    }
}

pub(crate) fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) fn check_freshness(issued: i64, max_age: Option<Duration>) -> Result<(), DecodeError> {
    match max_age {
        Some(max_age) if now_unix().saturating_sub(issued) > max_age.whole_seconds() => {
            Err(DecodeError::Expired)
        }
        _ => Ok(()),
    }
}
