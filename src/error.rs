use thiserror::Error;

/// Errors surfaced to callers of the session API.
///
/// Malformed, forged or expired tokens never show up here: they are reported as a
/// [`DecodeError`] to the log and the request continues with an empty session.
#[derive(Debug, Error)]
pub enum Error {
    /// A value could not be represented as JSON, or the encoded token could not be produced.
    #[error("failed to encode session: {0}")]
    Encode(String),

    /// A stored value exists but does not deserialize into the requested type.
    #[error("failed to deserialize session value for key `{key}`: {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The session cookie was written after the response had started transmitting.
    #[error("cannot set the session cookie: the response has already been prepared")]
    LateWrite,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why an inbound token was discarded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("signature mismatch")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("jwt rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("decryption failed")]
    Decrypt,
}
