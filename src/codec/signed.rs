use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::Duration;

use super::{SessionData, TokenCodec, check_freshness, now_unix, object_from_value};
use crate::{
    SecretKey,
    error::{DecodeError, Error, Result},
};

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = '|';

/// `base64url(json) | unix-seconds | base64url(HMAC-SHA256(secret, payload + timestamp))`.
///
/// The payload is readable by the client; only its integrity is protected.
#[derive(Debug, Clone)]
pub struct SignedCodec {
    secret: SecretKey,
    max_age: Option<Duration>,
}

impl SignedCodec {
    #[must_use]
    pub fn new(secret: SecretKey) -> Self {
        Self {
            secret,
            max_age: None,
        }
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    fn mac(&self, payload: &str, timestamp: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(payload.as_bytes());
        mac.update(timestamp.as_bytes());
        Some(mac)
    }

    fn encode_at(&self, data: &SessionData, issued: i64) -> Result<String> {
        let json = serde_json::to_vec(data).map_err(|err| Error::Encode(err.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let timestamp = issued.to_string();
        let signature = self
            .mac(&payload, &timestamp)
            .ok_or_else(|| Error::Encode("secret is not a usable HMAC key".into()))?
            .finalize()
            .into_bytes();

        Ok(format!(
            "{payload}{SEPARATOR}{timestamp}{SEPARATOR}{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }
}

impl TokenCodec for SignedCodec {
    fn encode(&self, data: &SessionData) -> Result<String> {
        self.encode_at(data, now_unix())
    }

    fn try_decode(&self, token: &str) -> Result<SessionData, DecodeError> {
        let mut segments = token.split(SEPARATOR);
        let (Some(payload), Some(timestamp), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(DecodeError::Malformed("expected three `|`-separated segments"));
        };

        let signature = URL_SAFE_NO_PAD.decode(signature)?;
        self.mac(payload, timestamp)
            .ok_or(DecodeError::BadSignature)?
            .verify_slice(&signature)
            .map_err(|_| DecodeError::BadSignature)?;

        let issued: i64 = timestamp
            .parse()
            .map_err(|_| DecodeError::Malformed("timestamp is not an integer"))?;
        check_freshness(issued, self.max_age)?;

        let json = URL_SAFE_NO_PAD.decode(payload)?;
        object_from_value(serde_json::from_slice(&json)?)
    }
}
