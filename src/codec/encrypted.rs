use std::fmt;

use sha2::{Digest, Sha256};
use time::Duration;
use tower_cookies::{Cookie, Key, cookie::CookieJar};

use super::{SessionData, TokenCodec, check_freshness, now_unix, object_from_value};
use crate::{
    SecretKey,
    error::{DecodeError, Error, Result},
};

// The private jar authenticates the cookie name alongside the value.
const SEALED_NAME: &str = "session";

/// AES-256-GCM sealed `timestamp|json`, using the private cookie jar.
///
/// The encryption key is derived from the SHA-256 digest of the secret.
#[derive(Clone)]
pub struct EncryptedCodec {
    key: Key,
    max_age: Option<Duration>,
}

impl EncryptedCodec {
    #[must_use]
    pub fn new(secret: &SecretKey) -> Self {
        let master = Sha256::digest(secret.as_bytes());
        Self {
            key: Key::derive_from(master.as_slice()),
            max_age: None,
        }
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    fn encode_at(&self, data: &SessionData, issued: i64) -> Result<String> {
        let json = serde_json::to_string(data).map_err(|err| Error::Encode(err.to_string()))?;

        let mut jar = CookieJar::new();
        jar.private_mut(&self.key)
            .add(Cookie::new(SEALED_NAME, format!("{issued}|{json}")));

        jar.get(SEALED_NAME)
            .map(|cookie| cookie.value().to_owned())
            .ok_or_else(|| Error::Encode("private jar did not retain the sealed value".into()))
    }
}

impl fmt::Debug for EncryptedCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedCodec")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl TokenCodec for EncryptedCodec {
    fn encode(&self, data: &SessionData) -> Result<String> {
        self.encode_at(data, now_unix())
    }

    fn try_decode(&self, token: &str) -> Result<SessionData, DecodeError> {
        let jar = CookieJar::new();
        let opened = jar
            .private(&self.key)
            .decrypt(Cookie::new(SEALED_NAME, token.to_owned()))
            .ok_or(DecodeError::Decrypt)?;

        let (issued, json) = opened
            .value()
            .split_once('|')
            .ok_or(DecodeError::Malformed("sealed value has no timestamp"))?;
        let issued: i64 = issued
            .parse()
            .map_err(|_| DecodeError::Malformed("timestamp is not an integer"))?;
        check_freshness(issued, self.max_age)?;

        object_from_value(serde_json::from_str(json)?)
    }
}
