use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::{SessionData, TokenCodec};
use crate::{
    SecretKey,
    error::{DecodeError, Error, Result},
};

/// Session data carried as the claim set of an HMAC-signed JWT.
///
/// No registered claim is required. An `exp` claim stored in the session is enforced.
#[derive(Clone)]
pub struct JwtCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtCodec {
    #[must_use]
    pub fn new(secret: &SecretKey) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Only the `HS*` family works with a shared secret; other algorithms fail to encode.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation
    }
}

impl fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec for JwtCodec {
    fn encode(&self, data: &SessionData) -> Result<String> {
        jsonwebtoken::encode(&Header::new(self.algorithm), data, &self.encoding_key)
            .map_err(|err| Error::Encode(err.to_string()))
    }

    fn try_decode(&self, token: &str) -> Result<SessionData, DecodeError> {
        let token_data =
            jsonwebtoken::decode::<SessionData>(token, &self.decoding_key, &self.validation())?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::now_unix;

    fn codec() -> JwtCodec {
        JwtCodec::new(&SecretKey::new("123456"))
    }

    fn object(value: serde_json::Value) -> SessionData {
        value.as_object().cloned().expect("value is an object")
    }

    #[test]
    fn claims_are_the_session_data() {
        let data = object(json!({"id": "mike", "roles": ["admin"]}));
        let token = codec().encode(&data).expect("session encodes");

        assert_eq!(token.matches('.').count(), 2);
        assert_eq!(codec().decode(&token), data);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let token = codec()
            .encode(&object(json!({"id": "mike"})))
            .expect("session encodes");
        let signature_start = token.rfind('.').expect("jwt has a signature") + 1;
        let mut bytes = token.into_bytes();
        bytes[signature_start] = if bytes[signature_start] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).expect("token stays ascii");

        assert!(codec().try_decode(&tampered).is_err());
    }

    #[test]
    fn expired_claim_is_rejected() {
        let data = object(json!({"id": "mike", "exp": now_unix() - 3_600}));
        let token = codec().encode(&data).expect("session encodes");

        assert!(matches!(codec().try_decode(&token), Err(DecodeError::Jwt(_))));
        assert!(codec().decode(&token).is_empty());
    }

    #[test]
    fn future_exp_claim_is_kept() {
        let data = object(json!({"id": "mike", "exp": now_unix() + 3_600}));
        let token = codec().encode(&data).expect("session encodes");

        assert_eq!(codec().decode(&token), data);
    }

    #[test]
    fn algorithm_mismatch_is_rejected() {
        let data = object(json!({"id": "mike"}));
        let token = codec()
            .with_algorithm(Algorithm::HS512)
            .encode(&data)
            .expect("session encodes");

        assert!(codec().try_decode(&token).is_err());
        assert_eq!(codec().with_algorithm(Algorithm::HS512).decode(&token), data);
    }
}
