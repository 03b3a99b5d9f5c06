use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    codec::{Codec, SessionData, TokenCodec},
    error::{Error, Result},
};

/// Session key holding the logged-in identity.
pub const ID_KEY: &str = "id";

#[derive(Debug, Default)]
struct State {
    current: SessionData,
    baseline: SessionData,
}

#[derive(Debug)]
struct Inner {
    codec: Arc<Codec>,
    token: Option<String>,
    state: OnceLock<Mutex<State>>,
}

/// A request's session.
///
/// Cloning yields another handle to the same session. The inbound token is decoded on first
/// access, at most once. Values are stored as JSON, so nested structures read back as the
/// same structure they were written as.
///
/// The session is modified when its contents differ from what the token carried. Putting a
/// value back to what it was is not a modification.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// A session whose token is decoded lazily.
    #[must_use]
    pub fn new(token: Option<String>, codec: Arc<Codec>) -> Self {
        Self {
            inner: Arc::new(Inner {
                codec,
                token,
                state: OnceLock::new(),
            }),
        }
    }

    /// A session decoded right away.
    #[must_use]
    pub fn load(token: Option<&str>, codec: Arc<Codec>) -> Self {
        let session = Self::new(token.map(str::to_owned), codec);
        drop(session.state());
        session
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .get_or_init(|| {
                let data = self
                    .inner
                    .token
                    .as_deref()
                    .map(|token| self.inner.codec.decode(token))
                    .unwrap_or_default();
                Mutex::new(State {
                    baseline: data.clone(),
                    current: data,
                })
            })
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.inner.state.get().is_some()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_value(key)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| Error::Deserialize {
                    key: key.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.state().current.get(key).cloned()
    }

    /// Store `value` under `key`. Fails if `value` has no JSON representation.
    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|err| Error::Encode(err.to_string()))?;
        self.insert_value(key, value);
        Ok(())
    }

    pub fn insert_value(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.state().current.insert(key.into(), value)
    }

    pub fn remove<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.remove_value(key)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| Error::Deserialize {
                    key: key.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    pub fn remove_value(&self, key: &str) -> Option<Value> {
        self.state().current.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().current.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state().current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().current.is_empty()
    }

    pub fn clear(&self) {
        self.state().current.clear();
    }

    /// A snapshot of the current contents.
    pub fn data(&self) -> SessionData {
        self.state().current.clone()
    }

    /// Whether the contents differ from those carried by the inbound token.
    ///
    /// A session that was never accessed is not modified.
    pub fn is_modified(&self) -> bool {
        if !self.is_loaded() {
            return false;
        }
        let state = self.state();
        state.current != state.baseline
    }

    /// Record `identity` as the logged-in user.
    pub fn login<I: Serialize>(&self, identity: I) -> Result<()> {
        self.insert(ID_KEY, identity)
    }

    /// Forget the logged-in user. A no-op if nobody is logged in.
    pub fn logout(&self) -> Option<Value> {
        self.remove_value(ID_KEY)
    }

    pub fn user_id(&self) -> Option<Value> {
        self.get_value(ID_KEY)
    }

    pub(crate) fn encode_for_response(&self) -> Result<String> {
        self.inner.codec.encode(&self.state().current)
    }

    pub(crate) fn mark_saved(&self) {
        let mut state = self.state();
        state.baseline = state.current.clone();
    }
}
