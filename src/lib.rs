//! Cookie-carried sessions and a login gate for `tower` services.
//!
//! The whole session lives in a tamper-evident token stored in a cookie; nothing is kept
//! server-side. Three token schemes are available (see [`SessionKind`]):
//!
//! - `plain-signed`: readable JSON protected by an HMAC-SHA256 signature.
//! - `jwt`: the session data is the claim set of an HMAC-signed JWT.
//! - `encrypted`: AES-256-GCM sealed JSON.
//!
//! Tokens that are malformed, forged or expired are treated as if no cookie was sent.
//!
//! [`SessionManagerLayer`] attaches a [`Session`] to each request and, when
//! [`auto_manage`](SessionConfig::with_auto_manage) is set, writes a `Set-Cookie` header if
//! and only if the session was modified. [`AuthGate`] resolves the logged-in user through a
//! [`UserLoader`] and redirects requests that fail its check.
//!
//! # Security
//! The default secret is a documented placeholder and a warning is logged when it is used.
//! Changing the secret invalidates every issued token.

pub mod codec;
mod config;
pub mod cookie;
mod error;
#[cfg(feature = "axum-core")]
mod extract;
pub mod gate;
pub mod layer;
mod manager;
mod secret;
mod session;

pub use tower_cookies::cookie::SameSite;

pub use crate::codec::{Codec, SessionData, SessionKind, TokenCodec};
pub use crate::config::{CookieParams, DEFAULT_COOKIE_NAME, DEFAULT_LOGIN_URL, SessionConfig};
pub use crate::error::{DecodeError, Error, Result};
pub use crate::gate::{
    AuthGate, CurrentUser, GateOutcome, IdentityLoader, Location, RedirectKind, RedirectTarget,
    Rejection, RequireUserLayer, Requirement, UserLoader, loader_fn,
};
pub use crate::layer::SessionManagerLayer;
pub use crate::manager::SessionManager;
pub use crate::secret::{INSECURE_SECRET, SecretKey};
pub use crate::session::{ID_KEY, Session};
