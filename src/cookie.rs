//! Moving tokens between HTTP headers and the session layer.

use http::{HeaderMap, HeaderValue, Response, header};
use tower_cookies::Cookie;

use crate::error::{Error, Result};

/// Response extension marking a response whose headers have already been sent.
///
/// Servers or adapters that stream the head early insert this so that a later cookie write
/// fails with [`Error::LateWrite`] instead of being silently dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prepared;

/// An outbound response that can carry a `Set-Cookie` header.
pub trait CookieSink {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Whether transmission of the response has already started.
    fn is_prepared(&self) -> bool;
}

impl<B> CookieSink for Response<B> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        Response::headers_mut(self)
    }

    fn is_prepared(&self) -> bool {
        self.extensions().get::<Prepared>().is_some()
    }
}

/// The value of the cookie called `name`, as sent by the client.
pub fn extract(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse_encoded)
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_owned())
}

/// Set `cookie` on the response, replacing an earlier `Set-Cookie` for the same name.
pub fn bind<R: CookieSink + ?Sized>(response: &mut R, cookie: &Cookie<'_>) -> Result<()> {
    if response.is_prepared() {
        return Err(Error::LateWrite);
    }

    let value = HeaderValue::try_from(cookie.encoded().to_string())
        .map_err(|err| Error::Encode(err.to_string()))?;

    let headers = response.headers_mut();
    let others: Vec<HeaderValue> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter(|existing| !sets_cookie_named(existing, cookie.name()))
        .cloned()
        .collect();

    headers.remove(header::SET_COOKIE);
    for other in others {
        headers.append(header::SET_COOKIE, other);
    }
    headers.append(header::SET_COOKIE, value);

    Ok(())
}

/// Bytes of the `name=value` pair as sent on the wire, after percent-encoding.
pub fn pair_len(cookie: &Cookie<'_>) -> usize {
    cookie.encoded().stripped().to_string().len()
}

fn sets_cookie_named(value: &HeaderValue, name: &str) -> bool {
    value
        .to_str()
        .ok()
        .and_then(|value| Cookie::parse_encoded(value).ok())
        .is_some_and(|cookie| cookie.name() == name)
}
