//! Client keys and how they are pulled out of requests.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::header::HeaderName;
use http::Request;

use crate::ConfigError;

/// Identifier under which rate-limit state is partitioned.
///
/// Cheap to clone; equal principals always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(Arc<str>);

impl ClientKey {
    /// Create a key from any string-like identifier.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ClientKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<IpAddr> for ClientKey {
    fn from(addr: IpAddr) -> Self {
        Self::new(addr.to_string())
    }
}

/// Authenticated principal, inserted as a request extension by an upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// Derives a [`ClientKey`] from a request.
///
/// Returning `None` means the request carries nothing to key on; the
/// middleware then applies its [`MissingKeyPolicy`].
pub trait KeyExtractor: Send + Sync + 'static {
    /// Extract the key for `req`.
    fn extract<B>(&self, req: &Request<B>) -> Option<ClientKey>;
}

/// Built-in key extraction strategies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Source IP from a `SocketAddr` request extension, as inserted by the server.
    ///
    /// The port is ignored so that one client reusing connections keeps one key.
    #[default]
    PeerAddr,
    /// Value of a request header; for list-valued headers such as
    /// `x-forwarded-for` only the first entry is used.
    Header(HeaderName),
    /// The [`Principal`] request extension.
    Principal,
}

impl KeyStrategy {
    /// Key on a header, validating its name.
    ///
    /// # Examples
    /// ```
    /// use tollgate::KeyStrategy;
    /// assert!(KeyStrategy::header("x-api-key").is_ok());
    /// assert!(KeyStrategy::header("not a header").is_err());
    /// ```
    pub fn header(name: &str) -> Result<Self, ConfigError> {
        HeaderName::from_bytes(name.as_bytes())
            .map(KeyStrategy::Header)
            .map_err(|_| ConfigError::InvalidHeaderName { name: name.to_string() })
    }
}

impl KeyExtractor for KeyStrategy {
    fn extract<B>(&self, req: &Request<B>) -> Option<ClientKey> {
        match self {
            KeyStrategy::PeerAddr => {
                req.extensions().get::<SocketAddr>().map(|addr| ClientKey::from(addr.ip()))
            }
            KeyStrategy::Header(name) => {
                let value = req.headers().get(name)?.to_str().ok()?;
                let first = value.split(',').next()?.trim();
                (!first.is_empty()).then(|| ClientKey::from(first))
            }
            KeyStrategy::Principal => {
                let principal = req.extensions().get::<Principal>()?;
                (!principal.0.is_empty()).then(|| ClientKey::from(principal.0.as_str()))
            }
        }
    }
}

/// What to do with a request no key can be extracted from.
///
/// A missing key means the extraction strategy does not match how the server
/// is deployed, so both policies also log a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKeyPolicy {
    /// Forward the request without rate limiting it.
    #[default]
    FailOpen,
    /// Reject the request with 429 and no retry hint.
    FailClosed,
}
