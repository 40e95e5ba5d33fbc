//! Inbound request abstraction.
//!
//! The state only needs to read headers and cookies from the request that
//! started a unit of work. Framework adapters implement [`Request`] for their
//! own request types; [`InboundRequest`] is a plain owned implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Read-only view of an inbound request.
pub trait Request: Send + Sync + fmt::Debug {
    /// Look up a header value (case-insensitive).
    fn header(&self, name: &str) -> Option<&str>;

    /// Look up a cookie value by exact name.
    fn cookie(&self, name: &str) -> Option<&str>;
}

/// Shared request handle, as stored on the state.
pub type SharedRequest = Arc<dyn Request>;

/// An owned request with headers and parsed cookies.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Request path (informational).
    pub path: String,
    /// Headers keyed by lowercase name.
    headers: HashMap<String, String>,
    /// Cookies parsed from the `Cookie` header.
    cookies: HashMap<String, String>,
}

impl InboundRequest {
    /// Create an empty request for the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Add a header. A `Cookie` header is also parsed into cookies.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into().to_ascii_lowercase();
        let value = value.into();
        if name == "cookie" {
            self.cookies.extend(parse_cookie_header(&value));
        }
        self.headers.insert(name, value);
        self
    }

    /// Add a single cookie.
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Wrap the request for storage on a state.
    pub fn into_shared(self) -> SharedRequest {
        Arc::new(self)
    }
}

impl Request for InboundRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// Split a `Cookie` header into name/value pairs.
///
/// Only the first `=` separates name from value, so values may themselves
/// contain `=` (e.g. `NRAGENT=tk=abc`).
fn parse_cookie_header(header: &str) -> impl Iterator<Item = (String, String)> + '_ {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name.to_string(), value.trim().to_string()))
    })
}
