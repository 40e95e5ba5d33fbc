//! Correlation token extraction.
//!
//! A browser that was previously served an instrumented page sends back a
//! token in the agent cookie (`NRAGENT=tk=<token>`). The token decides whether
//! the transaction GUID is worth handing back to the browser.

use std::fmt;
use std::sync::Arc;

use crate::config::BrowserTokenConfig;
use crate::request::Request;

/// Pulls a correlation token out of a request.
///
/// Implementations must be pure: reading the request is the only allowed
/// effect, and failure is reported as `None`.
pub trait TokenExtractor: Send + Sync + fmt::Debug {
    /// Extract the token, if the request carries one.
    fn extract(&self, request: &dyn Request) -> Option<String>;
}

/// Shared extractor handle.
pub type SharedTokenExtractor = Arc<dyn TokenExtractor>;

/// Reads the token from a `key=value` agent cookie.
#[derive(Debug, Clone)]
pub struct BrowserTokenExtractor {
    cookie_name: String,
    token_key: String,
}

impl BrowserTokenExtractor {
    /// Create an extractor for the given cookie and key.
    pub fn new(cookie_name: impl Into<String>, token_key: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            token_key: token_key.into(),
        }
    }

    /// Create an extractor from configuration.
    pub fn from_config(config: &BrowserTokenConfig) -> Self {
        Self::new(&config.cookie_name, &config.token_key)
    }
}

impl Default for BrowserTokenExtractor {
    fn default() -> Self {
        Self::from_config(&BrowserTokenConfig::default())
    }
}

impl TokenExtractor for BrowserTokenExtractor {
    fn extract(&self, request: &dyn Request) -> Option<String> {
        let flag = request.cookie(&self.cookie_name)?;

        let mut parts = flag.split('=');
        let (key, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) if !value.is_empty() => (key, value),
            _ => return None,
        };
        if key != self.token_key {
            return None;
        }

        Some(escape_html(&sanitize_token(value)))
    }
}

/// Tokens carrying markup characters are blanked rather than dropped, so the
/// request still counts as token-bearing.
fn sanitize_token(token: &str) -> String {
    if token.contains(['<', '>', '\'', '"']) {
        tracing::debug!("Rejecting browser token containing markup characters");
        String::new()
    } else {
        token.to_string()
    }
}

fn escape_html(token: &str) -> String {
    token.replace('&', "&amp;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::InboundRequest;

    fn extract(cookie: &str) -> Option<String> {
        let req = InboundRequest::new("/").with_cookie("NRAGENT", cookie);
        BrowserTokenExtractor::default().extract(&req)
    }

    #[test]
    fn test_extracts_token() {
        assert_eq!(extract("tk=abc"), Some("abc".to_string()));
    }

    #[test]
    fn test_missing_cookie() {
        let req = InboundRequest::new("/");
        assert_eq!(BrowserTokenExtractor::default().extract(&req), None);
    }

    #[test]
    fn test_malformed_cookie() {
        assert_eq!(extract("tk"), None);
        assert_eq!(extract("tk="), None);
        assert_eq!(extract("tk=a=b"), None);
        assert_eq!(extract("other=abc"), None);
    }

    #[test]
    fn test_markup_blanks_token() {
        assert_eq!(extract("tk=<script>"), Some(String::new()));
        assert_eq!(extract("tk=a\"b"), Some(String::new()));
    }

    #[test]
    fn test_ampersand_escaped() {
        assert_eq!(extract("tk=a&b"), Some("a&amp;b".to_string()));
    }

    #[test]
    fn test_custom_cookie_name() {
        let extractor = BrowserTokenExtractor::new("APMTOKEN", "t");
        let req = InboundRequest::new("/").with_cookie("APMTOKEN", "t=xyz");
        assert_eq!(extractor.extract(&req), Some("xyz".to_string()));
    }
}
