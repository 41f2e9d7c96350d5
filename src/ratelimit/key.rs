//! Client key extraction from request metadata.

use std::collections::HashMap;

use crate::config::LimiterSettings;
use crate::error::Result;

/// Key used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Request metadata handed to the limiter by the HTTP layer.
///
/// Header names are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    headers: HashMap<String, String>,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style header insertion.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a header, replacing any previous value.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for RequestMetadata
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = RequestMetadata::new();
        for (name, value) in iter {
            metadata.insert(name, value);
        }
        metadata
    }
}

/// Derives the client key for a request.
///
/// Errors returned by an extractor are passed through to the caller of
/// [`RateLimiter::check`](super::RateLimiter::check) unchanged.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, request: &RequestMetadata) -> Result<String>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&RequestMetadata) -> Result<String> + Send + Sync,
{
    fn extract(&self, request: &RequestMetadata) -> Result<String> {
        self(request)
    }
}

/// Default extractor: forwarded-address header, then real-address header,
/// then [`UNKNOWN_CLIENT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderKeyExtractor {
    forwarded_header: String,
    real_ip_header: String,
}

impl HeaderKeyExtractor {
    pub fn new(forwarded_header: impl Into<String>, real_ip_header: impl Into<String>) -> Self {
        Self {
            forwarded_header: forwarded_header.into(),
            real_ip_header: real_ip_header.into(),
        }
    }

    pub fn from_settings(settings: &LimiterSettings) -> Self {
        Self::new(&settings.forwarded_header, &settings.real_ip_header)
    }

    fn client_address<'a>(&self, request: &'a RequestMetadata) -> Option<&'a str> {
        // First hop of a comma-separated forwarding chain
        let forwarded = request
            .header(&self.forwarded_header)
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|addr| !addr.is_empty());

        forwarded.or_else(|| {
            request
                .header(&self.real_ip_header)
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
        })
    }
}

impl Default for HeaderKeyExtractor {
    fn default() -> Self {
        Self::from_settings(&LimiterSettings::default())
    }
}

impl KeyExtractor for HeaderKeyExtractor {
    fn extract(&self, request: &RequestMetadata) -> Result<String> {
        Ok(self
            .client_address(request)
            .unwrap_or(UNKNOWN_CLIENT)
            .to_string())
    }
}

/// Map blank keys onto the shared fallback key.
pub(crate) fn normalize_key(key: &str) -> &str {
    if key.trim().is_empty() {
        UNKNOWN_CLIENT
    } else {
        key
    }
}
