//! Validation of the HTTP upgrade request against the configured path.

use std::collections::HashMap;

/// The target of an inbound upgrade request: a path plus an optional query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    target: String,
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The upgrade may proceed with the request target replaced by this one.
    Approved(String),
    /// The connection must be closed before any upgrade response is sent.
    Rejected,
}

impl HandshakeRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The target truncated at the first `?`.
    pub fn base_path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Query parameters as a map. Pairs without a key, without a value or
    /// with more than one `=` are dropped; a repeated key keeps its last value.
    pub fn params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        let query = match self.query() {
            Some(query) => query,
            None => return params,
        };

        for pair in query.split('&') {
            let (key, value) = match pair.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            if key.is_empty() || value.is_empty() || value.contains('=') {
                continue;
            }
            params.insert(key.to_string(), value.to_string());
        }
        params
    }
}

/// Approves the request iff its base path equals `configured_path` exactly.
pub fn validate(request: &HandshakeRequest, configured_path: &str) -> Decision {
    if request.base_path() == configured_path {
        Decision::Approved(configured_path.to_string())
    } else {
        Decision::Rejected
    }
}
