//! Problem documents as defined in [RFC 7807].
//!
//! [RFC 7807]: https://datatracker.ietf.org/doc/html/rfc7807

use std::fmt;

use url::Url;

use crate::json::Json;

const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";
// pre-standardization servers used this prefix
const LEGACY_ERROR_PREFIX: &str = "urn:acme:error:";

/// An error document returned by the server as `application/problem+json`.
///
/// Purely a value object over the raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    data: Json,
}

impl Problem {
    pub fn new(data: Json) -> Problem {
        Problem { data }
    }

    /// The problem type URI, e.g. `urn:ietf:params:acme:error:badNonce`.
    pub fn type_uri(&self) -> Option<&str> {
        self.data.get("type").as_str()
    }

    /// Human-readable explanation, if the server sent one.
    pub fn detail(&self) -> Option<&str> {
        self.data.get("detail").as_str()
    }

    /// URI of a document giving more information about this occurrence.
    pub fn instance(&self) -> Option<Url> {
        self.data.get("instance").as_url().ok().flatten()
    }

    /// Nested subproblems, one per affected identifier.
    pub fn subproblems(&self) -> Vec<Problem> {
        self.data
            .get("subproblems")
            .as_array()
            .into_iter()
            .map(Problem::new)
            .collect()
    }

    /// The raw problem document.
    pub fn json(&self) -> &Json {
        &self.data
    }

    fn is_acme_error(&self, name: &str) -> bool {
        match self.type_uri() {
            Some(uri) => {
                uri.strip_prefix(ACME_ERROR_PREFIX) == Some(name)
                    || uri.strip_prefix(LEGACY_ERROR_PREFIX) == Some(name)
            }
            None => false,
        }
    }

    /// Whether the server rejected the request nonce.
    pub fn is_bad_nonce(&self) -> bool {
        self.is_acme_error("badNonce")
    }

    /// Whether the server demands manual user action.
    pub fn is_user_action_required(&self) -> bool {
        self.is_acme_error("userActionRequired")
    }

    /// Whether the request ran into a rate limit.
    pub fn is_rate_limited(&self) -> bool {
        self.is_acme_error("rateLimited")
    }

    /// Whether the account lacks authorization for the request.
    pub fn is_unauthorized(&self) -> bool {
        self.is_acme_error("unauthorized")
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_uri = self.type_uri().unwrap_or("about:blank");
        match self.detail() {
            Some(detail) => write!(f, "{type_uri}: {detail}"),
            None => write!(f, "{type_uri}"),
        }
    }
}
