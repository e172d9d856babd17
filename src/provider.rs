//! Providers inject CA-specific behavior into a session.
//!
//! A provider decides whether it serves a given server URI, fetches the
//! directory, opens connections, and owns the challenge registry. The
//! [`ProviderRegistry`] replaces the service-loader discovery of other
//! ecosystems with explicit registration at process init; the invariant is
//! the same: exactly one provider must accept a server URI.

use std::{fmt, sync::Arc};

use url::Url;

use crate::{
    challenge::{Challenge, ChallengeRegistry},
    error::{Error, Result},
    json::Json,
    session::Session,
    trans::{Connection, HttpConnection},
};

/// CA-specific behavior behind a [`Session`].
pub trait AcmeProvider: Send + Sync + fmt::Debug {
    /// Short name used in diagnostics, e.g. when two providers collide.
    fn name(&self) -> &str;

    /// Whether this provider serves the given server URI.
    fn accepts(&self, server_uri: &Url) -> bool;

    /// The challenge registry binding challenge JSON to variants.
    fn challenges(&self) -> &ChallengeRegistry;

    /// Opens a connection for one exchange.
    fn create_connection(&self, _session: &Session) -> Box<dyn Connection> {
        Box::new(HttpConnection::new())
    }

    /// Fetches the directory document. The default is a plain GET against
    /// the server URI.
    fn directory(&self, session: &Session, server_uri: &Url) -> Result<Json> {
        let mut conn = self.create_connection(session);
        conn.send_request(server_uri, session)?;
        conn.read_json_response()
    }

    /// Creates a challenge from its JSON, or `None` when the type has no
    /// binding under this provider.
    fn create_challenge(&self, session: &Session, data: Json) -> Result<Option<Challenge>> {
        self.challenges().create(session, data)
    }
}

/// The provider used for any ACME server without specialized handling.
#[derive(Debug)]
pub struct DefaultProvider {
    challenges: ChallengeRegistry,
}

impl DefaultProvider {
    pub fn new() -> DefaultProvider {
        DefaultProvider {
            challenges: ChallengeRegistry::standard(),
        }
    }
}

impl Default for DefaultProvider {
    fn default() -> Self {
        DefaultProvider::new()
    }
}

impl AcmeProvider for DefaultProvider {
    fn name(&self) -> &str {
        "default"
    }

    fn accepts(&self, server_uri: &Url) -> bool {
        matches!(server_uri.scheme(), "http" | "https")
    }

    fn challenges(&self) -> &ChallengeRegistry {
        &self.challenges
    }
}

/// The set of providers a session can resolve against.
///
/// Not a process-wide singleton; construct one and pass it to
/// [`Session::new`](crate::Session::new).
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn AcmeProvider>>,
}

impl ProviderRegistry {
    /// An empty registry. Useful when every provider is explicit.
    pub fn empty() -> ProviderRegistry {
        ProviderRegistry {
            providers: Vec::new(),
        }
    }

    /// Registers a provider. Order does not matter; resolution requires a
    /// unique match.
    pub fn register(&mut self, provider: impl AcmeProvider + 'static) -> &mut Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Resolves the single provider accepting `server_uri`.
    ///
    /// Zero matches and multiple matches are both configuration errors;
    /// the ambiguous case names the colliding providers.
    pub fn find(&self, server_uri: &Url) -> Result<Arc<dyn AcmeProvider>> {
        let mut matches = self
            .providers
            .iter()
            .filter(|provider| provider.accepts(server_uri));

        let first = matches.next().ok_or_else(|| {
            Error::illegal_argument(format!("no ACME provider accepts {server_uri}"))
        })?;

        if let Some(second) = matches.next() {
            return Err(Error::illegal_argument(format!(
                "both ACME providers '{}' and '{}' accept {server_uri}",
                first.name(),
                second.name(),
            )));
        }

        Ok(Arc::clone(first))
    }
}

impl Default for ProviderRegistry {
    /// A registry holding only the [`DefaultProvider`].
    fn default() -> Self {
        let mut registry = ProviderRegistry::empty();
        registry.register(DefaultProvider::new());
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jws::AccountKey;

    #[derive(Debug)]
    struct NamedProvider {
        name: &'static str,
        challenges: ChallengeRegistry,
    }

    impl NamedProvider {
        fn new(name: &'static str) -> Self {
            NamedProvider {
                name,
                challenges: ChallengeRegistry::standard(),
            }
        }
    }

    impl AcmeProvider for NamedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn accepts(&self, server_uri: &Url) -> bool {
            server_uri.scheme() == "https"
        }

        fn challenges(&self) -> &ChallengeRegistry {
            &self.challenges
        }
    }

    #[test]
    fn default_provider_accepts_well_known_schemes() {
        let provider = DefaultProvider::new();
        assert!(provider.accepts(&Url::parse("https://acme.example.org/dir").unwrap()));
        assert!(provider.accepts(&Url::parse("http://127.0.0.1:1400/dir").unwrap()));
        assert!(!provider.accepts(&Url::parse("ftp://acme.example.org/dir").unwrap()));
    }

    #[test]
    fn no_matching_provider_is_a_configuration_error() {
        let registry = ProviderRegistry::empty();
        let uri = Url::parse("https://acme.example.org/dir").unwrap();

        let err = registry.find(&uri).expect_err("nothing registered");
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[test]
    fn ambiguous_providers_are_named() {
        let mut registry = ProviderRegistry::empty();
        registry.register(NamedProvider::new("first"));
        registry.register(NamedProvider::new("second"));

        let uri = Url::parse("https://acme.example.org/dir").unwrap();
        let err = Session::new(uri, AccountKey::generate(), &registry)
            .err()
            .expect("ambiguous registry must fail");

        match err {
            Error::IllegalArgument(msg) => {
                assert!(msg.contains("first"), "{msg}");
                assert!(msg.contains("second"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unique_provider_resolves() {
        let mut registry = ProviderRegistry::empty();
        registry.register(NamedProvider::new("only"));

        let uri = Url::parse("https://acme.example.org/dir").unwrap();
        let provider = registry.find(&uri).unwrap();
        assert_eq!(provider.name(), "only");
    }
}
