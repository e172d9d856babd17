//! The session: the long-lived handle to one ACME server.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use url::Url;

use crate::{
    challenge::Challenge,
    error::{Error, Result},
    json::Json,
    jws::AccountKey,
    provider::{AcmeProvider, ProviderRegistry},
    resource::Resource,
    trans::Connection,
};

/// How long a fetched directory stays authoritative.
const DIRECTORY_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// A session stores the ACME server URI and the account's key pair, and
/// tracks communication parameters: the key identifier once an account
/// exists, the last replay nonce, the locale, and the cached directory.
///
/// Sessions are cheap to clone and safe to share between threads. They are
/// deliberately not serializable; persist the account key PEM and the
/// account URL instead.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    server_uri: Url,
    provider: Arc<dyn AcmeProvider>,
    key: Mutex<Arc<AccountKey>>,
    key_identifier: Mutex<Option<String>>,
    nonce: Mutex<Option<String>>,
    locale: Mutex<Option<String>>,
    directory: Mutex<Option<Arc<DirectorySnapshot>>>,
}

/// One coherent view of a fetched directory. Swapped as a whole, so readers
/// see either the old or the new directory, never a mix.
#[derive(Debug)]
struct DirectorySnapshot {
    resources: HashMap<Resource, Url>,
    metadata: Metadata,
    json: Json,
    expires_at: Instant,
}

impl Session {
    /// Creates a session for `server_uri`, resolving the responsible
    /// provider from `providers`.
    ///
    /// Fails with [`Error::IllegalArgument`] if no provider accepts the
    /// URI, or if more than one does.
    pub fn new(
        server_uri: Url,
        key: AccountKey,
        providers: &ProviderRegistry,
    ) -> Result<Session> {
        let provider = providers.find(&server_uri)?;

        Ok(Session {
            inner: Arc::new(SessionInner {
                server_uri,
                provider,
                key: Mutex::new(Arc::new(key)),
                key_identifier: Mutex::new(None),
                nonce: Mutex::new(None),
                locale: Mutex::new(default_locale()),
                directory: Mutex::new(None),
            }),
        })
    }

    /// The ACME server URI this session talks to.
    pub fn server_uri(&self) -> &Url {
        &self.inner.server_uri
    }

    /// The provider serving this session.
    pub fn provider(&self) -> Arc<dyn AcmeProvider> {
        Arc::clone(&self.inner.provider)
    }

    /// The account key pair.
    pub fn key(&self) -> Arc<AccountKey> {
        Arc::clone(&self.inner.key.lock())
    }

    /// Replaces the account key pair (key rollover).
    pub fn set_key(&self, key: AccountKey) {
        *self.inner.key.lock() = Arc::new(key);
    }

    /// The account URL, once an account has been registered.
    pub fn key_identifier(&self) -> Option<String> {
        self.inner.key_identifier.lock().clone()
    }

    pub fn set_key_identifier(&self, kid: Option<String>) {
        *self.inner.key_identifier.lock() = kid;
    }

    /// The last nonce the server handed out, if any.
    pub fn nonce(&self) -> Option<String> {
        self.inner.nonce.lock().clone()
    }

    pub fn set_nonce(&self, nonce: Option<String>) {
        *self.inner.nonce.lock() = nonce;
    }

    /// Removes and returns the stored nonce. Nonces are single-use; a
    /// signed request must own the one it spends.
    pub(crate) fn take_nonce(&self) -> Option<String> {
        self.inner.nonce.lock().take()
    }

    /// The locale sent as `Accept-Language`.
    pub fn locale(&self) -> Option<String> {
        self.inner.locale.lock().clone()
    }

    pub fn set_locale(&self, locale: Option<String>) {
        *self.inner.locale.lock() = locale;
    }

    /// Opens a connection through this session's provider.
    pub(crate) fn connect(&self) -> Box<dyn Connection> {
        self.inner.provider.create_connection(self)
    }

    /// The URL the server advertises for `resource`, or `None` if the
    /// directory does not offer it.
    ///
    /// Fetches the directory if the cache is empty or expired.
    pub fn resource_url(&self, resource: Resource) -> Result<Option<Url>> {
        let snapshot = self.read_directory()?;
        Ok(snapshot.resources.get(&resource).cloned())
    }

    /// Like [`resource_url`](Self::resource_url), but a missing entry is a
    /// protocol error. Used at the point an operation actually needs the
    /// endpoint, so partial directories work until then.
    pub(crate) fn require_resource_url(&self, resource: Resource) -> Result<Url> {
        self.resource_url(resource)?.ok_or_else(|| {
            Error::protocol(format!("server directory does not offer '{resource}'"))
        })
    }

    /// The server metadata. May contain no data, but is never absent.
    pub fn metadata(&self) -> Result<Metadata> {
        let snapshot = self.read_directory()?;
        Ok(snapshot.metadata.clone())
    }

    /// The raw directory document.
    pub fn directory_json(&self) -> Result<Json> {
        let snapshot = self.read_directory()?;
        Ok(snapshot.json.clone())
    }

    /// Creates a [`Challenge`] for the given challenge JSON, dispatched
    /// through the provider's challenge registry.
    pub fn create_challenge(&self, data: Json) -> Result<Challenge> {
        let type_name = data
            .get("type")
            .as_str()
            .map(str::to_owned)
            .unwrap_or_default();

        match self.inner.provider.create_challenge(self, data)? {
            Some(challenge) => Ok(challenge),
            None => Err(Error::protocol(format!(
                "no challenge binding for type '{type_name}'"
            ))),
        }
    }

    /// Returns the cached directory, fetching it when the cache is empty
    /// or expired. The lock is held across the fetch, so only one fetch is
    /// ever in flight; concurrent callers wait and then observe the result.
    fn read_directory(&self) -> Result<Arc<DirectorySnapshot>> {
        let mut guard = self.inner.directory.lock();

        if let Some(snapshot) = guard.as_ref() {
            if snapshot.expires_at > Instant::now() {
                return Ok(Arc::clone(snapshot));
            }
        }

        log::debug!("fetching directory from {}", self.inner.server_uri);
        let json = self
            .inner
            .provider
            .directory(self, &self.inner.server_uri)?;

        let mut resources = HashMap::new();
        for resource in Resource::ALL {
            if let Some(url) = json.get(resource.path()).as_url()? {
                resources.insert(resource, url);
            }
        }

        let metadata = json
            .get("meta")
            .as_object()
            .map(Metadata::new)
            .unwrap_or_else(Metadata::empty);

        let snapshot = Arc::new(DirectorySnapshot {
            resources,
            metadata,
            json,
            expires_at: Instant::now() + DIRECTORY_CACHE_TTL,
        });
        *guard = Some(Arc::clone(&snapshot));

        Ok(snapshot)
    }
}

/// Metadata from the directory's `meta` field.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    data: Json,
}

impl Metadata {
    pub(crate) fn new(data: Json) -> Metadata {
        Metadata { data }
    }

    pub fn empty() -> Metadata {
        Metadata { data: Json::empty() }
    }

    /// URI of the current terms of service.
    pub fn terms_of_service(&self) -> Option<Url> {
        self.data.get("termsOfService").as_url().ok().flatten()
    }

    /// Website of the CA.
    pub fn website(&self) -> Option<Url> {
        self.data.get("website").as_url().ok().flatten()
    }

    /// Hostnames the CA recognizes as referring to itself in CAA records.
    pub fn caa_identities(&self) -> Vec<String> {
        self.data.get("caaIdentities").as_str_array()
    }

    /// Whether newAccount requests must carry an external account binding.
    pub fn external_account_required(&self) -> bool {
        self.data
            .get("externalAccountRequired")
            .as_bool()
            .unwrap_or(false)
    }

    /// The raw `meta` object.
    pub fn json(&self) -> &Json {
        &self.data
    }
}

fn default_locale() -> Option<String> {
    let lang = std::env::var("LANG").ok()?;
    let tag = lang.split(['.', '@']).next()?.trim();
    if tag.is_empty() || tag == "C" || tag == "POSIX" {
        return None;
    }
    Some(tag.replace('_', "-"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::test;

    #[test]
    fn directory_is_fetched_once_within_ttl() {
        let server = test::with_directory_server();
        let session = test::server_session(&server);

        let new_order = session.resource_url(Resource::NewOrder).unwrap().unwrap();
        assert!(new_order.as_str().ends_with("/acme/new-order"));

        // second lookup answers from the cache
        session.resource_url(Resource::NewAccount).unwrap().unwrap();
        let _meta = session.metadata().unwrap();

        assert_eq!(server.directory_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn metadata_is_read_from_the_directory() {
        let server = test::with_directory_server();
        let session = test::server_session(&server);

        let metadata = session.metadata().unwrap();
        assert_eq!(metadata.caa_identities(), vec!["testdir.org".to_owned()]);
        assert!(!metadata.external_account_required());
        assert!(metadata.terms_of_service().is_none());
    }

    #[test]
    fn missing_resource_is_none_until_required() {
        let session = test::session_with_fixture_directory();

        // the fixture directory has no newAuthz entry
        assert!(session.resource_url(Resource::NewAuthz).unwrap().is_none());

        let err = session
            .require_resource_url(Resource::NewAuthz)
            .expect_err("newAuthz is not offered");
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn empty_metadata_is_not_an_error() {
        let session = test::session_with_directory(
            r#"{
                "newNonce": "https://acme.test/acme/new-nonce",
                "newAccount": "https://acme.test/acme/new-acct",
                "newOrder": "https://acme.test/acme/new-order",
                "revokeCert": "https://acme.test/acme/revoke-cert",
                "keyChange": "https://acme.test/acme/key-change"
            }"#,
        );

        let metadata = session.metadata().unwrap();
        assert!(metadata.caa_identities().is_empty());
        assert!(metadata.website().is_none());
    }

    #[test]
    fn unknown_challenge_type_without_fallback_is_rejected() {
        let session = test::session_without_generic_challenges();

        let data = Json::parse(r#"{"type":"proprietary-01","status":"pending"}"#).unwrap();
        let err = session.create_challenge(data).expect_err("no binding");
        assert!(matches!(err, Error::Protocol(_)));
    }
}
