//! Challenges and the type registry that binds their JSON to variants.
//!
//! See [RFC 8555 §8] for the challenge model and [RFC 8737] for
//! `tls-alpn-01`.
//!
//! [RFC 8555 §8]: https://datatracker.ietf.org/doc/html/rfc8555#section-8
//! [RFC 8737]: https://datatracker.ietf.org/doc/html/rfc8737

use std::collections::HashMap;

use base64::prelude::*;
use sha2::{Digest as _, Sha256};
use time::OffsetDateTime;
use url::Url;

use crate::{
    error::{Error, Result},
    json::{Json, JsonBuilder},
    problem::Problem,
    resource::Status,
    session::Session,
};

/// The challenge variant, tagged by its RFC type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    /// `http-01`: key authorization served from a well-known path.
    Http01,
    /// `dns-01`: digest of the key authorization in a TXT record.
    Dns01,
    /// `tls-alpn-01`: digest embedded in a validation certificate.
    TlsAlpn01,
    /// Any type without a dedicated variant; carries the type string.
    Generic(String),
}

impl ChallengeKind {
    pub const HTTP_01: &'static str = "http-01";
    pub const DNS_01: &'static str = "dns-01";
    pub const TLS_ALPN_01: &'static str = "tls-alpn-01";

    /// The RFC type string of this variant.
    pub fn type_name(&self) -> &str {
        match self {
            ChallengeKind::Http01 => Self::HTTP_01,
            ChallengeKind::Dns01 => Self::DNS_01,
            ChallengeKind::TlsAlpn01 => Self::TLS_ALPN_01,
            ChallengeKind::Generic(name) => name,
        }
    }

    fn has_token(&self) -> bool {
        !matches!(self, ChallengeKind::Generic(_))
    }
}

/// A server-side challenge object.
///
/// A challenge proves control over an identifier in one specific way. The
/// client picks one challenge of an authorization, provisions the response
/// it demands, and [`trigger`](Challenge::trigger)s it; the server probes
/// and moves the challenge to `valid` or `invalid`.
///
/// ```text
///         trigger()           server
/// PENDING ─────────► PROCESSING ────► VALID
///                                └──► INVALID
/// ```
#[derive(Debug, Clone)]
pub struct Challenge {
    session: Session,
    kind: ChallengeKind,
    data: Json,
}

impl Challenge {
    /// Creates a variant from challenge JSON, verifying that the JSON's
    /// `type` matches the variant.
    pub(crate) fn unmarshal(session: Session, kind: ChallengeKind, data: Json) -> Result<Challenge> {
        let declared = data.get("type").required_str()?;
        if kind.type_name() != declared {
            return Err(Error::protocol(format!(
                "challenge type mismatch: expected '{}', got '{declared}'",
                kind.type_name(),
            )));
        }

        Ok(Challenge {
            session,
            kind,
            data,
        })
    }

    /// Creates an `http-01` challenge from its JSON.
    pub fn http01(session: &Session, data: Json) -> Result<Challenge> {
        Challenge::unmarshal(session.clone(), ChallengeKind::Http01, data)
    }

    /// Creates a `dns-01` challenge from its JSON.
    pub fn dns01(session: &Session, data: Json) -> Result<Challenge> {
        Challenge::unmarshal(session.clone(), ChallengeKind::Dns01, data)
    }

    /// Creates a `tls-alpn-01` challenge from its JSON.
    pub fn tls_alpn01(session: &Session, data: Json) -> Result<Challenge> {
        Challenge::unmarshal(session.clone(), ChallengeKind::TlsAlpn01, data)
    }

    /// Creates a generic challenge, taking the type from the JSON itself.
    pub fn generic(session: &Session, data: Json) -> Result<Challenge> {
        let type_name = data.get("type").required_str()?.to_owned();
        Challenge::unmarshal(session.clone(), ChallengeKind::Generic(type_name), data)
    }

    /// Fetches the challenge at `location` (POST-as-GET) and binds it to
    /// the variant registered for its type.
    ///
    /// Fails with [`Error::IllegalArgument`] when the resource at the URL
    /// is not a challenge, or its type has no binding under the session's
    /// provider.
    pub fn bind(session: &Session, location: &Url) -> Result<Challenge> {
        let mut conn = session.connect();
        conn.post_as_get(location, session, &[])?;
        let data = conn.read_json_response()?;

        if data.get("type").as_str().is_none() {
            return Err(Error::illegal_argument(format!(
                "resource at {location} is not a challenge"
            )));
        }

        session.create_challenge(data).map_err(|err| match err {
            Error::Protocol(msg) => Error::illegal_argument(msg),
            other => other,
        })
    }

    /// The RFC type string, e.g. `"http-01"`.
    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    pub fn kind(&self) -> &ChallengeKind {
        &self.kind
    }

    /// The challenge status. Unknown strings read as [`Status::Unknown`].
    pub fn status(&self) -> Status {
        self.data.get("status").as_status()
    }

    /// The challenge URL, which is also its identity.
    pub fn location(&self) -> Result<Url> {
        self.data.get("url").required_url()
    }

    /// When the server validated this challenge, if it has.
    pub fn validated(&self) -> Result<Option<OffsetDateTime>> {
        self.data.get("validated").as_instant()
    }

    /// The validation error the server recorded, if any.
    pub fn error(&self) -> Option<Problem> {
        self.data.get("error").as_problem()
    }

    /// The raw challenge document.
    pub fn json(&self) -> &Json {
        &self.data
    }

    /// The challenge token.
    pub fn token(&self) -> Result<&str> {
        self.data.get("token").required_str()
    }

    /// The key authorization: `token || '.' || thumbprint(account key)`.
    ///
    /// For `http-01` this is the literal response body to serve. Generic
    /// challenges have no token and therefore no key authorization.
    pub fn key_authorization(&self) -> Result<String> {
        if !self.kind.has_token() {
            return Err(Error::illegal_argument(format!(
                "challenge type '{}' has no key authorization",
                self.type_name(),
            )));
        }
        self.session.key().key_authorization(self.token()?)
    }

    /// The TXT record content for a `dns-01` challenge:
    /// base64url(SHA-256(key authorization)).
    pub fn dns_digest(&self) -> Result<String> {
        if self.kind != ChallengeKind::Dns01 {
            return Err(Error::illegal_argument(format!(
                "'{}' is not a dns-01 challenge",
                self.type_name(),
            )));
        }
        let key_auth = self.key_authorization()?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(key_auth)))
    }

    /// The SHA-256 digest of the key authorization, to be embedded in the
    /// `acmeIdentifier` extension of a `tls-alpn-01` validation cert.
    pub fn tls_alpn_digest(&self) -> Result<[u8; 32]> {
        if self.kind != ChallengeKind::TlsAlpn01 {
            return Err(Error::illegal_argument(format!(
                "'{}' is not a tls-alpn-01 challenge",
                self.type_name(),
            )));
        }
        let key_auth = self.key_authorization()?;
        Ok(Sha256::digest(key_auth).into())
    }

    /// Fills the payload sent when the challenge is triggered.
    ///
    /// All RFC 8555 challenge types respond with the empty object.
    fn prepare_response(&self, _claims: &mut JsonBuilder) {}

    /// Tells the server the challenge response is in place.
    ///
    /// The server moves the challenge to `processing` and starts probing;
    /// poll with [`update`](Challenge::update).
    pub fn trigger(&mut self) -> Result<()> {
        let url = self.location()?;

        let mut claims = JsonBuilder::new();
        self.prepare_response(&mut claims);

        let mut conn = self.session.connect();
        conn.send_signed_request(&url, &claims, &self.session, &[])?;
        self.apply(conn.read_json_response()?)
    }

    /// Refreshes status and error from the server.
    ///
    /// When the response carries `Retry-After`, the state is applied first
    /// and then [`Error::RetryAfter`] is raised with the parsed instant.
    pub fn update(&mut self) -> Result<()> {
        let url = self.location()?;

        let mut conn = self.session.connect();
        conn.post_as_get(&url, &self.session, &[])?;
        self.apply(conn.read_json_response()?)?;

        conn.handle_retry_after("challenge is not completed yet")
    }

    /// Replaces the backing document, re-checking the type tag.
    fn apply(&mut self, data: Json) -> Result<()> {
        let declared = data.get("type").required_str()?;
        if self.kind.type_name() != declared {
            return Err(Error::protocol(format!(
                "server changed challenge type from '{}' to '{declared}'",
                self.kind.type_name(),
            )));
        }
        self.data = data;
        Ok(())
    }
}

/// Constructor for one challenge variant.
pub type ChallengeConstructor = fn(&Session, Json) -> Result<Challenge>;

/// Maps challenge type strings to variant constructors.
///
/// Providers own one of these; [`standard`](ChallengeRegistry::standard)
/// pre-registers the RFC 8555/8737 types and falls back to generic
/// challenges for anything else.
#[derive(Debug)]
pub struct ChallengeRegistry {
    constructors: HashMap<String, ChallengeConstructor>,
    generic_fallback: bool,
}

impl ChallengeRegistry {
    /// A registry with no bindings and no fallback.
    pub fn empty() -> ChallengeRegistry {
        ChallengeRegistry {
            constructors: HashMap::new(),
            generic_fallback: false,
        }
    }

    /// The standard registry: `http-01`, `dns-01`, `tls-alpn-01`, with the
    /// generic fallback enabled.
    pub fn standard() -> ChallengeRegistry {
        let mut registry = ChallengeRegistry::empty();
        registry
            .register(ChallengeKind::HTTP_01, Challenge::http01)
            .register(ChallengeKind::DNS_01, Challenge::dns01)
            .register(ChallengeKind::TLS_ALPN_01, Challenge::tls_alpn01)
            .generic_fallback(true);
        registry
    }

    /// Binds a type string to a constructor, replacing any previous
    /// binding.
    pub fn register(&mut self, type_name: &str, constructor: ChallengeConstructor) -> &mut Self {
        self.constructors.insert(type_name.to_owned(), constructor);
        self
    }

    /// Whether unknown types produce generic challenges instead of `None`.
    pub fn generic_fallback(&mut self, enabled: bool) -> &mut Self {
        self.generic_fallback = enabled;
        self
    }

    /// Creates the challenge bound to the JSON's `type`.
    ///
    /// `Ok(None)` means the type is unknown and no fallback is enabled.
    /// JSON without a `type` field fails.
    pub fn create(&self, session: &Session, data: Json) -> Result<Option<Challenge>> {
        let type_name = data.get("type").required_str()?;

        if let Some(constructor) = self.constructors.get(type_name) {
            return constructor(session, data).map(Some);
        }

        if self.generic_fallback {
            return Challenge::generic(session, data).map(Some);
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{self, fixtures};

    #[test]
    fn bind_dispatches_to_the_typed_variant() {
        // S1: server returns a valid http-01 challenge
        let (session, requests) =
            test::scripted_session(vec![test::ok_json(fixtures::UPDATE_HTTP_CHALLENGE)]);
        let location = Url::parse("https://example.com/acme/some-location").unwrap();

        let challenge = Challenge::bind(&session, &location).unwrap();

        assert_eq!(challenge.kind(), &ChallengeKind::Http01);
        assert_eq!(challenge.type_name(), "http-01");
        assert_eq!(challenge.status(), Status::Valid);
        assert_eq!(challenge.location().unwrap(), location);
        assert_eq!(challenge.token().unwrap(), "IlirfxKKXAsHtmzK29Pj8A");

        let sent = requests.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, location);
        // POST-as-GET carries no claims
        assert_eq!(sent[0].payload, None);
    }

    #[test]
    fn unmarshal_reads_all_properties() {
        // S2: generic challenge with a validation error
        let session = test::offline_session();
        let challenge = Challenge::generic(
            &session,
            Json::parse(fixtures::GENERIC_CHALLENGE).unwrap(),
        )
        .unwrap();

        assert_eq!(challenge.type_name(), "generic-01");
        assert_eq!(challenge.status(), Status::Invalid);
        assert_eq!(
            challenge.location().unwrap().as_str(),
            "http://example.com/challenge/123"
        );

        let validated = challenge.validated().unwrap().unwrap();
        assert_eq!(validated.year(), 2015);
        assert_eq!(validated.nanosecond(), 336_785_823);

        let error = challenge.error().expect("error is populated");
        assert_eq!(
            error.type_uri(),
            Some("urn:ietf:params:acme:error:incorrectResponse")
        );
        assert_eq!(error.detail(), Some("bad token"));
        assert_eq!(
            error.instance().unwrap().as_str(),
            "http://example.com/documents/faq.html"
        );

        assert_eq!(challenge.json().get("type").as_str(), Some("generic-01"));
        assert!(challenge.json().get("notPresent").as_str().is_none());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let session = test::offline_session();
        let dns_json = Json::parse(fixtures::DNS_CHALLENGE).unwrap();

        let err = Challenge::http01(&session, dns_json).expect_err("dns-01 is not http-01");
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn non_challenge_json_does_not_unmarshal() {
        // S6: an account document is not a challenge
        let session = test::offline_session();
        let account_json = Json::parse(fixtures::ACCOUNT).unwrap();

        let err = Challenge::generic(&session, account_json).expect_err("no type field");
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn bind_rejects_non_challenge_resources() {
        // S5/testBadBind: location resolves to an account document
        let (session, _requests) = test::scripted_session(vec![test::ok_json(fixtures::ACCOUNT)]);
        let location = Url::parse("https://example.com/acme/some-location").unwrap();

        let err = Challenge::bind(&session, &location).expect_err("not a challenge");
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[test]
    fn trigger_posts_empty_claims_and_applies_state() {
        // S3: trigger moves the challenge along, location is preserved
        let (session, requests) =
            test::scripted_session(vec![test::ok_json(fixtures::TRIGGER_HTTP_CHALLENGE_RESPONSE)]);

        let mut challenge = Challenge::http01(
            &session,
            Json::parse(fixtures::TRIGGER_HTTP_CHALLENGE).unwrap(),
        )
        .unwrap();

        challenge.trigger().unwrap();

        assert_eq!(challenge.status(), Status::Pending);
        assert_eq!(
            challenge.location().unwrap().as_str(),
            "https://example.com/acme/some-location"
        );

        let sent = requests.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.as_deref(), Some("{}"));
    }

    #[test]
    fn update_refreshes_status() {
        let (session, _requests) =
            test::scripted_session(vec![test::ok_json(fixtures::UPDATE_HTTP_CHALLENGE)]);

        let mut challenge = Challenge::http01(
            &session,
            Json::parse(fixtures::TRIGGER_HTTP_CHALLENGE_RESPONSE).unwrap(),
        )
        .unwrap();
        assert_eq!(challenge.status(), Status::Pending);

        challenge.update().unwrap();
        assert_eq!(challenge.status(), Status::Valid);
    }

    #[test]
    fn update_surfaces_retry_after_but_applies_the_body() {
        // S4: Retry-After is raised after the state is applied
        let retry_at = OffsetDateTime::now_utc() + time::Duration::seconds(30);
        let (session, _requests) = test::scripted_session(vec![test::ok_json_with_retry_after(
            fixtures::UPDATE_HTTP_CHALLENGE,
            retry_at,
        )]);

        let mut challenge = Challenge::http01(
            &session,
            Json::parse(fixtures::TRIGGER_HTTP_CHALLENGE_RESPONSE).unwrap(),
        )
        .unwrap();

        let err = challenge.update().expect_err("Retry-After must surface");
        assert_eq!(err.retry_after(), Some(retry_at));

        // the body was still applied
        assert_eq!(challenge.status(), Status::Valid);
    }

    #[test]
    fn registry_binds_known_types_and_falls_back() {
        let session = test::offline_session();
        let registry = ChallengeRegistry::standard();

        let http = registry
            .create(&session, Json::parse(fixtures::TRIGGER_HTTP_CHALLENGE).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(http.kind(), &ChallengeKind::Http01);

        let dns = registry
            .create(&session, Json::parse(fixtures::DNS_CHALLENGE).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(dns.kind(), &ChallengeKind::Dns01);

        let unknown = registry
            .create(
                &session,
                Json::parse(r#"{"type":"quantum-01","status":"pending"}"#).unwrap(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(unknown.kind(), &ChallengeKind::Generic("quantum-01".into()));
        assert_eq!(unknown.status(), Status::Pending);
    }

    #[test]
    fn registry_without_fallback_returns_none() {
        let session = test::offline_session();
        let mut registry = ChallengeRegistry::empty();
        registry.register(ChallengeKind::HTTP_01, Challenge::http01);

        let result = registry
            .create(
                &session,
                Json::parse(r#"{"type":"quantum-01","status":"pending"}"#).unwrap(),
            )
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn key_authorization_forms() {
        let session = test::offline_session();
        let key = session.key();

        let http = Challenge::http01(
            &session,
            Json::parse(fixtures::TRIGGER_HTTP_CHALLENGE).unwrap(),
        )
        .unwrap();
        let expected = key.key_authorization(http.token().unwrap()).unwrap();
        assert_eq!(http.key_authorization().unwrap(), expected);

        let dns = Challenge::dns01(&session, Json::parse(fixtures::DNS_CHALLENGE).unwrap()).unwrap();
        let key_auth = dns.key_authorization().unwrap();
        let expected_digest = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(key_auth));
        assert_eq!(dns.dns_digest().unwrap(), expected_digest);

        // digest forms are gated by variant
        assert!(matches!(
            http.dns_digest(),
            Err(Error::IllegalArgument(_))
        ));
        assert!(matches!(
            dns.tls_alpn_digest(),
            Err(Error::IllegalArgument(_))
        ));

        let generic = Challenge::generic(
            &session,
            Json::parse(fixtures::GENERIC_CHALLENGE).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            generic.key_authorization(),
            Err(Error::IllegalArgument(_))
        ));
    }
}
