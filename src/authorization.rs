//! The authorization resource: proof of control over one identifier.

use time::OffsetDateTime;
use url::Url;

use crate::{
    challenge::{Challenge, ChallengeKind},
    error::{Error, Result},
    json::{Json, JsonBuilder},
    order::Identifier,
    resource::Status,
    session::Session,
};

/// An authorization groups the challenges the server offers for one
/// identifier. The client fulfills and triggers exactly one of them; any
/// single valid challenge validates the whole authorization.
///
/// Authorizations may already be `valid` when the server remembers a
/// recent proof for the same account; check
/// [`status`](Authorization::status) before doing any work.
#[derive(Clone)]
pub struct Authorization {
    session: Session,
    location: Url,
    data: Json,
    challenges: Vec<Challenge>,
}

impl Authorization {
    /// Fetches the authorization at a known URL.
    pub fn bind(session: &Session, location: &Url) -> Result<Authorization> {
        let mut conn = session.connect();
        conn.post_as_get(location, session, &[])?;
        let data = conn.read_json_response()?;

        Authorization::unmarshal(session.clone(), location.clone(), data)
    }

    fn unmarshal(session: Session, location: Url, data: Json) -> Result<Authorization> {
        let challenges = data
            .get("challenges")
            .as_array()
            .into_iter()
            .map(|challenge| session.create_challenge(challenge))
            .collect::<Result<Vec<_>>>()?;

        Ok(Authorization {
            session,
            location,
            data,
            challenges,
        })
    }

    /// The authorization URL, which is also its identity.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// The identifier this authorization is for.
    pub fn identifier(&self) -> Result<Identifier> {
        let identifier = self
            .data
            .get("identifier")
            .as_object()
            .ok_or_else(|| Error::protocol("authorization has no identifier"))?;

        Ok(serde_json::from_value(identifier.value().clone())?)
    }

    pub fn status(&self) -> Status {
        self.data.get("status").as_status()
    }

    /// When this authorization stops being usable.
    pub fn expires(&self) -> Result<Option<OffsetDateTime>> {
        self.data.get("expires").as_instant()
    }

    /// Whether this authorization came from a wildcard domain order.
    pub fn is_wildcard(&self) -> bool {
        self.data.get("wildcard").as_bool().unwrap_or(false)
    }

    /// The challenges the server offers. Complete any one of them.
    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }

    /// The challenge of the given type, if the server offers it.
    pub fn find_challenge(&self, type_name: &str) -> Option<Challenge> {
        self.challenges
            .iter()
            .find(|challenge| challenge.type_name() == type_name)
            .cloned()
    }

    /// The `http-01` challenge, if offered.
    pub fn http_challenge(&self) -> Option<Challenge> {
        self.find_challenge(ChallengeKind::HTTP_01)
    }

    /// The `dns-01` challenge, if offered.
    pub fn dns_challenge(&self) -> Option<Challenge> {
        self.find_challenge(ChallengeKind::DNS_01)
    }

    /// The `tls-alpn-01` challenge, if offered.
    pub fn tls_alpn_challenge(&self) -> Option<Challenge> {
        self.find_challenge(ChallengeKind::TLS_ALPN_01)
    }

    /// The raw authorization document.
    pub fn json(&self) -> &Json {
        &self.data
    }

    /// Refreshes the authorization and its challenge set, surfacing
    /// `Retry-After` after the new state has been applied.
    pub fn update(&mut self) -> Result<()> {
        let mut conn = self.session.connect();
        conn.post_as_get(&self.location, &self.session, &[])?;
        let data = conn.read_json_response()?;

        *self = Authorization::unmarshal(self.session.clone(), self.location.clone(), data)?;

        conn.handle_retry_after("authorization is still being processed")
    }

    /// Deactivates this authorization, per [RFC 8555 §7.5.2].
    ///
    /// [RFC 8555 §7.5.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.5.2
    pub fn deactivate(&mut self) -> Result<()> {
        let mut claims = JsonBuilder::new();
        claims.put("status", "deactivated");

        let mut conn = self.session.connect();
        conn.send_signed_request(&self.location, &claims, &self.session, &[])?;
        let data = conn.read_json_response()?;

        *self = Authorization::unmarshal(self.session.clone(), self.location.clone(), data)?;
        Ok(())
    }
}
