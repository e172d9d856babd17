//! The ACME account resource.

use base64::prelude::*;
use serde_json::Value;
use url::Url;

use crate::{
    error::{Error, Result},
    json::{Json, JsonBuilder},
    jws::{self, AccountKey, Jwk, ProtectedHeader},
    order::{Identifier, Order},
    problem::Problem,
    resource::{Resource, Status},
    session::Session,
};

/// An account with the ACME server.
///
/// Accounts are registered with [`Account::create`]; the account URL the
/// server assigns becomes the session's key identifier and signs every
/// subsequent request. Persist the key PEM and this URL to come back later
/// via [`Account::load_existing`].
#[derive(Clone)]
pub struct Account {
    session: Session,
    location: Url,
    data: Json,
}

impl Account {
    /// Registers an account for the session's key pair, agreeing to the
    /// server's terms of service.
    ///
    /// Safe to call for a key that already has an account; the server then
    /// returns the existing one.
    pub fn create(session: &Session, contact: Option<Vec<String>>) -> Result<Account> {
        let mut claims = JsonBuilder::new();
        if let Some(contact) = contact {
            claims.put("contact", contact);
        }
        claims.put("termsOfServiceAgreed", true);

        Account::register(session, &claims)
    }

    /// Fetches the account already registered for the session's key pair.
    ///
    /// Fails with a server problem if none exists.
    pub fn load_existing(session: &Session) -> Result<Account> {
        let mut claims = JsonBuilder::new();
        claims.put("onlyReturnExisting", true);

        Account::register(session, &claims)
    }

    fn register(session: &Session, claims: &JsonBuilder) -> Result<Account> {
        let url = session.require_resource_url(Resource::NewAccount)?;

        let mut conn = session.connect();
        conn.send_signed_request(&url, claims, session, &[])?;

        let location = conn
            .location()?
            .ok_or_else(|| Error::protocol("newAccount response carries no Location header"))?;
        let data = conn.read_json_response()?;

        log::debug!("account key ID is {location}");
        session.set_key_identifier(Some(location.as_str().to_owned()));

        Ok(Account {
            session: session.clone(),
            location,
            data,
        })
    }

    /// The account URL, which is also the JWS key identifier.
    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn status(&self) -> Status {
        self.data.get("status").as_status()
    }

    /// Contact URLs registered with the account.
    pub fn contacts(&self) -> Vec<String> {
        self.data.get("contact").as_str_array()
    }

    /// The raw account document.
    pub fn json(&self) -> &Json {
        &self.data
    }

    /// Refreshes the account from the server.
    pub fn update(&mut self) -> Result<()> {
        let mut conn = self.session.connect();
        conn.post_as_get(&self.location, &self.session, &[])?;
        self.data = conn.read_json_response()?;

        conn.handle_retry_after("account update deferred")
    }

    /// Deactivates the account. Irreversible.
    pub fn deactivate(&mut self) -> Result<()> {
        let mut claims = JsonBuilder::new();
        claims.put("status", "deactivated");

        let mut conn = self.session.connect();
        conn.send_signed_request(&self.location, &claims, &self.session, &[])?;
        self.data = conn.read_json_response()?;
        Ok(())
    }

    /// Rolls the account over to a new key pair, per [RFC 8555 §7.3.5].
    ///
    /// The inner JWS is signed by the new key (no nonce, `jwk` header); the
    /// outer request is signed by the current key as usual. On success the
    /// session signs with the new key.
    ///
    /// [RFC 8555 §7.3.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.5
    pub fn change_key(&self, new_key: AccountKey) -> Result<()> {
        let url = self.session.require_resource_url(Resource::KeyChange)?;
        let old_key = self.session.key();

        let mut inner_claims = JsonBuilder::new();
        inner_claims.put("account", self.location.as_str());
        inner_claims.put("oldKey", serde_json::to_value(Jwk::try_from(&*old_key)?)?);

        let inner_protected = ProtectedHeader::with_jwk(&new_key, &url, None)?;
        let inner = jws::sign(&new_key, &inner_protected, &inner_claims.to_json_string()?)?;

        // the outer payload is the inner JWS object itself
        let mut claims = JsonBuilder::new();
        if let Value::Object(fields) = serde_json::to_value(&inner)? {
            for (name, value) in fields {
                claims.put(&name, value);
            }
        }

        let mut conn = self.session.connect();
        conn.send_signed_request(&url, &claims, &self.session, &[])?;

        log::debug!("account key rolled over");
        self.session.set_key(new_key);
        Ok(())
    }

    /// Creates a new certificate order for the given identifiers.
    pub fn new_order(&self, identifiers: Vec<Identifier>) -> Result<Order> {
        if identifiers.is_empty() {
            return Err(Error::illegal_argument("order needs at least one identifier"));
        }

        let url = self.session.require_resource_url(Resource::NewOrder)?;

        let mut claims = JsonBuilder::new();
        claims.put("identifiers", serde_json::to_value(&identifiers)?);

        let mut conn = self.session.connect();
        conn.send_signed_request(&url, &claims, &self.session, &[])?;

        let location = conn
            .location()?
            .ok_or_else(|| Error::protocol("newOrder response carries no Location header"))?;
        let data = conn.read_json_response()?;

        Ok(Order::new(self.session.clone(), location, data))
    }

    /// Convenience for the common case: a DNS order with a primary name
    /// and alt names, duplicates removed.
    pub fn new_dns_order(&self, primary_name: &str, alt_names: &[&str]) -> Result<Order> {
        let mut identifiers = Vec::new();
        for domain in std::iter::once(primary_name).chain(alt_names.iter().copied()) {
            if !identifiers.iter().any(|id: &Identifier| id.value == domain) {
                identifiers.push(Identifier::dns(domain));
            }
        }
        self.new_order(identifiers)
    }

    /// Revokes a certificate issued to this account.
    ///
    /// `cert_der` is the end-entity certificate in DER encoding.
    pub fn revoke_certificate(&self, cert_der: &[u8], reason: RevocationReason) -> Result<()> {
        let url = self.session.require_resource_url(Resource::RevokeCert)?;

        let mut claims = JsonBuilder::new();
        claims.put("certificate", BASE64_URL_SAFE_NO_PAD.encode(cert_der));

        match reason {
            // the reason code CRL entry extension SHOULD be absent instead
            // of using the unspecified (0) reasonCode value
            // see <https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1>
            RevocationReason::Unspecified => {}
            reason => {
                claims.put("reason", reason as u64);
            }
        }

        let mut conn = self.session.connect();
        conn.send_signed_request(&url, &claims, &self.session, &[])?;
        Ok(())
    }

    /// The validation error on the account, if the server recorded one.
    pub fn error(&self) -> Option<Problem> {
        self.data.get("error").as_problem()
    }
}

/// Reasons for certificate revocation, from [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://tools.ietf.org/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CACompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // value 7 is not used
    RemoveFromCRL = 8,
    PrivilegeWithdrawn = 9,
    AACompromise = 10,
}
