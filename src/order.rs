//! The certificate order resource.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::{
    authorization::Authorization,
    cert::Certificate,
    error::{Error, Result},
    json::{Json, JsonBuilder},
    problem::Problem,
    resource::Status,
    session::Session,
};

/// An identifier a certificate is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    /// A DNS identifier for the given domain name.
    pub fn dns(value: &str) -> Identifier {
        Identifier {
            kind: "dns".to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn is_dns(&self) -> bool {
        self.kind == "dns"
    }
}

/// An order tracks a certificate request through to issuance.
///
/// Lifecycle per [RFC 8555 §7.1.6]: `pending` until every authorization is
/// valid, then `ready` for [`finalize`](Order::finalize), `processing`
/// while the server issues, and `valid` once the certificate can be
/// downloaded. The library never sleeps; poll with
/// [`update`](Order::update) at a pace of your choosing.
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone)]
pub struct Order {
    session: Session,
    location: Url,
    data: Json,
}

impl Order {
    pub(crate) fn new(session: Session, location: Url, data: Json) -> Order {
        Order {
            session,
            location,
            data,
        }
    }

    /// Fetches the order at a known URL.
    pub fn bind(session: &Session, location: &Url) -> Result<Order> {
        let mut conn = session.connect();
        conn.post_as_get(location, session, &[])?;
        let data = conn.read_json_response()?;

        Ok(Order {
            session: session.clone(),
            location: location.clone(),
            data,
        })
    }

    /// The order URL, which is also its identity.
    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn status(&self) -> Status {
        self.data.get("status").as_status()
    }

    /// When the server considers this order stale.
    pub fn expires(&self) -> Result<Option<OffsetDateTime>> {
        self.data.get("expires").as_instant()
    }

    /// The identifiers this order covers.
    pub fn identifiers(&self) -> Result<Vec<Identifier>> {
        self.data
            .get("identifiers")
            .as_array()
            .into_iter()
            .map(|item| serde_json::from_value(item.value().clone()).map_err(Error::from))
            .collect()
    }

    /// URLs of the authorizations to complete before finalizing.
    pub fn authorization_urls(&self) -> Result<Vec<Url>> {
        self.data
            .get("authorizations")
            .as_str_array()
            .iter()
            .map(|entry| {
                Url::parse(entry)
                    .map_err(|err| Error::protocol(format!("invalid authorization URL: {err}")))
            })
            .collect()
    }

    /// Fetches every authorization of this order.
    ///
    /// Already-valid authorizations may be among them when the server
    /// remembers earlier proofs; check each authorization's status.
    pub fn authorizations(&self) -> Result<Vec<Authorization>> {
        self.authorization_urls()?
            .iter()
            .map(|url| Authorization::bind(&self.session, url))
            .collect()
    }

    /// The error the server recorded on this order, if any.
    pub fn error(&self) -> Option<Problem> {
        self.data.get("error").as_problem()
    }

    /// The raw order document.
    pub fn json(&self) -> &Json {
        &self.data
    }

    /// Refreshes the order from the server, surfacing `Retry-After` after
    /// the new state has been applied.
    pub fn update(&mut self) -> Result<()> {
        let mut conn = self.session.connect();
        conn.post_as_get(&self.location, &self.session, &[])?;
        self.data = conn.read_json_response()?;

        conn.handle_retry_after("order is still being processed")
    }

    /// Submits the CSR, asking the server to issue.
    ///
    /// `csr_der` is the DER encoding of a PKCS#10 request covering exactly
    /// this order's identifiers (see [`create_csr`](crate::create_csr)).
    /// The order state is updated from the response; issuance usually
    /// continues asynchronously in `processing`.
    pub fn finalize(&mut self, csr_der: &[u8]) -> Result<()> {
        let finalize_url = self.data.get("finalize").required_url()?;

        let mut claims = JsonBuilder::new();
        claims.put("csr", BASE64_URL_SAFE_NO_PAD.encode(csr_der));

        let mut conn = self.session.connect();
        conn.send_signed_request(&finalize_url, &claims, &self.session, &[])?;
        self.data = conn.read_json_response()?;
        Ok(())
    }

    /// The issued certificate, once the order is `valid`.
    pub fn certificate(&self) -> Result<Certificate> {
        let url = self.data.get("certificate").required_url().map_err(|_| {
            Error::illegal_argument("order has no certificate yet; finalize and poll first")
        })?;

        Ok(Certificate::new(self.session.clone(), url))
    }
}
