//! HTTP exchanges with the ACME server.
//!
//! A [`Connection`] performs one logical exchange: it signs and sends the
//! request, feeds replay nonces back into the [`Session`], maps problem
//! documents to errors, and keeps the response around for the caller to
//! read. Connections are created through the session's provider, so tests
//! and specialized CAs can substitute their own transport.

use std::time::Duration;

use time::OffsetDateTime;
use url::Url;

use crate::{
    error::{Error, Result},
    json::{Json, JsonBuilder},
    jws::{self, ProtectedHeader},
    problem::Problem,
    resource::Resource,
    session::Session,
};

const CONTENT_TYPE_JOSE: &str = "application/jose+json";
const CONTENT_TYPE_PROBLEM: &str = "application/problem+json";

/// One HTTP exchange with the server.
///
/// All three request modes finish with the response stored in the
/// connection; use [`read_json_response`](Connection::read_json_response)
/// or [`response_body`](Connection::response_body) afterwards.
pub trait Connection {
    /// Unsigned GET. Only the directory is fetched this way.
    ///
    /// Updates the session nonce if the response carries `Replay-Nonce`.
    fn send_request(&mut self, url: &Url, session: &Session) -> Result<u16>;

    /// Signed POST carrying the given claims.
    ///
    /// An empty `allowed` slice accepts any 2xx status. A rejected nonce is
    /// retried once with a fresh one before the error is surfaced.
    fn send_signed_request(
        &mut self,
        url: &Url,
        claims: &JsonBuilder,
        session: &Session,
        allowed: &[u16],
    ) -> Result<u16>;

    /// Authenticated read: signed POST with an empty payload.
    fn post_as_get(&mut self, url: &Url, session: &Session, allowed: &[u16]) -> Result<u16>;

    /// Parses the response body as JSON.
    fn read_json_response(&self) -> Result<Json>;

    /// The raw response body.
    fn response_body(&self) -> Result<&str>;

    /// The `Location` header of the response, if present.
    fn location(&self) -> Result<Option<Url>>;

    /// The `Retry-After` header parsed to an instant, if present.
    fn retry_after(&self) -> Result<Option<OffsetDateTime>>;

    /// Surfaces a `Retry-After` header as [`Error::RetryAfter`].
    ///
    /// Called by `update()` implementations after the body has been
    /// applied, so the caller sees both the new state and the backoff.
    fn handle_retry_after(&self, message: &str) -> Result<()> {
        if let Some(instant) = self.retry_after()? {
            return Err(Error::RetryAfter {
                instant,
                message: message.to_owned(),
            });
        }
        Ok(())
    }
}

/// The default [`Connection`], backed by a blocking ureq agent.
pub struct HttpConnection {
    agent: ureq::Agent,
    last: Option<LastResponse>,
}

#[derive(Debug)]
struct LastResponse {
    status: u16,
    content_type: String,
    location: Option<String>,
    retry_after: Option<String>,
    body: String,
}

impl HttpConnection {
    pub fn new() -> HttpConnection {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(30))
            .build();

        HttpConnection { agent, last: None }
    }

    fn last(&self) -> Result<&LastResponse> {
        self.last
            .as_ref()
            .ok_or_else(|| Error::protocol("no request has been sent on this connection"))
    }

    /// Runs the request and captures the response, feeding any
    /// `Replay-Nonce` back into the session. Non-2xx statuses are captured
    /// rather than raised; status checking happens separately.
    fn execute(
        &mut self,
        req: ureq::Request,
        body: Option<&str>,
        session: &Session,
    ) -> Result<u16> {
        let outcome = match body {
            Some(body) => req.send_string(body),
            None => req.call(),
        };

        let res = match outcome {
            Ok(res) => res,
            Err(ureq::Error::Status(_, res)) => res,
            Err(ureq::Error::Transport(err)) => return Err(err.into()),
        };

        if let Some(nonce) = res.header("replay-nonce") {
            log::trace!("storing fresh nonce");
            session.set_nonce(Some(nonce.to_owned()));
        }

        let status = res.status();
        let content_type = res.content_type().to_owned();
        let location = res.header("location").map(str::to_owned);
        let retry_after = res.header("retry-after").map(str::to_owned);
        let body = safe_read_body(res);

        self.last = Some(LastResponse {
            status,
            content_type,
            location,
            retry_after,
            body,
        });

        Ok(status)
    }

    fn request(&self, method: &str, url: &Url, session: &Session) -> ureq::Request {
        let mut req = self.agent.request(method, url.as_str());
        if let Some(locale) = session.locale() {
            req = req.set("accept-language", &locale);
        }
        req
    }

    /// Gets a nonce for the next signed request: either the one the session
    /// holds, or a fresh one from the newNonce endpoint.
    fn nonce(&mut self, session: &Session) -> Result<String> {
        if let Some(nonce) = session.take_nonce() {
            log::trace!("using session nonce");
            return Ok(nonce);
        }

        let url = session.require_resource_url(Resource::NewNonce)?;
        log::debug!("requesting new nonce from {url}");

        let req = self.request("HEAD", &url, session);
        let res = match req.call() {
            Ok(res) => res,
            Err(ureq::Error::Status(_, res)) => res,
            Err(ureq::Error::Transport(err)) => return Err(err.into()),
        };

        res.header("replay-nonce")
            .map(str::to_owned)
            .ok_or_else(|| Error::protocol("newNonce response carries no Replay-Nonce header"))
    }

    fn signed_post(
        &mut self,
        url: &Url,
        payload: &str,
        session: &Session,
        allowed: &[u16],
    ) -> Result<u16> {
        let mut retried = false;

        loop {
            let nonce = self.nonce(session)?;
            let key = session.key();

            let protected = match session.key_identifier() {
                Some(kid) => ProtectedHeader::with_key_id(&key, &kid, url, nonce),
                None => ProtectedHeader::with_jwk(&key, url, Some(nonce))?,
            };

            let jws = jws::sign(&key, &protected, payload)?;
            let body = serde_json::to_string(&jws)?;

            log::debug!("POST {url}");
            let req = self
                .request("POST", url, session)
                .set("content-type", CONTENT_TYPE_JOSE);
            let status = self.execute(req, Some(&body), session)?;

            // The server may invalidate nonces at any time. One retry with
            // a fresh nonce, then the error is the caller's.
            if !retried && matches!(status, 400 | 409) {
                if let Some(problem) = self.problem() {
                    if problem.is_bad_nonce() {
                        log::debug!("bad nonce, retrying once");
                        retried = true;
                        continue;
                    }
                }
            }

            return self.check_status(allowed);
        }
    }

    /// The response parsed as a problem document, when it is one.
    fn problem(&self) -> Option<Problem> {
        let last = self.last.as_ref()?;
        if last.content_type != CONTENT_TYPE_PROBLEM {
            return None;
        }

        let json = Json::parse(&last.body).unwrap_or_else(|err| {
            let mut fallback = JsonBuilder::new();
            fallback.put("type", "about:blank");
            fallback.put(
                "detail",
                format!("undecodable problem document ({err}): {}", last.body),
            );
            fallback.build()
        });

        Some(Problem::new(json))
    }

    fn check_status(&self, allowed: &[u16]) -> Result<u16> {
        let last = self.last()?;

        let accepted = if allowed.is_empty() {
            (200..300).contains(&last.status)
        } else {
            allowed.contains(&last.status)
        };
        if accepted {
            return Ok(last.status);
        }

        let problem = self.problem().unwrap_or_else(|| {
            let mut fallback = JsonBuilder::new();
            fallback.put("type", "about:blank");
            fallback.put("detail", format!("HTTP {}: {}", last.status, last.body));
            Problem::new(fallback.build())
        });

        if problem.is_bad_nonce() {
            return Err(Error::BadNonce {
                status: last.status,
                problem,
            });
        }

        if problem.is_user_action_required() {
            return Err(Error::UserActionRequired {
                tos: problem.instance(),
                problem,
            });
        }

        Err(Error::Server {
            status: last.status,
            problem,
        })
    }
}

impl Default for HttpConnection {
    fn default() -> Self {
        HttpConnection::new()
    }
}

impl Connection for HttpConnection {
    fn send_request(&mut self, url: &Url, session: &Session) -> Result<u16> {
        log::debug!("GET {url}");
        let req = self.request("GET", url, session);
        self.execute(req, None, session)?;
        self.check_status(&[])
    }

    fn send_signed_request(
        &mut self,
        url: &Url,
        claims: &JsonBuilder,
        session: &Session,
        allowed: &[u16],
    ) -> Result<u16> {
        let payload = claims.to_json_string()?;
        self.signed_post(url, &payload, session, allowed)
    }

    fn post_as_get(&mut self, url: &Url, session: &Session, allowed: &[u16]) -> Result<u16> {
        self.signed_post(url, "", session, allowed)
    }

    fn read_json_response(&self) -> Result<Json> {
        Json::parse(&self.last()?.body)
    }

    fn response_body(&self) -> Result<&str> {
        Ok(&self.last()?.body)
    }

    fn location(&self) -> Result<Option<Url>> {
        match self.last()?.location.as_deref() {
            None => Ok(None),
            Some(value) => Url::parse(value)
                .map(Some)
                .map_err(|err| Error::protocol(format!("invalid Location header: {err}"))),
        }
    }

    fn retry_after(&self) -> Result<Option<OffsetDateTime>> {
        parse_retry_after(self.last()?.retry_after.as_deref())
    }
}

/// Parses a `Retry-After` value, either delta-seconds or an HTTP-date.
fn parse_retry_after(value: Option<&str>) -> Result<Option<OffsetDateTime>> {
    let Some(value) = value else {
        return Ok(None);
    };

    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Ok(Some(
            OffsetDateTime::now_utc() + time::Duration::seconds(secs),
        ));
    }

    let when = httpdate::parse_http_date(value)
        .map_err(|err| Error::protocol(format!("invalid Retry-After header: {err}")))?;
    Ok(Some(OffsetDateTime::from(when)))
}

// Reads the body even when the server closes the TLS connection abruptly
// after sending it.
fn safe_read_body(res: ureq::Response) -> String {
    use std::io::Read as _;

    let mut body = String::new();
    res.into_reader().read_to_string(&mut body).ok();
    body
}
