//! Client core for ACME (Automatic Certificate Management Environment)
//! providers such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! Implements the client side of [RFC 8555]: a [`Session`] talks to one
//! ACME server, proves control over identifiers through [`Challenge`]s,
//! and tracks certificate [`Order`]s through to issuance.
//!
//! # Usage
//!
//! ```no_run
//! use acme_core::{Account, AccountKey, ProviderRegistry, Session, Status};
//!
//! fn main() -> acme_core::Result<()> {
//!     let server = "https://acme-staging-v02.api.letsencrypt.org/directory"
//!         .parse()
//!         .unwrap();
//!     let session = Session::new(server, AccountKey::generate(), &ProviderRegistry::default())?;
//!
//!     let account = Account::create(&session, Some(vec!["mailto:ops@example.com".into()]))?;
//!     let order = account.new_dns_order("example.com", &["www.example.com"])?;
//!
//!     for auth in order.authorizations()? {
//!         if auth.status() == Status::Valid {
//!             continue;
//!         }
//!         let mut challenge = auth.http_challenge().expect("http-01 offered");
//!         // serve challenge.key_authorization()? under
//!         // /.well-known/acme-challenge/<token>, then:
//!         challenge.trigger()?;
//!     }
//!
//!     // poll order/challenge state with update(), finalize with a CSR,
//!     // then download the certificate chain
//!     Ok(())
//! }
//! ```
//!
//! # Blocking and threads
//!
//! Every operation that talks to the server blocks the calling thread; pick
//! your own concurrency model above the library. A single [`Session`] is
//! safe to share between threads. The library never sleeps on its own: when
//! the server asks for a backoff the call fails with
//! [`Error::RetryAfter`] carrying the instant to retry at, and the one
//! automatic recovery is a single retry after a rejected nonce.
//!
//! # Rate limits
//!
//! Public ACME providers enforce [rate limits]. Use the Let's Encrypt
//! staging environment for development; its limits are far more relaxed.
//!
//! [RFC 8555]: https://datatracker.ietf.org/doc/html/rfc8555
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod account;
mod authorization;
mod cert;
mod challenge;
mod error;
mod json;
mod jws;
mod order;
mod problem;
mod provider;
mod resource;
mod session;
mod trans;


pub use crate::{
    account::{Account, RevocationReason},
    authorization::Authorization,
    cert::{create_csr, create_p256_key, Certificate},
    challenge::{Challenge, ChallengeConstructor, ChallengeKind, ChallengeRegistry},
    error::{Error, Result},
    json::{Json, JsonBuilder, JsonValue},
    jws::AccountKey,
    order::{Identifier, Order},
    problem::Problem,
    provider::{AcmeProvider, DefaultProvider, ProviderRegistry},
    resource::{Resource, Status},
    session::{Metadata, Session},
    trans::{Connection, HttpConnection},
};
