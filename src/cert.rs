//! The certificate resource, plus CSR and key helpers.

use std::io::{BufReader, Cursor};

use der::{
    asn1::Ia5String,
    time::{OffsetDateTime, PrimitiveDateTime},
    Decode as _,
};
use url::Url;
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
};

use crate::{
    error::{Error, Result},
    session::Session,
};

/// Makes a P-256 private key (from which the public key can be derived).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// Creates a CSR covering `domains`, signed with `signer`.
///
/// The first domain becomes the Common Name; all domains land in a Subject
/// Alternative Name extension.
pub fn create_csr(
    signer: &p256::ecdsa::SigningKey,
    domains: &[&str],
) -> Result<x509_cert::request::CertReq> {
    let primary_domain = domains
        .first()
        .ok_or_else(|| Error::illegal_argument("CSR needs at least one domain"))?;

    let subject = format!("CN={primary_domain}")
        .parse::<Name>()
        .map_err(|err| Error::illegal_argument(format!("invalid subject name: {err}")))?;

    let mut csr = CsrBuilder::new(subject, signer)
        .map_err(|err| Error::illegal_argument(format!("CSR setup failed: {err}")))?;

    let san = domains
        .iter()
        .map(|domain| {
            Ia5String::new(domain)
                .map(GeneralName::DnsName)
                .map_err(|err| Error::illegal_argument(format!("invalid domain '{domain}': {err}")))
        })
        .collect::<Result<Vec<_>>>()?;

    csr.add_extension(&SubjectAltName(san))
        .map_err(|err| Error::illegal_argument(format!("SAN extension failed: {err}")))?;

    csr.build::<p256::ecdsa::DerSignature>()
        .map_err(|err| Error::illegal_argument(format!("CSR signing failed: {err}")))
}

/// The issued certificate of a `valid` order.
///
/// URL-identified like every other resource; the chain is fetched on the
/// first [`download`](Certificate::download) and kept.
#[derive(Clone)]
pub struct Certificate {
    session: Session,
    location: Url,
    chain_pem: Option<String>,
}

impl Certificate {
    pub(crate) fn new(session: Session, location: Url) -> Certificate {
        Certificate {
            session,
            location,
            chain_pem: None,
        }
    }

    /// The certificate URL.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Downloads the certificate chain in PEM format, end-entity
    /// certificate first.
    pub fn download(&mut self) -> Result<String> {
        if let Some(pem) = &self.chain_pem {
            return Ok(pem.clone());
        }

        let mut conn = self.session.connect();
        conn.post_as_get(&self.location, &self.session, &[])?;
        let pem = conn.response_body()?.to_owned();
        self.chain_pem = Some(pem.clone());
        Ok(pem)
    }

    /// The certificate chain in DER encoding, one entry per certificate.
    pub fn certificate_chain(&mut self) -> Result<Vec<Vec<u8>>> {
        let pem = self.download()?;
        let mut reader = BufReader::new(Cursor::new(pem));

        rustls_pemfile::certs(&mut reader)
            .map(|item| item.map(|cert| cert.to_vec()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| Error::protocol(format!("unparsable certificate chain: {err}")))
    }

    /// Counts the number of whole days the certificate is still valid.
    ///
    /// Negative for an expired certificate. How long an issued certificate
    /// lives is the CA's choice; Let's Encrypt issues for 90 days, which
    /// reports as 89 whole days right after issuance.
    pub fn valid_days_left(&mut self) -> Result<i64> {
        let chain = self.certificate_chain()?;
        let end_entity = chain
            .first()
            .ok_or_else(|| Error::protocol("certificate chain is empty"))?;

        let cert = x509_cert::Certificate::from_der(end_entity)
            .map_err(|err| Error::protocol(format!("unparsable certificate: {err}")))?;

        let not_after = cert.tbs_certificate.validity.not_after.to_date_time();
        let not_after = PrimitiveDateTime::try_from(not_after)
            .map_err(|err| Error::protocol(format!("certificate expiry out of range: {err}")))?
            .assume_utc();

        let diff = not_after - OffsetDateTime::now_utc();
        Ok(diff.whole_days())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use der::EncodePem as _;
    use x509_cert::{
        builder::{CertificateBuilder, Profile},
        serial_number::SerialNumber,
        spki::{EncodePublicKey as _, SubjectPublicKeyInfoOwned},
        time::Validity,
    };

    use super::*;
    use crate::test;

    // a real self-signed certificate, so chain inspection has something
    // parseable to work on
    fn self_signed_cert_pem(validity: Duration) -> String {
        let key = create_p256_key();

        let spki_der = key.verifying_key().to_public_key_der().unwrap();
        let spki = SubjectPublicKeyInfoOwned::try_from(spki_der.as_bytes()).unwrap();

        let subject = "CN=acme-test.example.com".parse::<Name>().unwrap();

        let builder = CertificateBuilder::new(
            Profile::Root,
            SerialNumber::from(1u32),
            Validity::from_now(validity).unwrap(),
            subject,
            spki,
            &key,
        )
        .unwrap();

        let cert = builder.build::<p256::ecdsa::DerSignature>().unwrap();
        cert.to_pem(der::pem::LineEnding::LF).unwrap()
    }

    #[test]
    fn csr_covers_all_domains() {
        let key = create_p256_key();
        let csr = create_csr(&key, &["example.com", "www.example.com"]).unwrap();

        let der = der::Encode::to_der(&csr).unwrap();
        assert!(!der.is_empty());
    }

    #[test]
    fn csr_needs_a_domain() {
        let key = create_p256_key();
        assert!(matches!(
            create_csr(&key, &[]),
            Err(Error::IllegalArgument(_))
        ));
    }

    #[test]
    fn valid_days_left_counts_whole_days() {
        let pem = self_signed_cert_pem(Duration::from_secs(90 * 24 * 60 * 60));

        let (session, _requests) = test::scripted_session(vec![test::ok_body(&pem)]);
        let mut certificate = Certificate::new(
            session,
            Url::parse("https://acme.test/acme/cert/1").unwrap(),
        );

        // a freshly issued 90-day certificate has 89 whole days left
        assert_eq!(certificate.valid_days_left().unwrap(), 89);
    }

    #[test]
    fn short_lived_certificate_has_no_whole_days_left() {
        let pem = self_signed_cert_pem(Duration::from_secs(1));

        let (session, _requests) = test::scripted_session(vec![test::ok_body(&pem)]);
        let mut certificate = Certificate::new(
            session,
            Url::parse("https://acme.test/acme/cert/1").unwrap(),
        );

        assert_eq!(certificate.valid_days_left().unwrap(), 0);
    }

    #[test]
    fn chain_splits_into_der_entries() {
        let server = test::with_directory_server();
        let session = test::server_session(&server);
        let account = crate::Account::create(&session, None).unwrap();
        let mut order = account.new_dns_order("acme-test.example.com", &[]).unwrap();

        let key = create_p256_key();
        let csr = create_csr(&key, &["acme-test.example.com"]).unwrap();
        order.finalize(&der::Encode::to_der(&csr).unwrap()).unwrap();
        order.update().unwrap();

        let mut certificate = order.certificate().unwrap();
        let chain = certificate.certificate_chain().unwrap();
        assert_eq!(chain.len(), 1);
        assert!(!chain[0].is_empty());
    }
}
