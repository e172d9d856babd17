//! Account keys and the JWS envelope, per [RFC 8555 §6.2].
//!
//! [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2

use base64::prelude::*;
use p256::ecdsa::signature::Signer as _;
use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use url::Url;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// The account key pair used to sign requests.
///
/// Elliptic curve P-256; signed requests carry the `ES256` algorithm.
#[derive(Debug, Clone)]
pub struct AccountKey {
    signing_key: p256::ecdsa::SigningKey,
}

impl AccountKey {
    /// Generates a fresh P-256 key.
    pub fn generate() -> AccountKey {
        AccountKey {
            signing_key: crate::cert::create_p256_key(),
        }
    }

    /// Reads a key from a PKCS#8 PEM string.
    pub fn from_pem(pem: &str) -> Result<AccountKey> {
        let signing_key = ecdsa::SigningKey::<p256::NistP256>::from_pkcs8_pem(pem)
            .map_err(|err| Error::illegal_argument(format!("unreadable private key: {err}")))?;
        Ok(AccountKey { signing_key })
    }

    pub fn from_key(signing_key: p256::ecdsa::SigningKey) -> AccountKey {
        AccountKey { signing_key }
    }

    /// Exports the key as PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        self.signing_key
            .to_pkcs8_pem(pkcs8::LineEnding::LF)
            .map_err(|err| Error::protocol(format!("private key export failed: {err}")))
    }

    pub fn signing_key(&self) -> &p256::ecdsa::SigningKey {
        &self.signing_key
    }

    /// The JWS algorithm for this key type.
    pub fn alg(&self) -> &'static str {
        "ES256"
    }

    /// The base64url-encoded SHA-256 thumbprint of the public key, per
    /// [RFC 7638].
    ///
    /// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::try_from(self)?;
        let thumb = JwkThumb::from(&jwk);
        let canonical = serde_json::to_string(&thumb)?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(canonical)))
    }

    /// The key authorization for a challenge token:
    /// `token || '.' || thumbprint`.
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        Ok(format!("{token}.{}", self.thumbprint()?))
    }
}

/// JWS protected header.
///
/// For newAccount requests (and revokeCert requests authenticated by the
/// certificate key) the header carries `jwk`; all other requests carry the
/// account URL as `kid`. The two fields are mutually exclusive.
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct ProtectedHeader {
    alg: String,

    /// Anti-replay token. Absent only in the inner JWS of a key rollover.
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,

    url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    pub(crate) fn with_jwk(key: &AccountKey, url: &Url, nonce: Option<String>) -> Result<Self> {
        Ok(ProtectedHeader {
            alg: key.alg().to_owned(),
            url: url.as_str().to_owned(),
            nonce,
            jwk: Some(Jwk::try_from(key)?),
            ..Default::default()
        })
    }

    pub(crate) fn with_key_id(key: &AccountKey, kid: &str, url: &Url, nonce: String) -> Self {
        ProtectedHeader {
            alg: key.alg().to_owned(),
            url: url.as_str().to_owned(),
            nonce: Some(nonce),
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }
}

/// Public key in JWK encoding.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl TryFrom<&AccountKey> for Jwk {
    type Error = Error;

    fn try_from(key: &AccountKey) -> Result<Self> {
        let point = key.signing_key().verifying_key().to_encoded_point(false);

        let x = point
            .x()
            .ok_or_else(|| Error::protocol("public key has no x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| Error::protocol("public key has no y coordinate"))?;

        Ok(Jwk {
            alg: key.alg().to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: BASE64_URL_SAFE_NO_PAD.encode(x),
            y: BASE64_URL_SAFE_NO_PAD.encode(y),
        })
    }
}

// RFC 7638 hashes the required JWK members sorted lexicographically with
// no whitespace, and serde writes struct fields in declaration order, so
// the field order below is load-bearing.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(jwk: &Jwk) -> Self {
        JwkThumb {
            crv: jwk.crv.clone(),
            kty: jwk.kty.clone(),
            x: jwk.x.clone(),
            y: jwk.y.clone(),
        }
    }
}

/// Flattened JSON serialization of a JWS, per [RFC 7515 §7.2.2].
///
/// [RFC 7515 §7.2.2]: https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJws {
    protected: String,
    payload: String,
    signature: String,
}

/// Signs `payload` under the given protected header.
///
/// An empty `payload` string stays empty in the envelope; this is the
/// POST-as-GET form, not the base64url of `""`.
pub(crate) fn sign(
    key: &AccountKey,
    protected: &ProtectedHeader,
    payload: &str,
) -> Result<FlattenedJws> {
    let protected_b64 = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_string(protected)?);

    let payload_b64 = if payload.is_empty() {
        String::new()
    } else {
        BASE64_URL_SAFE_NO_PAD.encode(payload)
    };

    let to_sign = format!("{protected_b64}.{payload_b64}");
    let signature: p256::ecdsa::Signature = key.signing_key().sign(to_sign.as_bytes());

    Ok(FlattenedJws {
        protected: protected_b64,
        payload: payload_b64,
        signature: BASE64_URL_SAFE_NO_PAD.encode(signature.to_bytes()),
    })
}
