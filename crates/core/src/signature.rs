use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationOutcome {
    Match,
    Mismatch,
}

impl VerificationOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, VerificationOutcome::Match)
    }
}

/// Inputs of a webhook signature.
///
/// `canonical_body` must be byte-identical to what the sender hashed; see
/// [`canonical_body`] for the normalization applied to pasted bodies.
#[derive(Debug, Clone)]
pub struct SignatureMaterial<'a> {
    pub secret: &'a str,
    pub timestamp: &'a str,
    pub event_type: &'a str,
    pub canonical_body: &'a str,
}

impl SignatureMaterial<'_> {
    pub fn digest(&self) -> String {
        sign(
            self.secret,
            self.timestamp,
            self.event_type,
            self.canonical_body,
        )
    }

    pub fn verify(&self, supplied_digest: &str) -> VerificationOutcome {
        verify(
            self.secret,
            self.timestamp,
            self.event_type,
            self.canonical_body,
            supplied_digest,
        )
    }
}

/// Lowercase hex of HMAC-SHA256(secret, timestamp || event_type || canonical_body).
///
/// Fields are concatenated with no separator.
pub fn sign(secret: &str, timestamp: &str, event_type: &str, canonical_body: &str) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts keys of any length");
    };
    mac.update(timestamp.as_bytes());
    mac.update(event_type.as_bytes());
    mac.update(canonical_body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Recompute the digest and compare it with `supplied_digest` byte for byte.
///
/// Hex case matters: an uppercase digest does not match.
pub fn verify(
    secret: &str,
    timestamp: &str,
    event_type: &str,
    canonical_body: &str,
    supplied_digest: &str,
) -> VerificationOutcome {
    let expected = sign(secret, timestamp, event_type, canonical_body);
    if bool::from(expected.as_bytes().ct_eq(supplied_digest.as_bytes())) {
        VerificationOutcome::Match
    } else {
        VerificationOutcome::Mismatch
    }
}

/// Normalize a body the way the backend serializes it before signing.
///
/// A body whose trimmed text starts with `{` is parsed and re-emitted as minified JSON
/// with keys in source order. Anything else is returned unchanged.
pub fn canonical_body(raw: &str) -> Result<String, serde_json::Error> {
    if raw.trim_start().starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        serde_json::to_string(&value)
    } else {
        Ok(raw.to_string())
    }
}
