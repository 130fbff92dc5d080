use payscan_core::signature::canonical_body;
use payscan_core::{SignatureMaterial, VerificationOutcome};
use serde::Serialize;

/// Values received alongside a delivery (`X-Webhook-Ts`, `X-Webhook-Event`, body, `X-Webhook-Sign`).
#[derive(Debug, Clone, Default)]
pub struct DeliverySignature {
    pub timestamp: String,
    pub event_type: String,
    pub body: String,
    pub supplied: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureCheck {
    pub expected: String,
    /// `None` when no digest was supplied to compare against.
    pub outcome: Option<VerificationOutcome>,
}

impl SignatureCheck {
    pub fn is_verified(&self) -> bool {
        self.outcome.map_or(false, |o| o.is_match())
    }

    /// Short result word used in audit records and command output.
    pub fn label(&self) -> &'static str {
        match self.outcome {
            Some(VerificationOutcome::Match) => "match",
            Some(VerificationOutcome::Mismatch) => "mismatch",
            None => "computed",
        }
    }
}

pub fn check_signature(
    secret: &str,
    sig: &DeliverySignature,
) -> Result<SignatureCheck, serde_json::Error> {
    let body = canonical_body(&sig.body)?;
    let material = SignatureMaterial {
        secret,
        timestamp: &sig.timestamp,
        event_type: &sig.event_type,
        canonical_body: &body,
    };
    let outcome = sig
        .supplied
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|supplied| material.verify(supplied));
    Ok(SignatureCheck {
        expected: material.digest(),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use payscan_core::signature;

    fn delivery(body: &str, supplied: Option<String>) -> DeliverySignature {
        DeliverySignature {
            timestamp: "1700000000".into(),
            event_type: "webhook.test".into(),
            body: body.into(),
            supplied,
        }
    }

    #[test]
    fn pretty_body_verifies_against_minified_signature() {
        let minified = r#"{"type":"webhook.test","data":{"x":1}}"#;
        let digest = signature::sign("sek", "1700000000", "webhook.test", minified);
        let pretty = "{ \"type\": \"webhook.test\",\n \"data\": {\"x\": 1} }";

        let check = check_signature("sek", &delivery(pretty, Some(digest.clone()))).unwrap();
        assert_eq!(check.expected, digest);
        assert_eq!(check.outcome, Some(VerificationOutcome::Match));
        assert!(check.is_verified());
    }

    #[test]
    fn wrong_secret_is_a_mismatch_not_an_error() {
        let digest = signature::sign("sek", "1700000000", "webhook.test", "{}");
        let check = check_signature("other", &delivery("{}", Some(digest))).unwrap();
        assert_eq!(check.outcome, Some(VerificationOutcome::Mismatch));
        assert!(!check.is_verified());
    }

    #[test]
    fn missing_digest_only_computes() {
        let check = check_signature("sek", &delivery("{}", Some(String::new()))).unwrap();
        assert_eq!(check.outcome, None);
        assert_eq!(check.expected.len(), 64);
        assert_eq!(check.label(), "computed");
    }

    #[test]
    fn label_names_each_outcome() {
        let digest = signature::sign("sek", "1700000000", "webhook.test", "{}");
        let good = check_signature("sek", &delivery("{}", Some(digest.clone()))).unwrap();
        let bad = check_signature("sek", &delivery("{}", Some(digest.to_uppercase()))).unwrap();
        assert_eq!(good.label(), "match");
        assert_eq!(bad.label(), "mismatch");
    }
}
