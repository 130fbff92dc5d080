use super::{BackendError, PaymentBackend, SubmitRequest};
use payscan_core::{IdempotencyKey, IdempotencyKeyFactory, InstructionError, PaymentInstruction, Scheme};
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Malformed(#[from] InstructionError),
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),
    /// Backend text is passed through unchanged; retrying reuses the same key.
    #[error("{0}")]
    SubmissionFailed(#[source] BackendError),
    #[error("no failed submission to retry")]
    NothingToRetry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub transfer_id: String,
    pub status: String,
}

impl fmt::Display for PaymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Paid: {}", self.status)
    }
}

#[derive(Debug, Clone)]
struct PendingSubmission {
    instruction: PaymentInstruction,
    key: IdempotencyKey,
    amount_cents: Option<i64>,
}

fn purpose(scheme: Scheme) -> &'static str {
    match scheme {
        Scheme::Pay => "web-qr",
        Scheme::Link => "web-link",
    }
}

/// Submits parsed instructions so that each user action executes at most once.
///
/// A new [`submit`](Self::submit) always draws a fresh idempotency key. After a failure the
/// attempt is kept, and [`retry`](Self::retry) resends it with the key it was first sent with.
pub struct PaymentSubmitter {
    backend: Arc<dyn PaymentBackend>,
    keys: IdempotencyKeyFactory,
    pending: Mutex<Option<PendingSubmission>>,
}

impl PaymentSubmitter {
    pub fn new(backend: Arc<dyn PaymentBackend>) -> Self {
        Self {
            backend,
            keys: IdempotencyKeyFactory::new(),
            pending: Mutex::new(None),
        }
    }

    /// Parse `raw` and submit it. The backend receives `raw` exactly as given.
    pub async fn submit(
        &self,
        raw: &str,
        amount_cents: Option<i64>,
    ) -> Result<PaymentOutcome, SubmitError> {
        let instruction = PaymentInstruction::parse(raw)?;
        self.submit_instruction(instruction, amount_cents).await
    }

    /// Submit an already parsed instruction (scanned or decoded from an image).
    pub async fn submit_instruction(
        &self,
        instruction: PaymentInstruction,
        amount_cents: Option<i64>,
    ) -> Result<PaymentOutcome, SubmitError> {
        if let Some(amount) = amount_cents.filter(|a| *a <= 0) {
            return Err(SubmitError::InvalidAmount(amount));
        }

        let attempt = PendingSubmission {
            key: self.keys.next(purpose(instruction.scheme())),
            instruction,
            amount_cents,
        };
        self.send(attempt).await
    }

    /// Resend the last failed submission unchanged.
    pub async fn retry(&self) -> Result<PaymentOutcome, SubmitError> {
        let attempt = self
            .lock_pending()
            .clone()
            .ok_or(SubmitError::NothingToRetry)?;
        tracing::info!(idempotency_key = %attempt.key, "retrying submission");
        self.send(attempt).await
    }

    pub fn has_pending_retry(&self) -> bool {
        self.lock_pending().is_some()
    }

    async fn send(&self, attempt: PendingSubmission) -> Result<PaymentOutcome, SubmitError> {
        *self.lock_pending() = Some(attempt.clone());

        let req = SubmitRequest::new(attempt.instruction, attempt.key.clone(), attempt.amount_cents);
        match self.backend.submit(&req).await {
            Ok(receipt) => {
                let mut pending = self.lock_pending();
                if pending.as_ref().map(|p| &p.key) == Some(&attempt.key) {
                    *pending = None;
                }
                Ok(PaymentOutcome {
                    transfer_id: receipt.transfer_id,
                    status: receipt.status,
                })
            }
            Err(err) => {
                tracing::warn!(idempotency_key = %attempt.key, error = %err, "submission failed");
                Err(SubmitError::SubmissionFailed(err))
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingSubmission>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockFailure};

    #[tokio::test]
    async fn pays_and_reports_status() {
        let mock = MockBackend::new();
        let submitter = PaymentSubmitter::new(mock.clone());
        let outcome = submitter.submit("PAY:v1;code=abc", Some(1234)).await.unwrap();
        assert_eq!(outcome.to_string(), "Paid: completed");
        let subs = mock.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].code, "PAY:v1;code=abc");
        assert_eq!(subs[0].amount_cents, Some(1234));
        assert!(subs[0].idempotency_key.starts_with("web-qr-"));
        assert!(!submitter.has_pending_retry());
    }

    #[tokio::test]
    async fn code_is_sent_exactly_as_typed() {
        let mock = MockBackend::new();
        let submitter = PaymentSubmitter::new(mock.clone());
        submitter.submit("PAY:v01;code=abc ", None).await.unwrap();
        let subs = mock.submissions();
        assert_eq!(subs[0].code, "PAY:v01;code=abc ");
    }

    #[tokio::test]
    async fn malformed_input_never_reaches_backend() {
        let mock = MockBackend::new();
        let submitter = PaymentSubmitter::new(mock.clone());
        for raw in ["CARD:v1;code=abc", "PAY:vx;code=abc", "PAY:v1"] {
            let err = submitter.submit(raw, None).await.unwrap_err();
            assert!(matches!(err, SubmitError::Malformed(_)), "{raw}");
        }
        assert!(mock.submissions().is_empty());
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected_locally() {
        let mock = MockBackend::new();
        let submitter = PaymentSubmitter::new(mock.clone());
        let err = submitter.submit("LINK:v1;code=x", Some(0)).await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidAmount(0)));
        assert!(mock.submissions().is_empty());
    }

    #[tokio::test]
    async fn retry_after_lost_response_reuses_key_and_executes_once() {
        let mock = MockBackend::new();
        mock.fail_next_submit(MockFailure::LoseResponse);
        let submitter = PaymentSubmitter::new(mock.clone());

        let err = submitter.submit("PAY:v1;code=abc", None).await.unwrap_err();
        assert!(matches!(err, SubmitError::SubmissionFailed(BackendError::Transport(_))));
        assert!(submitter.has_pending_retry());

        let outcome = submitter.retry().await.unwrap();
        assert_eq!(outcome.status, "completed");

        let subs = mock.submissions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].idempotency_key, subs[1].idempotency_key);
        assert_eq!(mock.executed_transfers(), 1);
        assert!(!submitter.has_pending_retry());
    }

    #[tokio::test]
    async fn rejection_text_is_surfaced_verbatim() {
        let mock = MockBackend::new();
        mock.fail_next_submit(MockFailure::Reject {
            status: 404,
            body: "QR not active".to_string(),
        });
        let submitter = PaymentSubmitter::new(mock);
        let err = submitter.submit("PAY:v1;code=gone", None).await.unwrap_err();
        assert_eq!(err.to_string(), "404: QR not active");
    }

    #[tokio::test]
    async fn new_action_gets_a_fresh_key() {
        let mock = MockBackend::new();
        let submitter = PaymentSubmitter::new(mock.clone());
        submitter.submit("PAY:v1;code=abc", None).await.unwrap();
        submitter.submit("PAY:v1;code=abc", None).await.unwrap();
        let subs = mock.submissions();
        assert_ne!(subs[0].idempotency_key, subs[1].idempotency_key);
        assert_eq!(mock.executed_transfers(), 2);
    }

    #[tokio::test]
    async fn retry_without_failure_is_an_error() {
        let submitter = PaymentSubmitter::new(MockBackend::new());
        assert!(matches!(submitter.retry().await, Err(SubmitError::NothingToRetry)));
    }
}
