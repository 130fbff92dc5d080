use async_trait::async_trait;
use payscan_core::models::{IssuedCode, TransferReceipt, WebhookDeliveryRecord, WebhookEndpoint};
use payscan_core::{IdempotencyKey, PaymentInstruction};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Non-success response; `body` is the backend's text, unmodified.
    #[error("{status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One execution request for a parsed instruction.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    #[serde(skip)]
    pub instruction: PaymentInstruction,
    pub code: String,
    pub idempotency_key: IdempotencyKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
}

impl SubmitRequest {
    pub fn new(
        instruction: PaymentInstruction,
        idempotency_key: IdempotencyKey,
        amount_cents: Option<i64>,
    ) -> Self {
        Self {
            code: instruction.source().to_string(),
            instruction,
            idempotency_key,
            amount_cents,
        }
    }
}

/// Ask for a payment link. No amount makes a static link: the payer states the amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateLinkRequest {
    pub amount_cents: Option<i64>,
    pub expires_in_minutes: Option<u32>,
}

/// Ask for a dynamic merchant QR bound to an amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateQrRequest {
    pub amount_cents: i64,
}

#[async_trait]
pub trait PaymentBackend: Send + Sync {
    async fn submit(&self, req: &SubmitRequest) -> BackendResult<TransferReceipt>;
    /// Issue a `LINK:` instruction.
    async fn create_link(&self, req: &CreateLinkRequest) -> BackendResult<IssuedCode>;
    /// Issue a `PAY:` instruction for the calling merchant.
    async fn create_qr(&self, req: &CreateQrRequest) -> BackendResult<IssuedCode>;
}

#[async_trait]
pub trait WebhookBackend: Send + Sync {
    async fn create_endpoint(&self, url: &str, secret: &str) -> BackendResult<WebhookEndpoint>;
    async fn list_endpoints(&self) -> BackendResult<Vec<WebhookEndpoint>>;
    async fn list_deliveries(&self) -> BackendResult<Vec<WebhookDeliveryRecord>>;
    async fn requeue_delivery(&self, delivery_id: &str) -> BackendResult<()>;
    /// Ask the backend to emit a test event to the caller's endpoints.
    async fn send_test(&self) -> BackendResult<()>;
}

pub mod http;
pub mod mock;
pub mod session;
pub mod submit;

pub use session::SessionContext;
pub use submit::{PaymentOutcome, PaymentSubmitter, SubmitError};
