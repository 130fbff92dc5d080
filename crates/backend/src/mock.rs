use super::{
    BackendError, BackendResult, CreateLinkRequest, CreateQrRequest, PaymentBackend, SubmitRequest,
    WebhookBackend,
};
use async_trait::async_trait;
use chrono::Utc;
use payscan_core::models::{
    DeliveryStatus, IssuedCode, TransferReceipt, WebhookDeliveryRecord, WebhookEndpoint,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{sleep, Duration};

/// Codes with this prefix behave like static QRs and links: the payer states the amount.
pub const STATIC_CODE_PREFIX: &str = "static";

/// Longest link lifetime the backend accepts (one week).
pub const MAX_LINK_MINUTES: u32 = 10_080;

/// Dynamic merchant QRs expire after this long.
const QR_LIFETIME_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Reject without executing.
    Reject { status: u16, body: String },
    /// Execute, then drop the response on the floor.
    LoseResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub code: String,
    pub idempotency_key: String,
    pub amount_cents: Option<i64>,
}

#[derive(Default)]
struct MockState {
    transfers: HashMap<String, TransferReceipt>,
    submissions: Vec<SubmissionRecord>,
    submit_failures: VecDeque<MockFailure>,
    endpoints: Vec<WebhookEndpoint>,
    deliveries: Vec<WebhookDeliveryRecord>,
    requeued: Vec<String>,
    list_failures: u32,
    list_calls: u32,
    issued: Vec<IssuedCode>,
}

/// In-memory backend; deduplicates submissions by idempotency key like the real one.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    latency: Duration,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }

    pub fn fail_next_submit(&self, failure: MockFailure) {
        self.state().submit_failures.push_back(failure);
    }

    pub fn fail_next_lists(&self, count: u32) {
        self.state().list_failures += count;
    }

    pub fn seed_endpoint(&self, endpoint: WebhookEndpoint) {
        self.state().endpoints.push(endpoint);
    }

    pub fn seed_delivery(&self, delivery: WebhookDeliveryRecord) {
        self.state().deliveries.push(delivery);
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state().submissions.clone()
    }

    /// Number of distinct transfers actually executed.
    pub fn executed_transfers(&self) -> usize {
        self.state().transfers.len()
    }

    pub fn requeued(&self) -> Vec<String> {
        self.state().requeued.clone()
    }

    /// Links and QRs handed out so far, oldest first.
    pub fn issued(&self) -> Vec<IssuedCode> {
        self.state().issued.clone()
    }

    fn issue(&self, code: String, expires_in_minutes: Option<i64>) -> IssuedCode {
        let issued = IssuedCode {
            code,
            expires_at: expires_in_minutes
                .map(|m| (Utc::now() + chrono::Duration::minutes(m)).to_rfc3339()),
        };
        self.state().issued.push(issued.clone());
        issued
    }

    pub fn list_calls(&self) -> u32 {
        self.state().list_calls
    }

    fn take_list_failure(state: &mut MockState) -> BackendResult<()> {
        state.list_calls += 1;
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(BackendError::Rejected {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentBackend for MockBackend {
    async fn submit(&self, req: &SubmitRequest) -> BackendResult<TransferReceipt> {
        self.simulate_latency().await;
        let mut state = self.state();
        state.submissions.push(SubmissionRecord {
            code: req.code.clone(),
            idempotency_key: req.idempotency_key.to_string(),
            amount_cents: req.amount_cents,
        });

        if let Some(existing) = state.transfers.get(req.idempotency_key.as_str()) {
            return Ok(existing.clone());
        }

        let failure = state.submit_failures.pop_front();
        if let Some(MockFailure::Reject { status, body }) = failure {
            return Err(BackendError::Rejected { status, body });
        }

        if req.instruction.code().starts_with(STATIC_CODE_PREFIX) && req.amount_cents.is_none() {
            return Err(BackendError::Rejected {
                status: 400,
                body: "Amount required for static code".to_string(),
            });
        }

        let receipt = TransferReceipt {
            transfer_id: uuid::Uuid::new_v4().to_string(),
            status: "completed".to_string(),
        };
        state
            .transfers
            .insert(req.idempotency_key.to_string(), receipt.clone());

        match failure {
            Some(MockFailure::LoseResponse) => {
                Err(BackendError::Transport("connection reset by peer".to_string()))
            }
            _ => Ok(receipt),
        }
    }

    async fn create_link(&self, req: &CreateLinkRequest) -> BackendResult<IssuedCode> {
        self.simulate_latency().await;
        if matches!(req.amount_cents, Some(a) if a <= 0) {
            return Err(BackendError::Rejected {
                status: 422,
                body: "amount_cents must be positive".to_string(),
            });
        }
        if matches!(req.expires_in_minutes, Some(m) if m == 0 || m > MAX_LINK_MINUTES) {
            return Err(BackendError::Rejected {
                status: 422,
                body: format!("expires_in_minutes must be between 1 and {MAX_LINK_MINUTES}"),
            });
        }
        let token = uuid::Uuid::new_v4().simple();
        let code = match req.amount_cents {
            Some(_) => format!("LINK:v1;code={token}"),
            None => format!("LINK:v1;code={STATIC_CODE_PREFIX}-{token}"),
        };
        Ok(self.issue(code, req.expires_in_minutes.map(i64::from)))
    }

    async fn create_qr(&self, req: &CreateQrRequest) -> BackendResult<IssuedCode> {
        self.simulate_latency().await;
        if req.amount_cents <= 0 {
            return Err(BackendError::Rejected {
                status: 422,
                body: "amount_cents must be positive".to_string(),
            });
        }
        let code = format!("PAY:v1;code={}", uuid::Uuid::new_v4().simple());
        Ok(self.issue(code, Some(QR_LIFETIME_MINUTES)))
    }
}

#[async_trait]
impl WebhookBackend for MockBackend {
    async fn create_endpoint(&self, url: &str, _secret: &str) -> BackendResult<WebhookEndpoint> {
        self.simulate_latency().await;
        let endpoint = WebhookEndpoint {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            active: true,
            created_at: Some(Utc::now().to_rfc3339()),
        };
        self.state().endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn list_endpoints(&self) -> BackendResult<Vec<WebhookEndpoint>> {
        self.simulate_latency().await;
        let mut state = self.state();
        Self::take_list_failure(&mut state)?;
        Ok(state.endpoints.clone())
    }

    async fn list_deliveries(&self) -> BackendResult<Vec<WebhookDeliveryRecord>> {
        self.simulate_latency().await;
        let state = self.state();
        Ok(state.deliveries.clone())
    }

    async fn requeue_delivery(&self, delivery_id: &str) -> BackendResult<()> {
        self.simulate_latency().await;
        let mut state = self.state();
        let delivery = state
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery_id)
            .ok_or_else(|| BackendError::Rejected {
                status: 404,
                body: "Not found".to_string(),
            })?;
        delivery.status = DeliveryStatus::Pending;
        delivery.attempt_count += 1;
        state.requeued.push(delivery_id.to_string());
        Ok(())
    }

    async fn send_test(&self) -> BackendResult<()> {
        self.simulate_latency().await;
        let mut state = self.state();
        let targets: Vec<String> = state
            .endpoints
            .iter()
            .filter(|e| e.active)
            .map(|e| e.id.clone())
            .collect();
        if targets.is_empty() {
            return Err(BackendError::Rejected {
                status: 400,
                body: "No active endpoints".to_string(),
            });
        }
        for endpoint_id in targets {
            state.deliveries.push(WebhookDeliveryRecord {
                id: uuid::Uuid::new_v4().to_string(),
                endpoint_id,
                event_type: "webhook.test".to_string(),
                status: DeliveryStatus::Delivered,
                attempt_count: 1,
                created_at: Utc::now().to_rfc3339(),
            });
        }
        Ok(())
    }
}
