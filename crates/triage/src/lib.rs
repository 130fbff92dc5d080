mod audit;
mod filter;
mod verify;

pub use audit::{AuditEvent, AuditLog};
pub use filter::DeliveryFilter;
pub use verify::{check_signature, DeliverySignature, SignatureCheck};

use backend::{BackendError, WebhookBackend};
use chrono::{DateTime, Utc};
use payscan_core::models::{WebhookDeliveryRecord, WebhookEndpoint};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("body is not valid JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// Last fetched state. Replaced wholesale on each successful refresh.
#[derive(Debug, Clone, Default)]
pub struct TriageSnapshot {
    pub endpoints: Vec<WebhookEndpoint>,
    pub deliveries: Vec<WebhookDeliveryRecord>,
    pub last_error: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

struct Shared {
    backend: Arc<dyn WebhookBackend>,
    snapshot: RwLock<TriageSnapshot>,
    filter: RwLock<DeliveryFilter>,
    // Auto-refresh liveness: a poll only publishes if this still matches its own value.
    poll_generation: AtomicU64,
    audit: Option<AuditLog>,
}

impl Shared {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, TriageSnapshot> {
        self.snapshot.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TriageSnapshot> {
        self.snapshot.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Invalidate every running poll. Once this returns, no older poll can publish.
    fn next_poll_generation(&self) -> u64 {
        let _publishing = self.write();
        self.poll_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_live(&self, gate: Option<u64>) -> bool {
        gate.map_or(true, |g| self.poll_generation.load(Ordering::SeqCst) == g)
    }

    async fn refresh(&self, gate: Option<u64>) -> Result<(), BackendError> {
        let fetched = async {
            let endpoints = self.backend.list_endpoints().await?;
            let deliveries = self.backend.list_deliveries().await?;
            Ok::<_, BackendError>((endpoints, deliveries))
        }
        .await;

        // Checked under the write lock: cancellation bumps the generation under the same lock.
        let mut snap = self.write();
        if !self.is_live(gate) {
            tracing::debug!("dropping result of cancelled poll");
            return Ok(());
        }
        match fetched {
            Ok((endpoints, deliveries)) => {
                snap.endpoints = endpoints;
                snap.deliveries = deliveries;
                snap.last_error = None;
                snap.refreshed_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                snap.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn remember_error(&self, err: &BackendError) {
        self.write().last_error = Some(err.to_string());
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            log.record(event);
        }
    }
}

async fn poll_loop(shared: Arc<Shared>, generation: u64, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !shared.is_live(Some(generation)) {
            break;
        }
        if let Err(e) = shared.refresh(Some(generation)).await {
            tracing::warn!(error = %e, "auto refresh failed");
        }
    }
}

/// Endpoints and deliveries as last fetched, plus the actions a user can take on them.
///
/// Nothing is mutated optimistically: every action is followed by a refresh and the
/// backend's answer is what the model shows.
pub struct DeliveryTriageModel {
    shared: Arc<Shared>,
    auto_refresh: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryTriageModel {
    pub fn new(backend: Arc<dyn WebhookBackend>) -> Self {
        Self::build(backend, None)
    }

    pub fn with_audit_log(backend: Arc<dyn WebhookBackend>, audit: AuditLog) -> Self {
        Self::build(backend, Some(audit))
    }

    fn build(backend: Arc<dyn WebhookBackend>, audit: Option<AuditLog>) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                snapshot: RwLock::new(TriageSnapshot::default()),
                filter: RwLock::new(DeliveryFilter::default()),
                poll_generation: AtomicU64::new(0),
                audit,
            }),
            auto_refresh: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> TriageSnapshot {
        self.shared.read().clone()
    }

    pub fn endpoints(&self) -> Vec<WebhookEndpoint> {
        self.shared.read().endpoints.clone()
    }

    pub fn deliveries(&self) -> Vec<WebhookDeliveryRecord> {
        self.shared.read().deliveries.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.read().last_error.clone()
    }

    pub fn filter(&self) -> DeliveryFilter {
        self.shared
            .filter
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn set_filter(&self, filter: DeliveryFilter) {
        *self.shared.filter.write().unwrap_or_else(|p| p.into_inner()) = filter;
    }

    /// Deliveries passing the current filter, in backend order.
    pub fn filtered(&self) -> Vec<WebhookDeliveryRecord> {
        let filter = self.filter();
        filter.apply(&self.shared.read().deliveries).cloned().collect()
    }

    /// Re-fetch both lists. On failure the previous lists stay in place.
    pub async fn refresh(&self) -> Result<(), TriageError> {
        Ok(self.shared.refresh(None).await?)
    }

    async fn refresh_after_action(&self) {
        if let Err(e) = self.shared.refresh(None).await {
            tracing::warn!(error = %e, "refresh after action failed");
        }
    }

    pub async fn create_endpoint(&self, url: &str, secret: &str) -> Result<WebhookEndpoint, TriageError> {
        let endpoint = match self.shared.backend.create_endpoint(url, secret).await {
            Ok(ep) => ep,
            Err(e) => {
                self.shared.remember_error(&e);
                return Err(e.into());
            }
        };
        self.shared
            .audit(AuditEvent::new("endpoint_created", &endpoint.id, "ok"));
        self.refresh_after_action().await;
        Ok(endpoint)
    }

    pub async fn send_test(&self) -> Result<(), TriageError> {
        if let Err(e) = self.shared.backend.send_test().await {
            self.shared.remember_error(&e);
            return Err(e.into());
        }
        self.refresh_after_action().await;
        Ok(())
    }

    /// Ask the backend to schedule another attempt; the new state shows up after refresh.
    pub async fn requeue(&self, delivery_id: &str) -> Result<(), TriageError> {
        if let Err(e) = self.shared.backend.requeue_delivery(delivery_id).await {
            tracing::warn!(delivery_id, error = %e, "requeue failed");
            self.shared.remember_error(&e);
            self.shared.audit(
                AuditEvent::new("delivery_requeue_failed", delivery_id, "failed")
                    .with_error(e.to_string()),
            );
            return Err(e.into());
        }
        tracing::info!(delivery_id, "delivery requeued");
        self.shared
            .audit(AuditEvent::new("delivery_requeued", delivery_id, "ok"));
        self.refresh_after_action().await;
        Ok(())
    }

    /// Check a delivery's signature. A mismatch is reported, never raised.
    pub fn verify(&self, secret: &str, sig: &DeliverySignature) -> Result<SignatureCheck, TriageError> {
        let check = check_signature(secret, sig)?;
        if check.outcome.is_some() && !check.is_verified() {
            tracing::warn!(event_type = %sig.event_type, timestamp = %sig.timestamp, "webhook signature mismatch");
        }
        self.shared.audit(
            AuditEvent::new("signature_checked", &sig.timestamp, check.label())
                .with_webhook_event(&sig.event_type),
        );
        Ok(check)
    }

    /// Start polling every `every`. Replaces any running poller.
    pub fn enable_auto_refresh(&self, every: Duration) {
        let mut slot = self.auto_refresh.lock().unwrap_or_else(|p| p.into_inner());
        let generation = self.shared.next_poll_generation();
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(tokio::spawn(poll_loop(
            Arc::clone(&self.shared),
            generation,
            every,
        )));
        tracing::info!(interval_ms = every.as_millis() as u64, "auto refresh enabled");
    }

    /// Stop polling. A poll already in flight will not publish its result.
    pub fn disable_auto_refresh(&self) {
        let mut slot = self.auto_refresh.lock().unwrap_or_else(|p| p.into_inner());
        self.shared.next_poll_generation();
        if let Some(handle) = slot.take() {
            handle.abort();
            tracing::info!("auto refresh disabled");
        }
    }

    pub fn auto_refresh_enabled(&self) -> bool {
        self.auto_refresh
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }
}

impl Drop for DeliveryTriageModel {
    fn drop(&mut self) {
        self.disable_auto_refresh();
    }
}
