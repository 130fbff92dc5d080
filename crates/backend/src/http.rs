use super::{
    BackendError, BackendResult, CreateLinkRequest, CreateQrRequest, PaymentBackend, SessionContext,
    SubmitRequest, WebhookBackend,
};
use async_trait::async_trait;
use payscan_core::models::{IssuedCode, TransferReceipt, WebhookDeliveryRecord, WebhookEndpoint};
use payscan_core::Scheme;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// REST client for the payments backend.
#[derive(Clone)]
pub struct HttpBackend {
    pub base_url: String,
    session: SessionContext,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[allow(dead_code)]
    detail: Option<String>,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        session: SessionContext,
        timeout: Duration,
    ) -> BackendResult<Arc<Self>> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Arc::new(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            http_client,
        }))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.session.bearer() {
            Some(header) => req.header("Authorization", header),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> BackendResult<T> {
        let resp = self.authorized(req).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Rejected { status, body });
        }

        Ok(resp.json::<T>().await?)
    }
}

fn pay_path(scheme: Scheme) -> &'static str {
    match scheme {
        Scheme::Pay => "/payments/merchant/pay",
        Scheme::Link => "/payments/links/pay",
    }
}

#[async_trait]
impl PaymentBackend for HttpBackend {
    async fn submit(&self, req: &SubmitRequest) -> BackendResult<TransferReceipt> {
        let url = self.url(pay_path(req.instruction.scheme()));
        let receipt: TransferReceipt = self
            .send_json(self.http_client.post(&url).json(req))
            .await?;

        tracing::info!(
            transfer_id = %receipt.transfer_id,
            status = %receipt.status,
            idempotency_key = %req.idempotency_key,
            "instruction submitted"
        );
        Ok(receipt)
    }

    async fn create_link(&self, req: &CreateLinkRequest) -> BackendResult<IssuedCode> {
        let issued: IssuedCode = self
            .send_json(self.http_client.post(self.url("/payments/links")).json(req))
            .await?;
        tracing::info!(code = %issued.code, expires_at = ?issued.expires_at, "payment link created");
        Ok(issued)
    }

    async fn create_qr(&self, req: &CreateQrRequest) -> BackendResult<IssuedCode> {
        let issued: IssuedCode = self
            .send_json(self.http_client.post(self.url("/payments/merchant/qr")).json(req))
            .await?;
        tracing::info!(code = %issued.code, expires_at = ?issued.expires_at, "merchant QR created");
        Ok(issued)
    }
}

#[async_trait]
impl WebhookBackend for HttpBackend {
    async fn create_endpoint(&self, url: &str, secret: &str) -> BackendResult<WebhookEndpoint> {
        let req = self
            .http_client
            .post(self.url("/webhooks/endpoints"))
            .query(&[("url", url), ("secret", secret)]);
        let endpoint: WebhookEndpoint = self.send_json(req).await?;
        tracing::info!(endpoint_id = %endpoint.id, url = %endpoint.url, "webhook endpoint created");
        Ok(endpoint)
    }

    async fn list_endpoints(&self) -> BackendResult<Vec<WebhookEndpoint>> {
        self.send_json(self.http_client.get(self.url("/webhooks/endpoints")))
            .await
    }

    async fn list_deliveries(&self) -> BackendResult<Vec<WebhookDeliveryRecord>> {
        self.send_json(self.http_client.get(self.url("/webhooks/deliveries")))
            .await
    }

    async fn requeue_delivery(&self, delivery_id: &str) -> BackendResult<()> {
        let path = format!("/webhooks/deliveries/{}/requeue", delivery_id);
        let _: DetailResponse = self.send_json(self.http_client.post(self.url(&path))).await?;
        Ok(())
    }

    async fn send_test(&self) -> BackendResult<()> {
        let _: serde_json::Value = self
            .send_json(self.http_client.post(self.url("/webhooks/test")))
            .await?;
        Ok(())
    }
}
