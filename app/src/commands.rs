use anyhow::Context;
use backend::{CreateLinkRequest, CreateQrRequest, PaymentBackend, PaymentSubmitter, WebhookBackend};
use capture::{directory::DirectoryCamera, CaptureController, CaptureState, QrDecoder, StartOutcome};
use payscan_core::models::{DeliveryStatus, IssuedCode};
use payscan_core::PaymentInstruction;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use triage::{AuditEvent, AuditLog, DeliveryFilter, DeliverySignature, DeliveryTriageModel};

pub fn show_config(cfg: &config::AppConfig) -> anyhow::Result<()> {
    if let Ok(path) = config::config_path() {
        println!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(cfg)?);
    let session = if config::session_token().is_some() {
        "present"
    } else {
        "absent"
    };
    println!("session token: {session}");
    Ok(())
}

pub fn set_session(token: &str) -> anyhow::Result<()> {
    config::store_secret(config::SESSION_TOKEN_KEY, token)
        .context("Failed to store session token in keychain")?;
    tracing::info!("session token stored");
    Ok(())
}

pub fn clear_session() -> anyhow::Result<()> {
    match config::delete_secret(config::SESSION_TOKEN_KEY) {
        Ok(()) => tracing::info!("session token removed"),
        Err(e) => tracing::warn!(error = %e, "no session token to remove"),
    }
    Ok(())
}

async fn submit_and_report(
    payments: Arc<dyn PaymentBackend>,
    instruction: PaymentInstruction,
    amount: Option<i64>,
) -> anyhow::Result<()> {
    let submitter = PaymentSubmitter::new(payments);
    let outcome = match submitter.submit_instruction(instruction, amount).await {
        Ok(outcome) => outcome,
        Err(e) if submitter.has_pending_retry() => {
            tracing::warn!(error = %e, "submission failed, retrying once with the same key");
            submitter.retry().await?
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(transfer_id = %outcome.transfer_id, "payment executed");
    println!("{outcome}");
    Ok(())
}

pub async fn pay(
    payments: Arc<dyn PaymentBackend>,
    code: &str,
    amount: Option<i64>,
) -> anyhow::Result<()> {
    let instruction = PaymentInstruction::parse(code)?;
    submit_and_report(payments, instruction, amount).await
}

pub async fn pay_image(
    payments: Arc<dyn PaymentBackend>,
    file: &Path,
    amount: Option<i64>,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let token = capture::decode_still_image(&QrDecoder, &bytes)?;
    let instruction = capture::instruction_from_capture(token)?
        .ok_or_else(|| anyhow::anyhow!("no payment code found in {}", file.display()))?;
    submit_and_report(payments, instruction, amount).await
}

pub async fn scan(
    cfg: &config::AppConfig,
    payments: Arc<dyn PaymentBackend>,
    frames_dir: PathBuf,
    amount: Option<i64>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let controller = CaptureController::with_interval(
        Arc::new(DirectoryCamera::new(frames_dir)),
        Arc::new(QrDecoder),
        Duration::from_millis(cfg.capture.sample_interval_ms),
    );
    let mut updates = controller.subscribe();

    match controller
        .start_scan(cfg.capture.preferred_device.as_deref())
        .await?
    {
        StartOutcome::Started => {}
        other => anyhow::bail!("scan did not start: {other:?}"),
    }

    let waited = tokio::time::timeout(timeout, async {
        updates
            .wait_for(|s| s.detected.is_some() || s.state == CaptureState::Error)
            .await
            .map(|s| s.clone())
    })
    .await;
    let snapshot = match waited {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(_)) => anyhow::bail!("capture controller went away"),
        Err(_) => {
            controller.stop_scan();
            anyhow::bail!("no payment code found within {}s", timeout.as_secs());
        }
    };

    if let Some(error) = snapshot.error {
        anyhow::bail!("capture failed: {error}");
    }
    let instruction = capture::instruction_from_capture(snapshot.detected)?
        .ok_or_else(|| anyhow::anyhow!("scan ended without a payment code"))?;
    submit_and_report(payments, instruction, amount).await
}

fn print_issued(issued: &IssuedCode) {
    println!("{}", issued.code);
    match &issued.expires_at {
        Some(at) => println!("expires: {at}"),
        None => println!("expires: never"),
    }
}

pub async fn create_link(
    payments: Arc<dyn PaymentBackend>,
    amount: Option<i64>,
    expires_in_minutes: Option<u32>,
) -> anyhow::Result<()> {
    let issued = payments
        .create_link(&CreateLinkRequest {
            amount_cents: amount,
            expires_in_minutes,
        })
        .await?;
    // Refuse to hand out a code this tool could not scan back.
    issued
        .instruction()
        .with_context(|| format!("backend issued an unreadable link: {}", issued.code))?;
    print_issued(&issued);
    Ok(())
}

pub async fn create_qr(payments: Arc<dyn PaymentBackend>, amount: i64) -> anyhow::Result<()> {
    let issued = payments.create_qr(&CreateQrRequest { amount_cents: amount }).await?;
    issued
        .instruction()
        .with_context(|| format!("backend issued an unreadable QR: {}", issued.code))?;
    print_issued(&issued);
    Ok(())
}

pub fn triage_model(cfg: &config::AppConfig, webhooks: Arc<dyn WebhookBackend>) -> DeliveryTriageModel {
    match &cfg.triage.audit_log {
        Some(path) => DeliveryTriageModel::with_audit_log(webhooks, AuditLog::new(path)),
        None => DeliveryTriageModel::new(webhooks),
    }
}

fn print_deliveries(model: &DeliveryTriageModel) {
    let deliveries = model.filtered();
    if deliveries.is_empty() {
        println!("no deliveries");
        return;
    }
    for d in deliveries {
        println!(
            "{}\t{}\t{}\tattempts={}\t{}",
            d.id, d.event_type, d.status, d.attempt_count, d.created_at
        );
    }
}

pub async fn list_deliveries(
    model: &DeliveryTriageModel,
    status: Option<&str>,
    event: Option<&str>,
) -> anyhow::Result<()> {
    let status = status
        .map(|s| s.parse::<DeliveryStatus>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    model.set_filter(DeliveryFilter::new(status, event.unwrap_or_default()));
    model.refresh().await?;
    for ep in model.endpoints() {
        println!("endpoint {}\t{}\tactive={}", ep.id, ep.url, ep.active);
    }
    print_deliveries(model);
    Ok(())
}

pub async fn create_endpoint(
    model: &DeliveryTriageModel,
    url: &str,
    secret: &str,
) -> anyhow::Result<()> {
    let endpoint = model.create_endpoint(url, secret).await?;
    println!("created endpoint {}", endpoint.id);
    Ok(())
}

pub async fn requeue(model: &DeliveryTriageModel, delivery_id: &str) -> anyhow::Result<()> {
    model.requeue(delivery_id).await?;
    println!("requeued {delivery_id}");
    Ok(())
}

pub async fn send_test(model: &DeliveryTriageModel) -> anyhow::Result<()> {
    model.send_test().await?;
    println!("test event sent");
    print_deliveries(model);
    Ok(())
}

pub async fn watch(model: &DeliveryTriageModel, every: Duration) -> anyhow::Result<()> {
    if let Err(e) = model.refresh().await {
        tracing::warn!(error = %e, "initial refresh failed");
    }
    print_deliveries(model);

    model.enable_auto_refresh(every);
    let mut last_seen = model.snapshot().refreshed_at;
    let mut ticker = tokio::time::interval(every);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let snap = model.snapshot();
                if snap.refreshed_at != last_seen {
                    last_seen = snap.refreshed_at;
                    println!("--");
                    print_deliveries(model);
                }
            }
        }
    }
    model.disable_auto_refresh();
    Ok(())
}

pub fn verify_signature(
    cfg: &config::AppConfig,
    secret: &str,
    timestamp: String,
    event_type: String,
    body: String,
    supplied: Option<String>,
) -> anyhow::Result<()> {
    let sig = DeliverySignature {
        timestamp,
        event_type,
        body,
        supplied,
    };
    let check = triage::check_signature(secret, &sig)?;
    if let Some(path) = &cfg.triage.audit_log {
        AuditLog::new(path).record(
            AuditEvent::new("signature_checked", &sig.timestamp, check.label())
                .with_webhook_event(&sig.event_type),
        );
    }
    println!("expected: {}", check.expected);
    println!("result: {}", check.label());
    Ok(())
}
