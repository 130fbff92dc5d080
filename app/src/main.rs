mod commands;

use backend::{http::HttpBackend, mock::MockBackend, PaymentBackend, SessionContext, WebhookBackend};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "payscan", version, about = "Scan payment codes and triage webhook deliveries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a typed payment code
    Pay {
        code: String,
        /// Amount in cents, for codes that leave it open
        #[arg(long)]
        amount: Option<i64>,
    },
    /// Decode a payment code from a picture (image file or data URL file) and submit it
    PayImage {
        file: PathBuf,
        #[arg(long)]
        amount: Option<i64>,
    },
    /// Sample frames from a folder until a payment code is found, then submit it
    Scan {
        frames_dir: PathBuf,
        #[arg(long)]
        amount: Option<i64>,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Issue payment links for others to pay
    #[command(subcommand)]
    Links(LinksCommand),
    /// Issue dynamic merchant QR codes
    #[command(subcommand)]
    Qr(QrCommand),
    #[command(subcommand)]
    Webhooks(WebhooksCommand),
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Subcommand)]
enum LinksCommand {
    /// Create a link; without --amount the payer chooses the amount
    Create {
        #[arg(long)]
        amount: Option<i64>,
        #[arg(long)]
        expires_in_minutes: Option<u32>,
    },
}

#[derive(Subcommand)]
enum QrCommand {
    Create {
        #[arg(long)]
        amount: i64,
    },
}

#[derive(Subcommand)]
enum WebhooksCommand {
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        event: Option<String>,
    },
    Create {
        #[arg(long)]
        url: String,
        #[arg(long)]
        secret: String,
    },
    Requeue {
        delivery_id: String,
    },
    Test,
    /// Poll deliveries until Ctrl-C
    Watch {
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    Verify {
        #[arg(long)]
        secret: String,
        #[arg(long)]
        ts: String,
        #[arg(long)]
        event: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        sign: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
}

#[derive(Subcommand)]
enum SessionCommand {
    Set { token: String },
    Clear,
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// The same client serves both payment and webhook calls.
struct Backends {
    payments: Arc<dyn PaymentBackend>,
    webhooks: Arc<dyn WebhookBackend>,
}

fn create_backend(cfg: &config::AppConfig) -> anyhow::Result<Backends> {
    match cfg.backend.kind.as_str() {
        "http" => {
            let session = match config::session_token() {
                Some(token) => SessionContext::with_token(token),
                None => {
                    tracing::warn!("no session token in env or keychain, calling backend anonymously");
                    SessionContext::anonymous()
                }
            };
            tracing::info!(base_url = %cfg.backend.base_url, "Using HTTP backend");
            let client = HttpBackend::new(
                cfg.backend.base_url.clone(),
                session,
                Duration::from_millis(cfg.backend.timeout_ms),
            )?;
            Ok(Backends {
                payments: client.clone(),
                webhooks: client,
            })
        }
        "mock" => {
            tracing::info!("Using mock backend");
            let mock = MockBackend::new();
            Ok(Backends {
                payments: mock.clone(),
                webhooks: mock,
            })
        }
        other => anyhow::bail!("unknown backend kind '{other}' (expected mock or http)"),
    }
}

fn open_triage(cfg: &config::AppConfig) -> anyhow::Result<triage::DeliveryTriageModel> {
    let backends = create_backend(cfg)?;
    Ok(commands::triage_model(cfg, backends.webhooks))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default config");
        config::AppConfig::default()
    });

    match cli.command {
        Command::Config(ConfigCommand::Show) => commands::show_config(&cfg),
        Command::Session(SessionCommand::Set { token }) => commands::set_session(&token),
        Command::Session(SessionCommand::Clear) => commands::clear_session(),
        Command::Pay { code, amount } => {
            let backends = create_backend(&cfg)?;
            commands::pay(backends.payments, &code, amount).await
        }
        Command::PayImage { file, amount } => {
            let backends = create_backend(&cfg)?;
            commands::pay_image(backends.payments, &file, amount).await
        }
        Command::Scan {
            frames_dir,
            amount,
            timeout_secs,
        } => {
            let backends = create_backend(&cfg)?;
            commands::scan(
                &cfg,
                backends.payments,
                frames_dir,
                amount,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Command::Links(LinksCommand::Create {
            amount,
            expires_in_minutes,
        }) => {
            let backends = create_backend(&cfg)?;
            commands::create_link(backends.payments, amount, expires_in_minutes).await
        }
        Command::Qr(QrCommand::Create { amount }) => {
            let backends = create_backend(&cfg)?;
            commands::create_qr(backends.payments, amount).await
        }
        Command::Webhooks(cmd) => match cmd {
            WebhooksCommand::List { status, event } => {
                let model = open_triage(&cfg)?;
                commands::list_deliveries(&model, status.as_deref(), event.as_deref()).await
            }
            WebhooksCommand::Create { url, secret } => {
                commands::create_endpoint(&open_triage(&cfg)?, &url, &secret).await
            }
            WebhooksCommand::Requeue { delivery_id } => {
                commands::requeue(&open_triage(&cfg)?, &delivery_id).await
            }
            WebhooksCommand::Test => commands::send_test(&open_triage(&cfg)?).await,
            WebhooksCommand::Watch { interval_ms } => {
                let every =
                    Duration::from_millis(interval_ms.unwrap_or(cfg.triage.refresh_interval_ms));
                commands::watch(&open_triage(&cfg)?, every).await
            }
            WebhooksCommand::Verify {
                secret,
                ts,
                event,
                body,
                sign,
            } => commands::verify_signature(&cfg, &secret, ts, event, body, sign),
        },
    }
}
