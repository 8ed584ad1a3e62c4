mod config;
mod handlers;
mod llm;
mod platform;
mod router;
mod scheduler;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::handlers::help::HelpHandler;
use crate::handlers::invoices::{InvoiceReminderHandler, InvoiceUploadHandler};
use crate::handlers::ledger::LedgerHandler;
use crate::handlers::loan::LoanHandler;
use crate::handlers::tax::TaxHandler;
use crate::handlers::HandlerRegistry;
use crate::llm::{ChatModel, LlmClient};
use crate::platform::whatsapp::{SignatureVerifier, TwilioMessenger, WebhookState};
use crate::platform::{LogMessenger, Messenger};
use crate::router::{IntentRouter, PatternTable};
use crate::scheduler::tasks::register_builtin_tasks;
use crate::scheduler::Scheduler;
use crate::store::Store;

fn load_patterns(config: &Config) -> Result<PatternTable> {
    match &config.router.patterns_file {
        Some(path) => PatternTable::load(path),
        None => {
            info!("No pattern file configured, using built-in patterns");
            Ok(PatternTable::builtin())
        }
    }
}

fn build_registry(config: &Config, store: &Store) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(HelpHandler));
    registry.register(Arc::new(InvoiceUploadHandler::new(store.clone())));
    registry.register(Arc::new(InvoiceReminderHandler::new(
        store.clone(),
        config.reminders.list_window_days,
    )));

    match &config.llm {
        Some(llm_config) => {
            let llm: Arc<dyn ChatModel> = Arc::new(LlmClient::new(llm_config.clone())?);
            registry.register(Arc::new(LedgerHandler::new(store.clone(), llm.clone())));
            registry.register(Arc::new(LoanHandler::new(llm.clone())));
            registry.register(Arc::new(TaxHandler::new(llm, config.tax.clone())));
        }
        None => warn!("No [llm] section: ledger, loan and tax handlers are disabled"),
    }

    Ok(registry)
}

/// Reload the pattern file on SIGHUP. A bad file is logged and ignored.
#[cfg(unix)]
fn spawn_reload_on_sighup(router: Arc<IntentRouter>, config: Config) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, reloading pattern table");
            let table = match load_patterns(&config) {
                Ok(t) => t,
                Err(e) => {
                    error!("Pattern reload failed: {:#}", e);
                    continue;
                }
            };
            if let Err(e) = router.reload(table).await {
                error!("Pattern reload rejected: {}", e);
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_router: Arc<IntentRouter>, _config: Config) -> Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,finny=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Bind: {}", config.server.bind);
    info!("  Database: {}", config.database.path.display());
    match &config.llm {
        Some(llm) => info!("  LLM: {} ({})", llm.model, llm.provider),
        None => info!("  LLM: disabled"),
    }
    info!(
        "  Reminders: {} (days ahead: {})",
        config.reminders.cron, config.reminders.days_ahead
    );

    let store = Store::open(&config.database.path)?;

    // Refuse to start when a pattern points at an intent nobody handles
    let table = load_patterns(&config)?;
    let registry = build_registry(&config, &store)?;
    let router = Arc::new(
        IntentRouter::new(table, registry).context("Router configuration is inconsistent")?,
    );
    spawn_reload_on_sighup(router.clone(), config.clone())?;

    let messenger: Arc<dyn Messenger> = match &config.twilio {
        Some(twilio) => Arc::new(TwilioMessenger::new(twilio.clone())),
        None => {
            warn!("No [twilio] section: reminders will only be logged");
            Arc::new(LogMessenger)
        }
    };

    let mut scheduler = Scheduler::new().await?;
    register_builtin_tasks(&scheduler, store.clone(), messenger, &config.reminders).await?;
    scheduler.start().await?;

    let state = WebhookState {
        router,
        signatures: config
            .twilio
            .as_ref()
            .map(|twilio| Arc::new(SignatureVerifier::new(twilio))),
    };

    info!("finny is starting...");
    let served = platform::whatsapp::serve(config.server.bind, state).await;

    scheduler.shutdown().await?;
    served
}
