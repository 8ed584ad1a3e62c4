use std::sync::Arc;

use chrono::Local;
use tracing::{error, info};

use crate::config::RemindersConfig;
use crate::platform::Messenger;
use crate::scheduler::reminders::run_reminders;
use crate::scheduler::Scheduler;
use crate::store::Store;

/// Register the invoice reminder sweep and the heartbeat
pub async fn register_builtin_tasks(
    scheduler: &Scheduler,
    store: Store,
    messenger: Arc<dyn Messenger>,
    config: &RemindersConfig,
) -> anyhow::Result<()> {
    let days_ahead = config.days_ahead;
    scheduler
        .add_cron_job(&config.cron, "invoice-reminders", move || {
            let store = store.clone();
            let messenger = messenger.clone();
            Box::pin(async move {
                let today = Local::now().date_naive();
                match run_reminders(&store, messenger.as_ref(), today, days_ahead).await {
                    Ok(report) => info!(
                        "Reminder sweep done: {} sent, {} failed",
                        report.sent, report.failed
                    ),
                    Err(e) => error!("Reminder sweep failed: {:#}", e),
                }
            })
        })
        .await?;

    // Heartbeat — log that the service is alive every hour
    scheduler
        .add_cron_job("0 0 * * * *", "heartbeat", || {
            Box::pin(async {
                info!("Heartbeat: finny is alive");
            })
        })
        .await?;

    Ok(())
}
