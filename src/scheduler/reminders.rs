use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use tracing::{error, info};

use crate::handlers::format_money;
use crate::platform::Messenger;
use crate::store::invoices::Invoice;
use crate::store::Store;

/// Outcome of one reminder sweep
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sent: usize,
    pub failed: usize,
}

pub fn reminder_text(invoice: &Invoice, today: NaiveDate) -> String {
    let due = invoice.due_date.unwrap_or(today);
    let amount = invoice
        .amount
        .map(|a| format!(" of {}", format_money(a)))
        .unwrap_or_default();
    let when = if due < today {
        format!("was due on {}", due.format("%d-%m-%Y"))
    } else {
        format!("is due on {}", due.format("%d-%m-%Y"))
    };
    format!(
        "Reminder: your invoice {}{} {}.",
        invoice.label(),
        amount,
        when
    )
}

/// Message every invoice falling due within `days_ahead` days that has not
/// been reminded yet. Only successful sends are marked; failures are picked
/// up again on the next run.
pub async fn run_reminders(
    store: &Store,
    messenger: &dyn Messenger,
    today: NaiveDate,
    days_ahead: i64,
) -> Result<SweepReport> {
    let until = today
        .checked_add_signed(Duration::days(days_ahead))
        .context("Reminder window runs past the supported date range")?;
    let invoices = store.due_for_reminder(until).await?;
    info!(
        "Found {} invoice(s) due in the next {} day(s)",
        invoices.len(),
        days_ahead
    );

    let mut report = SweepReport::default();
    for invoice in &invoices {
        let text = reminder_text(invoice, today);
        match messenger.send(&invoice.user_id, &text).await {
            Ok(()) => {
                store.mark_reminder_sent(&invoice.id).await?;
                report.sent += 1;
            }
            Err(e) => {
                error!(
                    "Failed to send reminder for invoice {} to {}: {:#}",
                    invoice.id, invoice.user_id, e
                );
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
