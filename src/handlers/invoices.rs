//! Invoice upload and reminder handlers, both backed by the invoice store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use tracing::info;

use super::{format_money, parse_amount, IntentHandler, Reply};
use crate::platform::InboundMessage;
use crate::router::patterns::tokenize;
use crate::router::Intent;
use crate::store::invoices::Invoice;
use crate::store::Store;

const DUE_DATE_FORMATS: &[&str] = &["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d"];

/// First token in the text that parses as a due date
pub(crate) fn parse_due_date(text: &str) -> Option<NaiveDate> {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_ascii_digit()))
        .find_map(|word| {
            DUE_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(word, fmt).ok())
        })
}

/// Records an attachment as an invoice awaiting its due date
pub struct InvoiceUploadHandler {
    store: Store,
}

impl InvoiceUploadHandler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IntentHandler for InvoiceUploadHandler {
    fn id(&self) -> &'static str {
        "invoice_upload"
    }

    fn intent(&self) -> Intent {
        Intent::InvoiceUpload
    }

    async fn handle(&self, message: &InboundMessage) -> Result<Reply> {
        let attachment = match &message.attachment {
            Some(a) => a,
            None => anyhow::bail!("invoice upload without an attachment"),
        };

        let mut invoice = Invoice::pending(&message.sender, &attachment.url);

        // A caption may already carry the due date and amount
        if let Some(due) = parse_due_date(&message.text) {
            invoice.due_date = Some(due);
            invoice.awaiting_due = false;
        }
        invoice.amount = parse_amount(&message.text);

        self.store.save_invoice(&invoice).await?;
        info!(
            "Saved invoice {} for {} ({})",
            invoice.id,
            message.sender,
            attachment.content_type.as_deref().unwrap_or("unknown type")
        );

        let text = match invoice.due_date {
            Some(due) => format!(
                "Invoice saved. I'll remind you before it is due on {}.",
                due.format("%d-%m-%Y")
            ),
            None => "We received your invoice but couldn't find a due date. \
                     When is it due? Reply with 'due DD-MM-YYYY'."
                .to_string(),
        };
        Ok(Reply::new(text))
    }
}

/// Sets due dates on pending uploads, settles paid invoices and lists what
/// is due soon
pub struct InvoiceReminderHandler {
    store: Store,
    window_days: i64,
}

impl InvoiceReminderHandler {
    pub fn new(store: Store, window_days: i64) -> Self {
        Self { store, window_days }
    }

    async fn set_due_date(&self, message: &InboundMessage, due: NaiveDate) -> Result<Reply> {
        let amount = parse_amount(&message.text);
        let updated = self
            .store
            .set_due_date_for_pending(&message.sender, due, amount)
            .await?;

        let text = match updated {
            Some(invoice) => {
                info!("Due date {} set on invoice {}", due, invoice.id);
                let amount = invoice
                    .amount
                    .map(|a| format!(" for {}", format_money(a)))
                    .unwrap_or_default();
                format!(
                    "Due date {} set on your {} invoice{}. I'll remind you ahead of time.",
                    due.format("%d-%m-%Y"),
                    invoice.label(),
                    amount
                )
            }
            None => "You have no invoices waiting for a due date. \
                     Send a photo of an invoice first."
                .to_string(),
        };
        Ok(Reply::new(text))
    }

    async fn mark_paid(&self, message: &InboundMessage, due: Option<NaiveDate>) -> Result<Reply> {
        let Some(due) = due else {
            return Ok(Reply::new(
                "Which invoice did you pay? Reply with 'paid DD-MM-YYYY' using its due date.",
            ));
        };

        let marked = self.store.mark_paid(&message.sender, due).await?;
        let text = if marked == 0 {
            format!(
                "I couldn't find an unpaid invoice due on {}.",
                due.format("%d-%m-%Y")
            )
        } else {
            info!("{} marked {} invoice(s) due {} as paid", message.sender, marked, due);
            format!(
                "Marked {} invoice(s) due on {} as paid.",
                marked,
                due.format("%d-%m-%Y")
            )
        };
        Ok(Reply::new(text))
    }

    async fn list_upcoming(&self, message: &InboundMessage) -> Result<Reply> {
        let today = Local::now().date_naive();
        let until = today
            .checked_add_signed(Duration::days(self.window_days))
            .context("Reminder window runs past the supported date range")?;
        let upcoming = self
            .store
            .upcoming_for_user(&message.sender, until)
            .await?;
        let pending = self.store.pending_for_user(&message.sender).await?;

        let mut text = if upcoming.is_empty() {
            format!("Nothing due in the next {} days.", self.window_days)
        } else {
            let mut list = format!("Due in the next {} days:\n", self.window_days);
            for invoice in &upcoming {
                let due = invoice.due_date.unwrap_or(today);
                let amount = invoice
                    .amount
                    .map(format_money)
                    .unwrap_or_else(|| "amount unknown".to_string());
                let overdue = if due < today { " (overdue)" } else { "" };
                list.push_str(&format!(
                    "- {} invoice, {}, due {}{}\n",
                    invoice.label(),
                    amount,
                    due.format("%d-%m-%Y"),
                    overdue
                ));
            }
            list
        };

        if !pending.is_empty() {
            text.push_str(&format!(
                "\n{} upload(s) still need a due date. Reply with 'due DD-MM-YYYY'.",
                pending.len()
            ));
        }
        Ok(Reply::new(text.trim_end().to_string()))
    }
}

#[async_trait]
impl IntentHandler for InvoiceReminderHandler {
    fn id(&self) -> &'static str {
        "invoice_reminder"
    }

    fn intent(&self) -> Intent {
        Intent::InvoiceReminder
    }

    async fn handle(&self, message: &InboundMessage) -> Result<Reply> {
        let due = parse_due_date(&message.text);
        if tokenize(&message.text).iter().any(|word| word == "paid") {
            return self.mark_paid(message, due).await;
        }
        match due {
            Some(due) => self.set_due_date(message, due).await,
            None => self.list_upcoming(message).await,
        }
    }
}
