use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};

use super::{format_money, IntentHandler, Reply};
use crate::llm::{ChatMessage, ChatModel};
use crate::platform::InboundMessage;
use crate::router::Intent;
use crate::store::invoices::Invoice;
use crate::store::Store;

const SYSTEM_PROMPT: &str = "You are a cash-flow analyst for a small business. \
Answer in at most six short lines suitable for WhatsApp. \
Base every figure on the payables summary you are given; \
say so plainly when the data is too thin to forecast.";

/// Outstanding payables grouped by the month they fall due
#[derive(Debug, Default, PartialEq)]
pub(crate) struct PayablesSummary {
    pub overdue_total: f64,
    pub overdue_count: usize,
    /// (year, month) -> (total, invoice count)
    pub by_month: BTreeMap<(i32, u32), (f64, usize)>,
    /// Invoices whose amount we never learned
    pub unknown_amounts: usize,
}

impl PayablesSummary {
    pub fn build(invoices: &[Invoice], today: NaiveDate) -> Self {
        let mut summary = Self::default();
        for invoice in invoices {
            let Some(due) = invoice.due_date else {
                continue;
            };
            let amount = match invoice.amount {
                Some(a) => a,
                None => {
                    summary.unknown_amounts += 1;
                    0.0
                }
            };
            if due < today {
                summary.overdue_total += amount;
                summary.overdue_count += 1;
            } else {
                let slot = summary
                    .by_month
                    .entry((due.year(), due.month()))
                    .or_insert((0.0, 0));
                slot.0 += amount;
                slot.1 += 1;
            }
        }
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.overdue_count == 0 && self.by_month.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.overdue_total + self.by_month.values().map(|(t, _)| t).sum::<f64>()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.overdue_count > 0 {
            out.push_str(&format!(
                "Overdue: {} ({} invoice(s))\n",
                format_money(self.overdue_total),
                self.overdue_count
            ));
        }
        for ((year, month), (total, count)) in &self.by_month {
            out.push_str(&format!(
                "{}-{:02}: {} ({} invoice(s))\n",
                year,
                month,
                format_money(*total),
                count
            ));
        }
        out.push_str(&format!("Total outstanding: {}", format_money(self.total())));
        if self.unknown_amounts > 0 {
            out.push_str(&format!(
                "\n{} invoice(s) have no amount recorded",
                self.unknown_amounts
            ));
        }
        out
    }
}

/// Cash-flow outlook built from the sender's invoices
pub struct LedgerHandler {
    store: Store,
    llm: Arc<dyn ChatModel>,
}

impl LedgerHandler {
    pub fn new(store: Store, llm: Arc<dyn ChatModel>) -> Self {
        Self { store, llm }
    }
}

#[async_trait]
impl IntentHandler for LedgerHandler {
    fn id(&self) -> &'static str {
        "ledger"
    }

    fn intent(&self) -> Intent {
        Intent::Ledger
    }

    async fn handle(&self, message: &InboundMessage) -> Result<Reply> {
        let today = Local::now().date_naive();
        let invoices = self.store.dated_for_user(&message.sender).await?;
        let summary = PayablesSummary::build(&invoices, today);

        if summary.is_empty() {
            return Ok(Reply::new(
                "I don't have any dated invoices for you yet. \
                 Send invoice photos and their due dates, then ask again.",
            ));
        }

        let rendered = summary.render();
        let prompt = format!(
            "Today is {}.\nPayables by due month:\n{}\n\nThe owner asks: {}",
            today.format("%Y-%m-%d"),
            rendered,
            message.text.trim()
        );
        let forecast = self
            .llm
            .complete(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await
            .context("Cash-flow forecast failed")?;

        Ok(Reply::new(format!("{}\n\n{}", rendered, forecast.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FakeModel;

    fn invoice(due: NaiveDate, amount: Option<f64>) -> Invoice {
        Invoice {
            amount,
            due_date: Some(due),
            awaiting_due: false,
            ..Invoice::pending("u", "https://media.example/x")
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_summary_groups_by_month() {
        let today = date(2026, 8, 10);
        let invoices = vec![
            invoice(date(2026, 8, 1), Some(100.0)),
            invoice(date(2026, 8, 20), Some(200.0)),
            invoice(date(2026, 8, 25), Some(50.0)),
            invoice(date(2026, 9, 5), None),
        ];
        let summary = PayablesSummary::build(&invoices, today);

        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.overdue_total, 100.0);
        assert_eq!(summary.by_month[&(2026, 8)], (250.0, 2));
        assert_eq!(summary.by_month[&(2026, 9)], (0.0, 1));
        assert_eq!(summary.unknown_amounts, 1);
        assert_eq!(summary.total(), 350.0);

        let rendered = summary.render();
        assert!(rendered.contains("Overdue: 100.00 (1 invoice(s))"));
        assert!(rendered.contains("2026-08: 250.00 (2 invoice(s))"));
        assert!(rendered.contains("Total outstanding: 350.00"));
    }

    #[tokio::test]
    async fn test_no_invoices_skips_llm() {
        let llm = Arc::new(FakeModel::replying("unused"));
        let handler = LedgerHandler::new(Store::open_in_memory().unwrap(), llm.clone());
        let reply = handler
            .handle(&InboundMessage::text("u", "forecast my cash flow"))
            .await
            .unwrap();
        assert!(reply.text.contains("don't have any dated invoices"));
        assert!(llm.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forecast_is_grounded_on_summary() {
        let store = Store::open_in_memory().unwrap();
        let due = Local::now().date_naive() + chrono::Duration::days(5);
        store.save_invoice(&invoice(due, Some(900.0))).await.unwrap();
        let llm = Arc::new(FakeModel::replying("Expect a tight month."));
        let handler = LedgerHandler::new(store, llm.clone());

        let reply = handler
            .handle(&InboundMessage::text("u", "Forecast my cash flow for August"))
            .await
            .unwrap();
        assert!(reply.text.contains("900.00"));
        assert!(reply.text.ends_with("Expect a tight month."));

        let prompt = llm.last_user_prompt();
        assert!(prompt.contains("900.00"));
        assert!(prompt.contains("Forecast my cash flow for August"));
    }

    #[tokio::test]
    async fn test_llm_failure_propagates() {
        let store = Store::open_in_memory().unwrap();
        let due = Local::now().date_naive() + chrono::Duration::days(5);
        store.save_invoice(&invoice(due, Some(10.0))).await.unwrap();
        let handler = LedgerHandler::new(store, Arc::new(FakeModel::failing("timeout")));

        let err = handler
            .handle(&InboundMessage::text("u", "forecast"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("timeout"));
    }
}
