use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use super::{format_money, parse_amount, IntentHandler, Reply};
use crate::config::{TaxBracket, TaxConfig};
use crate::llm::{ChatMessage, ChatModel};
use crate::platform::InboundMessage;
use crate::router::Intent;

const SYSTEM_PROMPT: &str = "You are a small-business tax consultant. \
Explain in plain English and in at most eight short lines. \
Mention deductions only as possibilities and recommend confirming with a local accountant.";

/// Progressive tax owed on `income`: each bracket taxes only the slice of
/// income that falls inside it. Brackets may be given in any order.
pub fn tax_from_brackets(income: f64, brackets: &[TaxBracket]) -> f64 {
    let mut sorted: Vec<&TaxBracket> = brackets.iter().collect();
    sorted.sort_by(|a, b| a.min_income.total_cmp(&b.min_income));

    let mut owed = 0.0;
    for bracket in sorted {
        if income <= bracket.min_income {
            break;
        }
        let upper = bracket.max_income.unwrap_or(f64::INFINITY);
        let taxable = income.min(upper) - bracket.min_income;
        if taxable > 0.0 {
            owed += taxable * bracket.rate;
        }
    }
    owed
}

pub struct TaxHandler {
    llm: Arc<dyn ChatModel>,
    config: TaxConfig,
}

impl TaxHandler {
    pub fn new(llm: Arc<dyn ChatModel>, config: TaxConfig) -> Self {
        Self { llm, config }
    }

    fn region(&self) -> &str {
        self.config.region.as_deref().unwrap_or("the owner's country")
    }

    fn brackets_context(&self) -> String {
        if self.config.brackets.is_empty() {
            return "No bracket table is configured.".to_string();
        }
        let mut out = String::from("Brackets:\n");
        for b in &self.config.brackets {
            let upper = b
                .max_income
                .map(format_money)
                .unwrap_or_else(|| "and above".to_string());
            out.push_str(&format!(
                "- {} to {}: {:.1}%\n",
                format_money(b.min_income),
                upper,
                b.rate * 100.0
            ));
        }
        out
    }

    async fn estimate(&self, message: &InboundMessage, profit: f64) -> Result<Reply> {
        let owed = tax_from_brackets(profit, &self.config.brackets);
        let headline = format!(
            "Tax estimate ({}):\n- Net profit: {}\n- Tax owed: {}",
            self.region(),
            format_money(profit),
            format_money(owed)
        );

        let prompt = format!(
            "Region: {}\n{}\nAnnual net profit: {}\nEstimated tax: {}\n\n\
             The owner asked: {}\nExplain how the estimate was reached.",
            self.region(),
            self.brackets_context(),
            format_money(profit),
            format_money(owed),
            message.text.trim()
        );

        // The figure stands on its own; the explanation is a bonus
        let text = match self
            .llm
            .complete(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await
        {
            Ok(explanation) => format!("{}\n\n{}", headline, explanation.trim()),
            Err(e) => {
                warn!("Tax explanation unavailable: {:#}", e);
                format!("{}\n\n(Explanation unavailable right now.)", headline)
            }
        };
        Ok(Reply::new(text))
    }

    async fn advise(&self, message: &InboundMessage) -> Result<Reply> {
        let prompt = format!(
            "Region: {}\n{}\n\nThe owner asked: {}\n\
             If a profit figure is needed, ask them to send e.g. 'tax on 85000'.",
            self.region(),
            self.brackets_context(),
            message.text.trim()
        );
        let answer = self
            .llm
            .complete(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await
            .context("Tax advice request failed")?;
        Ok(Reply::new(answer.trim()))
    }
}

#[async_trait]
impl IntentHandler for TaxHandler {
    fn id(&self) -> &'static str {
        "tax"
    }

    fn intent(&self) -> Intent {
        Intent::Tax
    }

    async fn handle(&self, message: &InboundMessage) -> Result<Reply> {
        match parse_amount(&message.text) {
            Some(profit) if !self.config.brackets.is_empty() => {
                self.estimate(message, profit).await
            }
            _ => self.advise(message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FakeModel;

    fn bracket(min: f64, max: Option<f64>, rate: f64) -> TaxBracket {
        TaxBracket {
            min_income: min,
            max_income: max,
            rate,
        }
    }

    fn brackets() -> Vec<TaxBracket> {
        vec![
            bracket(50_000.0, None, 0.3),
            bracket(0.0, Some(10_000.0), 0.0),
            bracket(10_000.0, Some(50_000.0), 0.2),
        ]
    }

    fn config() -> TaxConfig {
        TaxConfig {
            region: Some("Freedonia".to_string()),
            brackets: brackets(),
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_progressive_brackets() {
        let b = brackets();
        assert_close(tax_from_brackets(0.0, &b), 0.0);
        assert_close(tax_from_brackets(8_000.0, &b), 0.0);
        // 40k at 20%
        assert_close(tax_from_brackets(50_000.0, &b), 8_000.0);
        // 8k + 30k at 30%
        assert_close(tax_from_brackets(80_000.0, &b), 17_000.0);
    }

    #[test]
    fn test_no_brackets_no_tax() {
        assert_eq!(tax_from_brackets(1_000_000.0, &[]), 0.0);
    }

    #[tokio::test]
    async fn test_estimate_with_explanation() {
        let llm = Arc::new(FakeModel::replying("Because brackets."));
        let handler = TaxHandler::new(llm.clone(), config());
        let reply = handler
            .handle(&InboundMessage::text("u", "tax on 80000"))
            .await
            .unwrap();
        assert!(reply.text.contains("Tax owed: 17,000.00"));
        assert!(reply.text.contains("Freedonia"));
        assert!(reply.text.ends_with("Because brackets."));
        assert!(llm.last_user_prompt().contains("Estimated tax: 17,000.00"));
    }

    #[tokio::test]
    async fn test_estimate_survives_llm_failure() {
        let handler = TaxHandler::new(Arc::new(FakeModel::failing("down")), config());
        let reply = handler
            .handle(&InboundMessage::text("u", "tax on 50000"))
            .await
            .unwrap();
        assert!(reply.text.contains("Tax owed: 8,000.00"));
        assert!(reply.text.contains("Explanation unavailable"));
    }

    #[tokio::test]
    async fn test_without_amount_asks_llm() {
        let llm = Arc::new(FakeModel::replying("File quarterly."));
        let handler = TaxHandler::new(llm.clone(), config());
        let reply = handler
            .handle(&InboundMessage::text("u", "Estimate tax for this quarter"))
            .await
            .unwrap();
        assert_eq!(reply.text, "File quarterly.");
        assert!(llm.last_user_prompt().contains("30.0%"));
    }

    #[tokio::test]
    async fn test_year_is_not_profit() {
        for text in ["Estimate tax for 2025", "tax for Q3 2026"] {
            let llm = Arc::new(FakeModel::replying("General advice."));
            let handler = TaxHandler::new(llm.clone(), config());
            let reply = handler
                .handle(&InboundMessage::text("u", text))
                .await
                .unwrap();
            assert_eq!(reply.text, "General advice.", "{}", text);
            assert!(!llm.last_user_prompt().contains("Annual net profit"));
        }
    }

    #[tokio::test]
    async fn test_advice_failure_propagates() {
        let handler = TaxHandler::new(Arc::new(FakeModel::failing("down")), config());
        assert!(handler
            .handle(&InboundMessage::text("u", "tax help"))
            .await
            .is_err());
    }
}
