pub mod help;
pub mod invoices;
pub mod ledger;
pub mod loan;
pub mod tax;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::platform::InboundMessage;
use crate::router::Intent;

/// What a handler wants sent back to the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One implementation per intent. The message is passed through untouched;
/// whatever the handler reports (including failure) reaches the caller.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// Stable identifier reported in route results and logs
    fn id(&self) -> &'static str;

    fn intent(&self) -> Intent;

    async fn handle(&self, message: &InboundMessage) -> Result<Reply>;
}

/// Intent -> handler lookup, fixed once the router is built
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<Intent, Arc<dyn IntentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own intent, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn IntentHandler>) {
        info!("Registered handler '{}' for {}", handler.id(), handler.intent());
        self.handlers.insert(handler.intent(), handler);
    }

    pub fn get(&self, intent: Intent) -> Option<&Arc<dyn IntentHandler>> {
        self.handlers.get(&intent)
    }

    pub fn contains(&self, intent: Intent) -> bool {
        self.handlers.contains_key(&intent)
    }

    #[allow(dead_code)]
    pub fn intents(&self) -> Vec<Intent> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// First amount-looking number in free text ("1,250.50", "$900", "85000").
/// Tokens that are part of a date are skipped, and so is a bare year such as
/// "2025" unless it carries a currency sign.
pub(crate) fn parse_amount(text: &str) -> Option<f64> {
    text.split_whitespace()
        .filter(|word| !looks_like_date(word))
        .find_map(|word| {
            let unprefixed = word.trim_start_matches(['$', '€', '£', '₹', '(']);
            if !unprefixed.starts_with(|c: char| c.is_ascii_digit()) {
                return None;
            }
            let digits = unprefixed.trim_matches(|c: char| !c.is_ascii_digit());
            let has_currency = unprefixed.len() != word.len();
            if !has_currency && looks_like_year(digits) {
                return None;
            }
            let cleaned: String = digits.chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
        })
}

fn looks_like_year(digits: &str) -> bool {
    digits.len() == 4
        && digits.chars().all(|c| c.is_ascii_digit())
        && digits
            .parse::<u32>()
            .is_ok_and(|year| (1900..=2100).contains(&year))
}

fn looks_like_date(word: &str) -> bool {
    let digits_and_separators = word
        .trim_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .all(|c| c.is_ascii_digit() || c == '-' || c == '/');
    digits_and_separators && (word.contains('-') || word.contains('/'))
}

/// "1,234.50"
pub(crate) fn format_money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}{}.{:02}", sign, grouped, frac)
}
