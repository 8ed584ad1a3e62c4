//! Ordered keyword/phrase table used to classify message text.
//!
//! Pattern file format:
//! ```toml
//! [[patterns]]
//! pattern = "cash flow"
//! intent = "ledger"
//! ```
//! Entries are tried top to bottom and the first hit wins, so put the more
//! specific phrases first.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use super::intent::Intent;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PatternEntry {
    pub pattern: String,
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CompiledPattern {
    tokens: Vec<String>,
    intent: Intent,
}

/// Read-only after construction; swap a whole new table to change it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTable {
    entries: Vec<CompiledPattern>,
}

#[derive(Deserialize)]
struct PatternFile {
    #[serde(default)]
    patterns: Vec<PatternEntry>,
}

const DEFAULT_PATTERNS: &[(&str, Intent)] = &[
    ("tax", Intent::Tax),
    ("vat", Intent::Tax),
    ("gst", Intent::Tax),
    ("loan", Intent::Loan),
    ("credit line", Intent::Loan),
    ("borrow", Intent::Loan),
    ("financing", Intent::Loan),
    ("paid", Intent::InvoiceReminder),
    ("remind", Intent::InvoiceReminder),
    ("reminder", Intent::InvoiceReminder),
    ("reminders", Intent::InvoiceReminder),
    ("due", Intent::InvoiceReminder),
    ("overdue", Intent::InvoiceReminder),
    ("invoice", Intent::InvoiceReminder),
    ("invoices", Intent::InvoiceReminder),
    ("cash flow", Intent::Ledger),
    ("cashflow", Intent::Ledger),
    ("forecast", Intent::Ledger),
    ("predict", Intent::Ledger),
    ("ledger", Intent::Ledger),
    ("balance", Intent::Ledger),
    ("what if", Intent::Ledger),
    ("simulate", Intent::Ledger),
];

/// Lowercased alphanumeric runs; everything else separates words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl PatternTable {
    pub fn new(entries: Vec<PatternEntry>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            if entry.intent.is_reserved() {
                anyhow::bail!(
                    "pattern #{} ({:?}) maps to reserved intent '{}'",
                    index + 1,
                    entry.pattern,
                    entry.intent
                );
            }
            let tokens = tokenize(&entry.pattern);
            if tokens.is_empty() {
                anyhow::bail!(
                    "pattern #{} ({:?}) has no words to match",
                    index + 1,
                    entry.pattern
                );
            }
            compiled.push(CompiledPattern {
                tokens,
                intent: entry.intent,
            });
        }
        Ok(Self { entries: compiled })
    }

    /// Built-in table used when no pattern file is configured
    pub fn builtin() -> Self {
        let entries = DEFAULT_PATTERNS
            .iter()
            .map(|(pattern, intent)| CompiledPattern {
                tokens: tokenize(pattern),
                intent: *intent,
            })
            .collect();
        Self { entries }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: PatternFile = toml::from_str(content).context("Invalid pattern table")?;
        Self::new(file.patterns)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pattern file: {}", path.display()))?;
        let table = Self::from_toml(&content)
            .with_context(|| format!("Failed to load pattern file: {}", path.display()))?;
        info!("Loaded {} patterns from {}", table.len(), path.display());
        Ok(table)
    }

    /// Intent of the first entry whose phrase occurs in `text`
    pub fn classify(&self, text: &str) -> Option<Intent> {
        let words = tokenize(text);
        self.entries
            .iter()
            .find(|entry| contains_phrase(&words, &entry.tokens))
            .map(|entry| entry.intent)
    }

    /// Every intent some entry can produce, deduplicated, in first-seen order
    pub fn intents(&self) -> Vec<Intent> {
        let mut seen = Vec::new();
        for entry in &self.entries {
            if !seen.contains(&entry.intent) {
                seen.push(entry.intent);
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    words.windows(phrase.len()).any(|window| window == phrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pattern: &str, intent: Intent) -> PatternEntry {
        PatternEntry {
            pattern: pattern.to_string(),
            intent,
        }
    }

    #[test]
    fn test_tokenize_lowercases_and_splits_punctuation() {
        assert_eq!(
            tokenize("Forecast my CASH-flow, please!"),
            vec!["forecast", "my", "cash", "flow", "please"]
        );
    }

    #[test]
    fn test_builtin_examples() {
        let table = PatternTable::builtin();
        assert_eq!(
            table.classify("Estimate tax for this quarter"),
            Some(Intent::Tax)
        );
        assert_eq!(
            table.classify("Forecast my cash flow for August"),
            Some(Intent::Ledger)
        );
        assert_eq!(table.classify("asdkjh"), None);
        assert_eq!(
            table.classify("paid 15-08-2026"),
            Some(Intent::InvoiceReminder)
        );
    }

    #[test]
    fn test_matches_whole_words_only() {
        let table = PatternTable::builtin();
        assert_eq!(table.classify("fix the syntax"), None);
        assert_eq!(table.classify("TAX?"), Some(Intent::Tax));
    }

    #[test]
    fn test_phrase_must_be_contiguous() {
        let table = PatternTable::new(vec![entry("cash flow", Intent::Ledger)]).unwrap();
        assert_eq!(table.classify("my cash flow"), Some(Intent::Ledger));
        assert_eq!(table.classify("cash and flow"), None);
    }

    #[test]
    fn test_earlier_entry_wins() {
        let table = PatternTable::new(vec![
            entry("tax", Intent::Tax),
            entry("cash flow", Intent::Ledger),
        ])
        .unwrap();
        assert_eq!(
            table.classify("how does tax affect my cash flow"),
            Some(Intent::Tax)
        );

        let reversed = PatternTable::new(vec![
            entry("cash flow", Intent::Ledger),
            entry("tax", Intent::Tax),
        ])
        .unwrap();
        assert_eq!(
            reversed.classify("how does tax affect my cash flow"),
            Some(Intent::Ledger)
        );
    }

    #[test]
    fn test_from_toml_keeps_order() {
        let table = PatternTable::from_toml(
            r#"
            [[patterns]]
            pattern = "loan"
            intent = "loan"

            [[patterns]]
            pattern = "invoice"
            intent = "invoice_reminder"
            "#,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.intents(), vec![Intent::Loan, Intent::InvoiceReminder]);
        assert_eq!(
            table.classify("loan against this invoice"),
            Some(Intent::Loan)
        );
    }

    #[test]
    fn test_unknown_label_rejected() {
        let err = PatternTable::from_toml(
            r#"
            [[patterns]]
            pattern = "weather"
            intent = "weather"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_blank_pattern_rejected() {
        let err = PatternTable::new(vec![entry("  -- ", Intent::Tax)]).unwrap_err();
        assert!(err.to_string().contains("no words"));
    }

    #[test]
    fn test_reserved_intent_rejected() {
        assert!(PatternTable::new(vec![entry("hello", Intent::Unknown)]).is_err());
        assert!(PatternTable::new(vec![entry("photo", Intent::InvoiceUpload)]).is_err());
    }

    #[test]
    fn test_builtin_has_no_reserved_intents() {
        let table = PatternTable::builtin();
        assert!(!table.is_empty());
        assert!(table.intents().iter().all(|i| !i.is_reserved()));
    }
}
