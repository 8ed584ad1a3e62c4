use serde::{Deserialize, Serialize};

/// The closed set of things a message can be about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    InvoiceReminder,
    InvoiceUpload,
    Ledger,
    Loan,
    Tax,
    Unknown,
}

impl Intent {
    #[allow(dead_code)]
    pub const ALL: [Intent; 6] = [
        Intent::InvoiceReminder,
        Intent::InvoiceUpload,
        Intent::Ledger,
        Intent::Loan,
        Intent::Tax,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::InvoiceReminder => "invoice_reminder",
            Intent::InvoiceUpload => "invoice_upload",
            Intent::Ledger => "ledger",
            Intent::Loan => "loan",
            Intent::Tax => "tax",
            Intent::Unknown => "unknown",
        }
    }

    /// Outcomes the router produces on its own, never through a pattern.
    pub fn is_reserved(&self) -> bool {
        matches!(self, Intent::InvoiceUpload | Intent::Unknown)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_labels_match_display() {
        for intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent));
        }
    }

    #[test]
    fn test_reserved() {
        assert!(Intent::Unknown.is_reserved());
        assert!(Intent::InvoiceUpload.is_reserved());
        assert!(!Intent::Tax.is_reserved());
    }
}
