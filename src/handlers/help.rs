use anyhow::Result;
use async_trait::async_trait;

use super::{IntentHandler, Reply};
use crate::platform::InboundMessage;
use crate::router::Intent;

pub const HELP_TEXT: &str = "I didn't understand that.\n\
Try:\n\
- send a photo of an invoice to track it\n\
- 'due 15-08-2026' to set the due date of your last upload\n\
- 'invoices' to see what is due soon\n\
- 'paid 15-08-2026' once you have paid that invoice\n\
- 'forecast my cash flow' for a cash-flow outlook\n\
- 'loan' for financing options\n\
- 'tax on 85000' to estimate tax";

/// Fallback for messages nothing in the pattern table matched
pub struct HelpHandler;

#[async_trait]
impl IntentHandler for HelpHandler {
    fn id(&self) -> &'static str {
        "help"
    }

    fn intent(&self) -> Intent {
        Intent::Unknown
    }

    async fn handle(&self, _message: &InboundMessage) -> Result<Reply> {
        Ok(Reply::new(HELP_TEXT))
    }
}
