use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{IntentHandler, Reply};
use crate::llm::{ChatMessage, ChatModel};
use crate::platform::InboundMessage;
use crate::router::Intent;

const SYSTEM_PROMPT: &str = "You advise small-business owners on financing: \
bank loans, government-backed small-business programs, invoice financing and \
credit lines. Ask for the country if it matters and was not given. \
Keep answers under eight short lines and never promise approval.";

pub struct LoanHandler {
    llm: Arc<dyn ChatModel>,
}

impl LoanHandler {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl IntentHandler for LoanHandler {
    fn id(&self) -> &'static str {
        "loan"
    }

    fn intent(&self) -> Intent {
        Intent::Loan
    }

    async fn handle(&self, message: &InboundMessage) -> Result<Reply> {
        let answer = self
            .llm
            .complete(&[
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(message.text.trim()),
            ])
            .await
            .context("Loan advice request failed")?;
        Ok(Reply::new(answer.trim()))
    }
}
