pub mod whatsapp;

use anyhow::Result;
use async_trait::async_trait;

/// A file the sender attached (an invoice photo, a PDF, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Where the transport hosts the media
    pub url: String,
    /// MIME type as reported by the transport, if any
    pub content_type: Option<String>,
}

/// A message received from the messaging platform.
/// Immutable once built; routed once and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Opaque sender identifier, e.g. "whatsapp:+15551234567"
    pub sender: String,
    /// Raw text body, possibly empty
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl InboundMessage {
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, url: impl Into<String>, content_type: Option<&str>) -> Self {
        self.attachment = Some(Attachment {
            url: url.into(),
            content_type: content_type.map(str::to_string),
        });
        self
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Outbound side of the platform, for messages the service starts itself
/// (reminders). Replies to inbound messages go back on the webhook response.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<()>;
}

/// Messenger used when no transport credentials are configured
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        tracing::info!("(no transport configured) message to {}: {}", to, body);
        Ok(())
    }
}
