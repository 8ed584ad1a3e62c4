pub mod intent;
pub mod patterns;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::handlers::{HandlerRegistry, IntentHandler, Reply};
use crate::platform::InboundMessage;

pub use intent::Intent;
pub use patterns::PatternTable;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("no handler registered for intent '{intent}'")]
    UnroutableIntent { intent: Intent },

    /// The chain stays in `source` for logs; Display names only the intent.
    #[error("{intent} handler failed")]
    Handler {
        intent: Intent,
        #[source]
        source: anyhow::Error,
    },
}

/// The routing decision for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteResult {
    pub intent: Intent,
    pub handler_id: &'static str,
}

/// A routed message together with what its handler answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub route: RouteResult,
    pub reply: Reply,
}

/// Classifies inbound messages and hands each to exactly one handler.
///
/// The pattern table is an immutable snapshot behind an `Arc`; `reload`
/// swaps the whole snapshot, so a message that already took its snapshot
/// finishes with it.
pub struct IntentRouter {
    table: RwLock<Arc<PatternTable>>,
    handlers: HandlerRegistry,
}

impl IntentRouter {
    /// Fails when any intent the router can produce has no handler.
    pub fn new(table: PatternTable, handlers: HandlerRegistry) -> Result<Self, RouteError> {
        if let Err(e) = check_routable(&table, &handlers) {
            error!("Router configuration error: {}", e);
            return Err(e);
        }
        info!(
            "Router ready: {} patterns, {} handlers",
            table.len(),
            handlers.len()
        );
        Ok(Self {
            table: RwLock::new(Arc::new(table)),
            handlers,
        })
    }

    /// Skips the handler check so tests can reach the unroutable path
    #[cfg(test)]
    pub(crate) fn new_unchecked(table: PatternTable, handlers: HandlerRegistry) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
            handlers,
        }
    }

    /// Replace the pattern table. An inconsistent table is rejected and the
    /// current one stays active.
    pub async fn reload(&self, table: PatternTable) -> Result<(), RouteError> {
        check_routable(&table, &self.handlers)?;
        let count = table.len();
        *self.table.write().await = Arc::new(table);
        info!("Pattern table reloaded ({} patterns)", count);
        Ok(())
    }

    async fn snapshot(&self) -> Arc<PatternTable> {
        self.table.read().await.clone()
    }

    /// Pick the single intent for a message. Attachments win over text.
    pub async fn classify(&self, message: &InboundMessage) -> Result<Intent, RouteError> {
        let table = self.snapshot().await;
        classify_with(&table, message)
    }

    /// Classify and resolve the handler without invoking it
    pub async fn route(&self, message: &InboundMessage) -> Result<RouteResult, RouteError> {
        let intent = self.classify(message).await?;
        let handler = self.handler_for(intent)?;
        Ok(RouteResult {
            intent,
            handler_id: handler.id(),
        })
    }

    fn handler_for(&self, intent: Intent) -> Result<&Arc<dyn IntentHandler>, RouteError> {
        self.handlers.get(intent).ok_or_else(|| {
            error!("Configuration error: no handler for intent '{}'", intent);
            RouteError::UnroutableIntent { intent }
        })
    }

    /// Route and invoke the handler. Handler errors come back as
    /// `RouteError::Handler` with the original error chain.
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<Dispatched, RouteError> {
        let route = self.route(message).await?;
        let intent = route.intent;
        let handler = self.handler_for(intent)?;
        debug!(
            "Routing message from {} to '{}' ({})",
            message.sender, route.handler_id, intent
        );

        let reply = handler
            .handle(message)
            .await
            .map_err(|source| RouteError::Handler { intent, source })?;

        Ok(Dispatched { route, reply })
    }
}

/// Pure classification against one table snapshot
pub fn classify_with(table: &PatternTable, message: &InboundMessage) -> Result<Intent, RouteError> {
    if message.attachment.is_some() {
        return Ok(Intent::InvoiceUpload);
    }
    if !message.has_text() {
        return Err(RouteError::InvalidMessage(
            "message has no text and no attachment".to_string(),
        ));
    }
    Ok(table.classify(&message.text).unwrap_or(Intent::Unknown))
}

fn check_routable(table: &PatternTable, handlers: &HandlerRegistry) -> Result<(), RouteError> {
    let reachable = table
        .intents()
        .into_iter()
        .chain([Intent::InvoiceUpload, Intent::Unknown]);
    for intent in reachable {
        if !handlers.contains(intent) {
            return Err(RouteError::UnroutableIntent { intent });
        }
    }
    Ok(())
}
