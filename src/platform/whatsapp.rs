//! WhatsApp over Twilio: the inbound webhook server and the REST sender.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::{error, info, warn};

use super::{InboundMessage, Messenger};
use crate::config::TwilioConfig;
use crate::router::{IntentRouter, RouteError};

/// WhatsApp caps a single message body
const MAX_REPLY_CHARS: usize = 1600;

const SIGNATURE_HEADER: &str = "x-twilio-signature";

const WEBHOOK_PATH: &str = "/whatsapp";

/// The subset of Twilio's webhook form we care about
#[derive(Debug, Default)]
pub struct TwilioWebhook {
    pub from: String,
    pub body: String,
    pub media_url: Option<String>,
    pub media_content_type: Option<String>,
}

impl TwilioWebhook {
    /// Pick the known fields out of the raw form; the rest are ignored.
    pub fn from_fields(fields: &[(String, String)]) -> Self {
        let mut payload = Self::default();
        for (key, value) in fields {
            match key.as_str() {
                "From" => payload.from = value.clone(),
                "Body" => payload.body = value.clone(),
                "MediaUrl0" => payload.media_url = Some(value.clone()),
                "MediaContentType0" => payload.media_content_type = Some(value.clone()),
                _ => {}
            }
        }
        payload
    }

    pub fn into_message(self) -> InboundMessage {
        let message = InboundMessage::text(self.from, self.body);
        match self.media_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => message.with_attachment(url, self.media_content_type.as_deref()),
            None => message,
        }
    }
}

/// Checks `X-Twilio-Signature`: base64 HMAC-SHA1, keyed with the auth
/// token, over the webhook URL followed by every form field as key+value
/// in key order.
pub struct SignatureVerifier {
    auth_token: String,
    webhook_url: Option<String>,
}

impl SignatureVerifier {
    pub fn new(config: &TwilioConfig) -> Self {
        Self {
            auth_token: config.auth_token.clone(),
            webhook_url: config.webhook_url.clone(),
        }
    }

    fn url_for(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(url) = &self.webhook_url {
            return Some(url.clone());
        }
        let host = headers.get(header::HOST)?.to_str().ok()?;
        Some(format!("https://{}{}", host, WEBHOOK_PATH))
    }

    fn mac(&self, url: &str, fields: &[(String, String)]) -> Option<Hmac<Sha1>> {
        let mut sorted: Vec<&(String, String)> = fields.iter().collect();
        sorted.sort();

        let mut mac = Hmac::<Sha1>::new_from_slice(self.auth_token.as_bytes()).ok()?;
        mac.update(url.as_bytes());
        for (key, value) in sorted {
            mac.update(key.as_bytes());
            mac.update(value.as_bytes());
        }
        Some(mac)
    }

    /// Signature Twilio would send for this request
    pub fn sign(&self, url: &str, fields: &[(String, String)]) -> Option<String> {
        let mac = self.mac(url, fields)?;
        Some(STANDARD.encode(mac.finalize().into_bytes()))
    }

    pub fn verify(&self, headers: &HeaderMap, fields: &[(String, String)]) -> bool {
        let Some(signature) = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let Ok(expected) = STANDARD.decode(signature.trim()) else {
            return false;
        };
        let Some(url) = self.url_for(headers) else {
            return false;
        };
        match self.mac(&url, fields) {
            Some(mac) => mac.verify_slice(&expected).is_ok(),
            None => false,
        }
    }
}

/// Shared by every webhook request
#[derive(Clone)]
pub struct WebhookState {
    pub router: Arc<IntentRouter>,
    /// None when `[twilio]` is not configured
    pub signatures: Option<Arc<SignatureVerifier>>,
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Trim to the platform limit on a char boundary
fn truncate_reply(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// TwiML document that answers the sender with one message
pub fn twiml(reply: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        escape_xml(truncate_reply(reply, MAX_REPLY_CHARS))
    )
}

fn twiml_response(status: StatusCode, reply: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/xml")],
        twiml(reply),
    )
        .into_response()
}

async fn handle_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    if let Some(verifier) = &state.signatures {
        if !verifier.verify(&headers, &fields) {
            warn!("Rejected webhook call with a missing or invalid Twilio signature");
            return (StatusCode::FORBIDDEN, "invalid signature").into_response();
        }
    }

    let message = TwilioWebhook::from_fields(&fields).into_message();
    info!(
        "WhatsApp message from {}: {:?} (attachment: {})",
        message.sender,
        message.text,
        message.attachment.is_some()
    );

    match state.router.dispatch(&message).await {
        Ok(dispatched) => {
            info!(
                "Handled by '{}' as {}",
                dispatched.route.handler_id, dispatched.route.intent
            );
            twiml_response(StatusCode::OK, &dispatched.reply.text)
        }
        Err(RouteError::InvalidMessage(reason)) => {
            warn!("Rejected message from {}: {}", message.sender, reason);
            (StatusCode::BAD_REQUEST, reason).into_response()
        }
        Err(e @ RouteError::UnroutableIntent { .. }) => {
            error!("Configuration error while routing: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(RouteError::Handler { intent, source }) => {
            error!("Error processing {} message: {:#}", intent, source);
            twiml_response(
                StatusCode::OK,
                &format!(
                    "Error: {} handler failed. Please try again later.",
                    intent
                ),
            )
        }
    }
}

pub fn app(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(handle_webhook))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the webhook until ctrl-c
pub async fn serve(bind: SocketAddr, state: WebhookState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("WhatsApp webhook listening on http://{}{}", bind, WEBHOOK_PATH);
    if state.signatures.is_none() {
        warn!("No [twilio] section: webhook signatures are not checked");
    }

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Sends WhatsApp messages through Twilio's Messages API
pub struct TwilioMessenger {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioMessenger {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Messenger for TwilioMessenger {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.config.base_url, self.config.account_sid
        );
        let body = truncate_reply(body, MAX_REPLY_CHARS);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .context("Failed to send request to Twilio")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Twilio API error ({}): {}", status, error_body);
        }
        Ok(())
    }
}
