/// Messaging client for the Telegram Bot API.
///
/// One logical message is fanned out to every chat id of a
/// [`NotificationTarget`] concurrently. Each destination runs in its own task
/// under its own timeout; a failing, hanging or panicking destination never
/// affects its siblings. The outcome of every attempt is collected into a
/// [`DeliveryReport`].
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::NotificationTarget;
use crate::error::DeliveryError;
use crate::settings::Settings;

/// Sends a single message to a single chat.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Posts `text` to `chat_id` and returns the HTTP status code.
    async fn post_message(&self, token: &str, chat_id: &str, text: &str) -> Result<u16, DeliveryError>;
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// `POST {base_url}/bot{token}/sendMessage` over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, token)
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn post_message(&self, token: &str, chat_id: &str, text: &str) -> Result<u16, DeliveryError> {
        let response = self
            .client
            .post(self.endpoint(token))
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            // The URL embeds the bot token; keep it out of error messages.
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;
        Ok(response.status().as_u16())
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered { status } => write!(f, "delivered ({status})"),
            Self::Failed(e) => write!(f, "failed ({e})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub chat_id: String,
    pub outcome: DeliveryOutcome,
}

/// Per-destination outcomes for one message, in `chat_ids` order.
/// Duplicate chat ids keep one entry each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub results: Vec<DeliveryResult>,
}

impl DeliveryReport {
    /// Outcome of the first attempt for `chat_id`.
    pub fn outcome(&self, chat_id: &str) -> Option<&DeliveryOutcome> {
        self.results
            .iter()
            .find(|r| r.chat_id == chat_id)
            .map(|r| &r.outcome)
    }

    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.delivered()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for r in &self.results {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}: {}", r.chat_id, r.outcome)?;
        }
        Ok(())
    }
}

/// Fans messages out to every chat of a notification target.
pub struct TelegramBot {
    transport: Arc<dyn ChatTransport>,
    timeout: Duration,
}

impl TelegramBot {
    pub fn new(transport: Arc<dyn ChatTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Builds a bot that talks HTTP to the endpoint named in `settings`.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sitespy/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(
            Arc::new(HttpTransport::new(client, settings.api_base_url())),
            settings.send_timeout(),
        ))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delivers `text` to every chat in `target` concurrently and waits until
    /// each attempt has succeeded, failed or timed out.
    pub async fn send_message(&self, target: &NotificationTarget, text: &str) -> DeliveryReport {
        let token: Arc<str> = Arc::from(target.token());
        let text: Arc<str> = Arc::from(text);

        let attempts: Vec<(String, JoinHandle<DeliveryOutcome>)> = target
            .chat_ids()
            .iter()
            .map(|chat_id| {
                let transport = Arc::clone(&self.transport);
                let token = Arc::clone(&token);
                let text = Arc::clone(&text);
                let chat = chat_id.clone();
                let timeout = self.timeout;
                let handle = tokio::spawn(async move {
                    deliver(transport.as_ref(), &token, &chat, &text, timeout).await
                });
                (chat_id.clone(), handle)
            })
            .collect();

        let mut results = Vec::with_capacity(attempts.len());
        for (chat_id, handle) in attempts {
            let outcome = handle.await.unwrap_or_else(|e| {
                DeliveryOutcome::Failed(DeliveryError::Transport(format!("delivery task failed: {e}")))
            });
            if let DeliveryOutcome::Failed(e) = &outcome {
                warn!(chat_id = %chat_id, "Delivery failed: {e}");
            }
            results.push(DeliveryResult { chat_id, outcome });
        }
        DeliveryReport { results }
    }

    /// Like [`TelegramBot::send_message`] but returns immediately; the report
    /// is available from the returned handle.
    pub fn send_message_in_background(
        self: &Arc<Self>,
        target: NotificationTarget,
        text: String,
    ) -> JoinHandle<DeliveryReport> {
        let bot = Arc::clone(self);
        tokio::spawn(async move { bot.send_message(&target, &text).await })
    }
}

async fn deliver(
    transport: &dyn ChatTransport,
    token: &str,
    chat_id: &str,
    text: &str,
    timeout: Duration,
) -> DeliveryOutcome {
    match tokio::time::timeout(timeout, transport.post_message(token, chat_id, text)).await {
        Ok(Ok(status)) if (200..300).contains(&status) => {
            debug!(chat_id, status, "Message delivered");
            DeliveryOutcome::Delivered { status }
        }
        Ok(Ok(status)) => DeliveryOutcome::Failed(DeliveryError::Status(status)),
        Ok(Err(e)) => DeliveryOutcome::Failed(e),
        Err(_) => DeliveryOutcome::Failed(DeliveryError::Timeout(timeout)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Behavior {
        Status(u16),
        TransportError,
        Hang,
        Panic,
    }

    /// In-memory transport answering per chat id; unknown chats get 200.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        behaviors: HashMap<String, Behavior>,
        pub(crate) calls: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeTransport {
        pub(crate) fn with(mut self, chat_id: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(chat_id.to_string(), behavior);
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn post_message(&self, token: &str, chat_id: &str, text: &str) -> Result<u16, DeliveryError> {
            self.calls
                .lock()
                .unwrap()
                .push((token.to_string(), chat_id.to_string(), text.to_string()));
            match self.behaviors.get(chat_id).copied().unwrap_or(Behavior::Status(200)) {
                Behavior::Status(code) => Ok(code),
                Behavior::TransportError => Err(DeliveryError::Transport("connection reset".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(200)
                }
                Behavior::Panic => panic!("transport blew up"),
            }
        }
    }
}
