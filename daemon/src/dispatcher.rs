/// The notification dispatcher: the single consumer of the [`MessageBuffer`].
///
/// Every message is fanned out to the chats configured at send time. In the
/// default mode one message is in flight at a time; background mode allows a
/// bounded number to overlap, so a full buffer still holds producers back.
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::buffer::{MessageBuffer, OutboundMessage};
use crate::state::ConfigState;
use crate::telegram::{DeliveryReport, TelegramBot};

/// Whether the dispatcher waits for one message's fan-out before taking the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// At most one message in flight; messages finish in FIFO order.
    #[default]
    AwaitCompletion,
    /// Each message is fanned out on its own task; later messages may finish first.
    /// At most `max_in_flight` messages are taken from the buffer at once.
    Background,
}

/// Default cap on overlapping messages in [`DispatchMode::Background`].
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// What happened to one message. Sent to the optional report sink.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub message: OutboundMessage,
    pub report: DeliveryReport,
}

/// Drains the [`MessageBuffer`] and delivers every message to the chats
/// currently configured in [`ConfigState`].
///
/// Failed destinations are logged and reported, never retried.
#[derive(Clone)]
pub struct NotificationDispatcher {
    buffer: Arc<MessageBuffer>,
    state: Arc<ConfigState>,
    bot: Arc<TelegramBot>,
    mode: DispatchMode,
    max_in_flight: usize,
    reports: Option<mpsc::UnboundedSender<DispatchRecord>>,
}

impl NotificationDispatcher {
    pub fn new(buffer: Arc<MessageBuffer>, state: Arc<ConfigState>, bot: Arc<TelegramBot>) -> Self {
        Self {
            buffer,
            state,
            bot,
            mode: DispatchMode::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            reports: None,
        }
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Caps overlapping messages in background mode. Clamped to at least 1.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Forwards a [`DispatchRecord`] for every processed message to `sink`.
    pub fn with_report_sink(mut self, sink: mpsc::UnboundedSender<DispatchRecord>) -> Self {
        self.reports = Some(sink);
        self
    }

    /// Delivers one message to every configured chat and waits for all attempts.
    pub async fn dispatch(&self, message: &OutboundMessage) -> DeliveryReport {
        let target = self.state.notification_target();
        if !target.is_configured() {
            warn!("Notification target is not configured; dropping message");
            return DeliveryReport::default();
        }

        let report = self.bot.send_message(&target, &message.text).await;
        if report.failed() == 0 {
            info!(
                delivered = report.delivered(),
                queued_at = %message.created_at.to_rfc3339(),
                "Message dispatched"
            );
        } else {
            warn!(
                delivered = report.delivered(),
                failed = report.failed(),
                "Message partially dispatched: {report}"
            );
        }
        report
    }

    async fn process(&self, message: OutboundMessage) {
        let report = self.dispatch(&message).await;
        if let Some(sink) = &self.reports {
            let _ = sink.send(DispatchRecord { message, report });
        }
    }

    /// Consumes messages until `stop` flips to `true` (or its sender is dropped).
    /// Messages already being delivered are finished before the loop exits.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(mode = ?self.mode, "Notification dispatcher started");
        let mut in_flight = JoinSet::new();

        loop {
            if *stop.borrow() {
                break;
            }

            // Leave messages in the buffer until a slot frees up.
            while in_flight.len() >= self.max_in_flight {
                if let Some(joined) = in_flight.join_next().await {
                    log_join(joined);
                }
            }

            let message = tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                message = self.buffer.get() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match self.mode {
                DispatchMode::AwaitCompletion => self.process(message).await,
                DispatchMode::Background => {
                    let this = self.clone();
                    in_flight.spawn(async move { this.process(message).await });
                }
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for in-flight messages");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
        info!("Notification dispatcher stopped");
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("Dispatch task failed: {e}");
    }
}
