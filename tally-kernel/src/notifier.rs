//! Rule-indexed dispatch of change events to delivery channels.
//!
//! Rules are appended at startup (from durable storage and config) and read
//! concurrently afterwards. The notifier consumes the event-bus stream and
//! never fails the data path: a channel that cannot deliver only logs.

use crate::bus::BusMessage;
use crate::models::{AlertRule, ChangeEvent, NotifyChannel};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct Notifier {
    rules: Vec<AlertRule>,
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            rules: Vec::new(),
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    /// Append a rule. Disabled rules are skipped at evaluation time.
    pub fn add_rule(&mut self, rule: AlertRule) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate every rule against the event and dispatch each match to
    /// its channels.
    pub async fn evaluate(&self, event: &ChangeEvent) {
        for rule in &self.rules {
            if !rule.enabled || !rule_matches(rule, event) {
                continue;
            }
            info!(rule = %rule.name, action = %event.action, "alert rule matched");
            for channel in &rule.channels {
                match channel {
                    NotifyChannel::Webhook => self.send_webhook(event).await,
                    NotifyChannel::Email => {
                        // Channel stub; SMTP delivery is outside the core.
                        debug!(rule = %rule.name, "email channel not implemented");
                    }
                    NotifyChannel::Telegram => {
                        debug!(rule = %rule.name, "telegram channel not implemented");
                    }
                }
            }
        }
    }

    async fn send_webhook(&self, event: &ChangeEvent) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(event)
            .send()
            .await;

        match response {
            Ok(resp) if !resp.status().is_success() => {
                warn!(url = %url, status = %resp.status(), "webhook returned non-success");
            }
            Ok(_) => {}
            Err(e) => warn!(url = %url, error = %e, "webhook delivery failed"),
        }
    }
}

/// A rule matches when its action allow-list contains the event's action
/// and its source allow-list is empty or contains the event's source.
pub fn rule_matches(rule: &AlertRule, event: &ChangeEvent) -> bool {
    if !rule.actions.iter().any(|a| a == event.action.as_str()) {
        return false;
    }
    rule.sources.is_empty() || rule.sources.iter().any(|s| s == &event.source)
}

/// Wire the bus stream into the notifier: deserialize each payload and
/// evaluate. Runs until the sending side closes or the task is aborted.
pub fn spawn_event_listener(
    mut events: mpsc::UnboundedReceiver<BusMessage>,
    notifier: Arc<Notifier>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((subject, payload)) = events.recv().await {
            match serde_json::from_slice::<ChangeEvent>(&payload) {
                Ok(event) => notifier.evaluate(&event).await,
                Err(e) => {
                    warn!(subject = %subject, error = %e, "unparsable change event on bus");
                }
            }
        }
    })
}
