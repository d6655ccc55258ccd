//! Ephemeral per-tenant broadcast relay.
//!
//! Best-effort only: no durability, no ordering guarantee beyond FIFO per
//! channel, lagged receivers drop signals. Every signal also lands in the
//! durable feed, so a miss here costs latency, never correctness.

use crate::db::now_ms;
use crate::types::{Priority, WorkStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Compact "what changed" payloads pushed the instant a write commits.
///
/// Serialized with an `event` tag, e.g.
/// `{"event":"priority_changed","department_id":"...","priority":"high"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Signal {
    PriorityChanged {
        department_id: String,
        priority: Priority,
    },
    TaskStatusChanged {
        task_id: String,
        department_id: String,
        status: WorkStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        department_priority: Option<Priority>,
    },
}

impl Signal {
    pub fn event_name(&self) -> &'static str {
        match self {
            Signal::PriorityChanged { .. } => "priority_changed",
            Signal::TaskStatusChanged { .. } => "task_status_changed",
        }
    }
}

/// A signal plus the metadata receivers filter on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Client that performed the write; sessions drop their own envelopes.
    pub origin: String,
    pub channel: String,
    pub sent_at: i64,
    pub signal: Signal,
}

/// Channel name for a tenant. External contract; other services publishing
/// into the relay must use the same name.
pub fn channel_name(company_id: &str) -> String {
    format!("company-{company_id}-dept-priority")
}

/// In-process fan-out hub, one broadcast channel per tenant.
pub struct Relay {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<SignalEnvelope>>>,
}

impl Relay {
    /// Create a relay with the given per-channel buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, company_id: &str) -> broadcast::Sender<SignalEnvelope> {
        let name = channel_name(company_id);
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(name)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a signal to a tenant channel. Returns the number of
    /// receivers it reached; zero is not an error.
    pub fn publish(&self, company_id: &str, origin: &str, signal: Signal) -> usize {
        let tx = self.sender(company_id);
        let envelope = SignalEnvelope {
            origin: origin.to_string(),
            channel: channel_name(company_id),
            sent_at: now_ms(),
            signal,
        };

        tracing::debug!(
            event = envelope.signal.event_name(),
            channel = %envelope.channel,
            origin = %envelope.origin,
            "relay publish"
        );

        tx.send(envelope).unwrap_or(0)
    }

    /// Subscribe to a tenant channel. Each receiver gets its own stream.
    pub fn subscribe(&self, company_id: &str) -> broadcast::Receiver<SignalEnvelope> {
        self.sender(company_id).subscribe()
    }

    pub fn subscriber_count(&self, company_id: &str) -> usize {
        self.sender(company_id).receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_follows_contract() {
        assert_eq!(channel_name("acme"), "company-acme-dept-priority");
    }

    #[test]
    fn priority_changed_serializes_with_event_tag() {
        let signal = Signal::PriorityChanged {
            department_id: "d1".to_string(),
            priority: Priority::High,
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains(r#""event":"priority_changed""#));
        assert!(json.contains(r#""priority":"high""#));
    }

    #[test]
    fn task_status_changed_omits_absent_priority() {
        let signal = Signal::TaskStatusChanged {
            task_id: "t1".to_string(),
            department_id: "d1".to_string(),
            status: WorkStatus::InProgress,
            department_priority: None,
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains(r#""event":"task_status_changed""#));
        assert!(json.contains(r#""status":"in_progress""#));
        assert!(!json.contains("department_priority"));
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let relay = Relay::new(32);
        let mut rx1 = relay.subscribe("acme");
        let mut rx2 = relay.subscribe("acme");

        let delivered = relay.publish(
            "acme",
            "client-a",
            Signal::PriorityChanged {
                department_id: "d1".to_string(),
                priority: Priority::High,
            },
        );
        assert_eq!(delivered, 2);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.origin, "client-a");
        assert_eq!(e1.channel, "company-acme-dept-priority");
        assert_eq!(e1.signal, e2.signal);
    }

    #[tokio::test]
    async fn channels_are_tenant_isolated() {
        let relay = Relay::new(32);
        let mut other = relay.subscribe("other");

        relay.publish(
            "acme",
            "client-a",
            Signal::PriorityChanged {
                department_id: "d1".to_string(),
                priority: Priority::High,
            },
        );

        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let relay = Relay::new(32);
        let delivered = relay.publish(
            "acme",
            "client-a",
            Signal::TaskStatusChanged {
                task_id: "t1".to_string(),
                department_id: "d1".to_string(),
                status: WorkStatus::Completed,
                department_priority: Some(Priority::Normal),
            },
        );
        assert_eq!(delivered, 0);
    }
}
