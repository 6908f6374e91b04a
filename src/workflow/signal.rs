use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::history::{DurableRecord, RecordKind};
use super::journal::InstanceLog;

/// A signal accepted into an instance's mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Client supplied id; redelivery with the same id is a no-op
    pub delivery_id: String,

    /// Target instance
    pub instance_id: String,

    /// Name of the signal
    pub name: String,

    /// Payload for the signal
    pub payload: Value,

    /// Per-instance arrival order
    pub arrival_seq: u64,

    /// Time the signal was durably received
    pub received_at: DateTime<Utc>,
}

impl SignalEnvelope {
    /// Deserialize the payload into a typed value
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone())
    }

    fn from_record(instance_id: &str, record: &DurableRecord) -> Option<Self> {
        match &record.kind {
            RecordKind::SignalReceived {
                delivery_id,
                arrival_seq,
                name,
                payload,
            } => Some(Self {
                delivery_id: delivery_id.clone(),
                instance_id: instance_id.to_string(),
                name: name.clone(),
                payload: payload.clone(),
                arrival_seq: *arrival_seq,
                received_at: record.recorded_at,
            }),
            _ => None,
        }
    }
}

/// Result of delivering a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    /// Durably recorded with this arrival sequence
    Accepted {
        /// Arrival sequence assigned to the envelope
        arrival_seq: u64,
    },
    /// The delivery id was seen before; nothing changed
    Duplicate,
}

/// Generate a fresh delivery id
pub fn new_delivery_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Default)]
struct MailboxInner {
    queues: HashMap<String, VecDeque<SignalEnvelope>>,
    seen: HashSet<String>,
    next_arrival: u64,
    closed: bool,
}

/// Durable, ordered inbox of one workflow instance.
///
/// Delivery appends `SIGNAL_RECEIVED` before the envelope becomes visible to
/// the workflow. Envelopes are handed out FIFO per signal name to the single
/// consumer, which is resumed through a [`Notify`] rather than polling.
#[derive(Debug)]
pub struct Mailbox {
    instance_id: String,
    inner: Mutex<MailboxInner>,
    notify: Notify,
}

impl Mailbox {
    /// An empty mailbox
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            inner: Mutex::new(MailboxInner {
                next_arrival: 1,
                ..Default::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Rebuild a mailbox from history. Every received envelope is queued
    /// again so replayed wait points take them in the original order.
    pub fn restore(instance_id: &str, history: &[DurableRecord]) -> Self {
        let mut inner = MailboxInner {
            next_arrival: 1,
            ..Default::default()
        };

        for envelope in history
            .iter()
            .filter_map(|r| SignalEnvelope::from_record(instance_id, r))
        {
            inner.seen.insert(envelope.delivery_id.clone());
            inner.next_arrival = inner.next_arrival.max(envelope.arrival_seq + 1);
            inner
                .queues
                .entry(envelope.name.clone())
                .or_default()
                .push_back(envelope);
        }

        Self {
            instance_id: instance_id.to_string(),
            inner: Mutex::new(inner),
            notify: Notify::new(),
        }
    }

    /// Durably accept a signal
    #[instrument(skip(self, log, payload), fields(instance_id = %self.instance_id))]
    pub(crate) async fn deliver(
        &self,
        log: &InstanceLog,
        delivery_id: String,
        name: &str,
        payload: Value,
    ) -> Result<SignalDelivery> {
        let mut inner = self.inner.lock().await;

        if inner.closed {
            return Err(Error::InstanceClosed(self.instance_id.clone()));
        }
        if inner.seen.contains(&delivery_id) {
            debug!("Ignoring duplicate delivery {} of {}", delivery_id, name);
            return Ok(SignalDelivery::Duplicate);
        }

        let arrival_seq = inner.next_arrival;
        let record = log
            .append(RecordKind::SignalReceived {
                delivery_id: delivery_id.clone(),
                arrival_seq,
                name: name.to_string(),
                payload,
            })
            .await?;

        if let Some(envelope) = SignalEnvelope::from_record(&self.instance_id, &record) {
            inner.queues.entry(name.to_string()).or_default().push_back(envelope);
        }
        inner.seen.insert(delivery_id);
        inner.next_arrival += 1;
        drop(inner);

        self.notify.notify_one();
        debug!("Accepted signal {} #{}", name, arrival_seq);
        Ok(SignalDelivery::Accepted { arrival_seq })
    }

    /// Take the next envelope for `name`, suspending until one arrives.
    /// Returns `None` if `cancel` fires first.
    pub async fn next(&self, name: &str, cancel: &CancellationToken) -> Option<SignalEnvelope> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(envelope) = inner.queues.get_mut(name).and_then(|q| q.pop_front()) {
                    return Some(envelope);
                }
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Number of queued envelopes for `name`
    pub async fn pending(&self, name: &str) -> usize {
        self.inner
            .lock()
            .await
            .queues
            .get(name)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Reject further deliveries
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
    }

    /// Whether a delivery id was already accepted
    pub async fn has_seen(&self, delivery_id: &str) -> bool {
        self.inner.lock().await.seen.contains(delivery_id)
    }
}
