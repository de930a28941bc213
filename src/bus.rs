//! Publish/subscribe transport boundary and an in-process implementation.
//!
//! A [`Transport`] routes records by (gateway address, topic). Each subscriber
//! gets its own bounded queue; a publish into a full queue drops the record for
//! that subscriber only and counts the drop, which the subscriber sees as
//! [`ClientError::ChannelOverflow`] on its next read.

use crate::error::ClientError;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

pub trait Transport: Send + Sync {
    /// Publishes `record` on `topic`. Returns how many subscribers queued it.
    fn publish(&self, gateway: &str, topic: &str, record: &str) -> Result<usize, ClientError>;

    /// Opens a queue of `capacity` records on `topic`.
    fn subscribe(&self, gateway: &str, topic: &str, capacity: usize) -> Result<Inbox, ClientError>;
}

/// Outcome of offering a record to one subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Queued,
    Dropped,
    Closed,
}

/// Sending half of one subscriber's queue.
#[derive(Debug)]
pub struct Outlet {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl Outlet {
    pub fn offer(&self, record: &str) -> Offer {
        match self.tx.try_send(record.to_string()) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }
}

/// Receiving half of one subscriber's queue.
#[derive(Debug)]
pub struct Inbox {
    topic: String,
    rx: mpsc::Receiver<String>,
    dropped: Arc<AtomicU64>,
}

impl Inbox {
    /// Creates a connected queue pair. `capacity` must be positive.
    pub fn channel(topic: &str, capacity: usize) -> Result<(Outlet, Inbox), ClientError> {
        if capacity == 0 {
            return Err(ClientError::unavailable(topic, "capacity must be positive"));
        }
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        Ok((
            Outlet {
                tx,
                dropped: Arc::clone(&dropped),
            },
            Inbox {
                topic: topic.to_string(),
                rx,
                dropped,
            },
        ))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Oldest queued record, `None` if nothing is queued. Reports (and resets)
    /// any drops since the previous read before delivering further records.
    pub fn try_next(&mut self) -> Result<Option<String>, ClientError> {
        let dropped = self.dropped.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            return Err(ClientError::ChannelOverflow {
                topic: self.topic.clone(),
                dropped,
            });
        }
        match self.rx.try_recv() {
            Ok(record) => Ok(Some(record)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(ClientError::unavailable(&self.topic, "transport closed"))
            }
        }
    }
}

type TopicTable = HashMap<String, Vec<Outlet>>;

/// In-process transport. Gateways must be bound before use.
#[derive(Debug, Default)]
pub struct InProcessBus {
    gateways: Mutex<HashMap<String, TopicTable>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, gateway: &str) {
        let mut guard = self.gateways.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(gateway.to_string()).or_default();
    }

    /// Removes a gateway; its subscribers observe a closed transport.
    pub fn unbind(&self, gateway: &str) {
        let mut guard = self.gateways.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(gateway);
    }

    pub fn subscriber_count(&self, gateway: &str, topic: &str) -> usize {
        let guard = self.gateways.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(gateway)
            .and_then(|topics| topics.get(topic))
            .map(|outlets| outlets.len())
            .unwrap_or(0)
    }
}

impl Transport for InProcessBus {
    fn publish(&self, gateway: &str, topic: &str, record: &str) -> Result<usize, ClientError> {
        let mut guard = self.gateways.lock().unwrap_or_else(PoisonError::into_inner);
        let topics = guard
            .get_mut(gateway)
            .ok_or_else(|| ClientError::unavailable(topic, format!("gateway {} not bound", gateway)))?;
        let Some(outlets) = topics.get_mut(topic) else {
            return Ok(0);
        };
        let mut queued = 0;
        outlets.retain(|outlet| match outlet.offer(record) {
            Offer::Queued => {
                queued += 1;
                true
            }
            Offer::Dropped => {
                warn!("subscriber queue full topic={} record dropped", topic);
                true
            }
            Offer::Closed => false,
        });
        debug!("published topic={} subscribers={}", topic, queued);
        Ok(queued)
    }

    fn subscribe(&self, gateway: &str, topic: &str, capacity: usize) -> Result<Inbox, ClientError> {
        let mut guard = self.gateways.lock().unwrap_or_else(PoisonError::into_inner);
        let topics = guard
            .get_mut(gateway)
            .ok_or_else(|| ClientError::unavailable(topic, format!("gateway {} not bound", gateway)))?;
        let (outlet, inbox) = Inbox::channel(topic, capacity)?;
        topics.entry(topic.to_string()).or_default().push(outlet);
        Ok(inbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber_of_topic() {
        let bus = InProcessBus::new();
        bus.bind("gw");
        let mut a = bus.subscribe("gw", "AA_RELEASE_BOOK", 4).unwrap();
        let mut b = bus.subscribe("gw", "AA_RELEASE_BOOK", 4).unwrap();
        let mut other = bus.subscribe("gw", "AB_RELEASE_BOOK", 4).unwrap();
        assert_eq!(bus.publish("gw", "AA_RELEASE_BOOK", "x").unwrap(), 2);
        assert_eq!(a.try_next().unwrap().as_deref(), Some("x"));
        assert_eq!(b.try_next().unwrap().as_deref(), Some("x"));
        assert_eq!(other.try_next().unwrap(), None);
    }

    #[test]
    fn unknown_gateway_is_unavailable() {
        let bus = InProcessBus::new();
        assert!(matches!(
            bus.subscribe("nowhere", "AA_ORDER", 4),
            Err(ClientError::ChannelUnavailable { .. })
        ));
        assert!(bus.publish("nowhere", "AA_ORDER", "x").is_err());
    }

    #[test]
    fn full_queue_drops_and_reports_once() {
        let bus = InProcessBus::new();
        bus.bind("gw");
        let mut inbox = bus.subscribe("gw", "t", 1).unwrap();
        bus.publish("gw", "t", "1").unwrap();
        bus.publish("gw", "t", "2").unwrap();
        bus.publish("gw", "t", "3").unwrap();
        assert_eq!(
            inbox.try_next(),
            Err(ClientError::ChannelOverflow {
                topic: "t".into(),
                dropped: 2
            })
        );
        assert_eq!(inbox.try_next().unwrap().as_deref(), Some("1"));
        assert_eq!(inbox.try_next().unwrap(), None);
    }

    #[test]
    fn dropped_inbox_is_pruned() {
        let bus = InProcessBus::new();
        bus.bind("gw");
        let inbox = bus.subscribe("gw", "t", 2).unwrap();
        assert_eq!(bus.subscriber_count("gw", "t"), 1);
        drop(inbox);
        assert_eq!(bus.publish("gw", "t", "x").unwrap(), 0);
        assert_eq!(bus.subscriber_count("gw", "t"), 0);
    }

    #[test]
    fn unbind_closes_subscribers() {
        let bus = InProcessBus::new();
        bus.bind("gw");
        let mut inbox = bus.subscribe("gw", "t", 2).unwrap();
        bus.unbind("gw");
        assert!(matches!(inbox.try_next(), Err(ClientError::ChannelUnavailable { .. })));
    }

    #[test]
    fn zero_capacity_rejected() {
        let bus = InProcessBus::new();
        bus.bind("gw");
        assert!(bus.subscribe("gw", "t", 0).is_err());
    }
}
