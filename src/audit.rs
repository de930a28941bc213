//! Audit trail of order submissions and cancels made through the client.
//!
//! One JSON object per event. [`LogAuditSink`] writes it on the `audit` log
//! target; [`InMemoryAuditSink`] keeps events for tests.

use crate::types::Order;
use log::info;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    OrderSubmit,
    OrderCancel,
}

/// Single audit record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// Genesis timestamp of the order (µs).
    pub timestamp_us: u64,
    pub client_id: String,
    pub action: AuditAction,
    pub symbol: String,
    /// Gateway-assigned id, `NULL` if none came back.
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_id: Option<String>,
    /// `accepted`, `rejected:<result>` or `error:<message>`.
    pub outcome: String,
}

impl AuditEvent {
    pub fn for_order(order: &Order, outcome: impl Into<String>) -> Self {
        let action = if order.is_cancel() {
            AuditAction::OrderCancel
        } else {
            AuditAction::OrderSubmit
        };
        Self {
            timestamp_us: order.genesis_timestamp,
            client_id: order.client_id.clone(),
            action,
            symbol: order.symbol.clone(),
            order_id: order.order_id.clone(),
            cancel_id: order.is_cancel().then(|| order.cancel_id.clone()),
            outcome: outcome.into(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Logs each event as one JSON line under the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            info!(target: "audit", "{}", line);
        }
    }
}

/// Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderAction, OrderType};

    #[test]
    fn cancel_event_carries_target() {
        let mut cancel = Order::cancel("C1", "G1-C1-1");
        cancel.order_id = "G1-C1-2".into();
        let event = AuditEvent::for_order(&cancel, "accepted");
        assert_eq!(event.action, AuditAction::OrderCancel);
        assert_eq!(event.cancel_id.as_deref(), Some("G1-C1-1"));
    }

    #[test]
    fn serializes_as_flat_json() {
        let order = Order::new("AA", "C1", OrderAction::Buy, OrderType::Limit, 1, 1);
        let event = AuditEvent::for_order(&order, "rejected:Invalid");
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "order_submit");
        assert_eq!(json["symbol"], "AA");
        assert!(json.get("cancel_id").is_none());
    }

    #[test]
    fn in_memory_sink_shares_buffer() {
        let sink = InMemoryAuditSink::new();
        let other = sink.clone();
        let order = Order::new("AA", "C1", OrderAction::Sell, OrderType::Market, 1, 0);
        other.emit(&AuditEvent::for_order(&order, "accepted"));
        assert_eq!(sink.events().len(), 1);
        sink.clear();
        assert!(other.events().is_empty());
    }
}
