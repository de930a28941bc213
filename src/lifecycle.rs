//! Order identity and lifecycle timestamps.
//!
//! Each stage stamps exactly one field: the trader API stamps genesis, the
//! gateway stamps gateway time and assigns the id, the sequencer stamps enqueue
//! and dequeue. Calling a stage twice overwrites its field; that is a caller bug,
//! not a protocol error.

use crate::clock::Clock;
use crate::types::Order;

/// `{gateway_id}-{counter}`. Same inputs give the same id, so retries are idempotent.
pub fn order_id(gateway_id: &str, counter: u64) -> String {
    format!("{}-{}", gateway_id, counter)
}

/// `{gateway_id}-{client_id}-{counter}`.
pub fn client_order_id(gateway_id: &str, client_id: &str, counter: u64) -> String {
    format!("{}-{}-{}", gateway_id, client_id, counter)
}

impl Order {
    pub fn assign_genesis_timestamp(&mut self, clock: &dyn Clock) {
        self.genesis_timestamp = clock.now_micros();
    }

    pub fn assign_gateway_timestamp(&mut self, clock: &dyn Clock) {
        self.gateway_timestamp = clock.now_micros();
    }

    pub fn assign_enqueue_timestamp(&mut self, clock: &dyn Clock) {
        self.enqueue_timestamp = clock.now_micros();
    }

    pub fn assign_dequeue_timestamp(&mut self, clock: &dyn Clock) {
        self.dequeue_timestamp = clock.now_micros();
    }

    pub fn generate_order_id(&mut self, gateway_id: &str, counter: u64) {
        self.order_id = order_id(gateway_id, counter);
    }

    pub fn generate_order_id_for_client(&mut self, gateway_id: &str, client_id: &str, counter: u64) {
        self.order_id = client_order_id(gateway_id, client_id, counter);
    }

    /// Gives a cancel its own id (same scheme as orders) and points it at `target_order_id`.
    pub fn generate_cancel_id(
        &mut self,
        gateway_id: &str,
        client_id: &str,
        counter: u64,
        target_order_id: &str,
    ) {
        self.order_id = client_order_id(gateway_id, client_id, counter);
        self.cancel_id = target_order_id.to_string();
    }

    /// True when every assigned timestamp is no earlier than the stage before it.
    /// Unassigned (zero) later stages are ignored.
    pub fn lifecycle_is_monotonic(&self) -> bool {
        let stages = [
            self.genesis_timestamp,
            self.gateway_timestamp,
            self.enqueue_timestamp,
            self.dequeue_timestamp,
        ];
        let mut prev = 0;
        for ts in stages {
            if ts == 0 {
                continue;
            }
            if ts < prev {
                return false;
            }
            prev = ts;
        }
        true
    }
}
