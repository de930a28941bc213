//! Hold/release fairness buffer.
//!
//! Every fresh trade or book goes out twice. First, immediately and with full
//! identity, on the symbol's hold channel, which only privileged archival
//! consumers read. Then, once the fairness delay has elapsed, on the release
//! channels with `release_timestamp = creation_timestamp + delay`. The delay is
//! one constant per buffer, so every participant sees every message exactly
//! `delay` after it happened.
//!
//! Order confirmations concern a single client and skip the buffer; see
//! [`publish_order_confirmation`].

use crate::bus::Transport;
use crate::channel::topic;
use crate::clock::Clock;
use crate::error::ClientError;
use crate::messages::{LimitOrderBook, Trade};
use crate::types::{Order, Suffix};
use crate::wire;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 100 ms.
pub const DEFAULT_FAIRNESS_DELAY_US: u64 = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessPolicy {
    /// Hold time applied to every trade and book, in microseconds.
    pub delay_us: u64,
    /// Orders per side kept in released books; 0 keeps all.
    pub book_depth: usize,
}

impl Default for FairnessPolicy {
    fn default() -> Self {
        Self {
            delay_us: DEFAULT_FAIRNESS_DELAY_US,
            book_depth: 0,
        }
    }
}

impl FairnessPolicy {
    pub fn release_at(&self, creation_timestamp: u64) -> u64 {
        creation_timestamp.saturating_add(self.delay_us)
    }

    /// True once something created at `creation_timestamp` may be shown at `now`.
    pub fn is_released(&self, creation_timestamp: u64, now: u64) -> bool {
        self.release_at(creation_timestamp) <= now
    }
}

#[derive(Clone, Debug)]
enum Held {
    Trade(Trade),
    Book(LimitOrderBook),
}

#[derive(Debug)]
struct Pending {
    release_at: u64,
    seq: u64,
    item: Held,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.release_at == other.release_at && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed: BinaryHeap is a max-heap and we pop the earliest release first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .release_at
            .cmp(&self.release_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Publisher-side buffer for one gateway.
pub struct HoldReleaseBuffer {
    transport: Arc<dyn Transport>,
    gateway: String,
    policy: FairnessPolicy,
    pending: BinaryHeap<Pending>,
    next_seq: u64,
}

impl HoldReleaseBuffer {
    pub fn new(
        transport: Arc<dyn Transport>,
        gateway: impl Into<String>,
        policy: FairnessPolicy,
    ) -> Result<Self, ClientError> {
        if policy.delay_us == 0 {
            return Err(ClientError::Config("fairness delay must be positive".into()));
        }
        Ok(Self {
            transport,
            gateway: gateway.into(),
            policy,
            pending: BinaryHeap::new(),
            next_seq: 0,
        })
    }

    pub fn policy(&self) -> FairnessPolicy {
        self.policy
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Release time of the earliest held item.
    pub fn next_release_at(&self) -> Option<u64> {
        self.pending.peek().map(|p| p.release_at)
    }

    /// Publishes `trade` on `{symbol}_HOLD_TRADE` now and queues its release.
    pub fn hold_trade(&mut self, mut trade: Trade) -> Result<(), ClientError> {
        trade.release_timestamp = self.policy.release_at(trade.creation_timestamp);
        let hold = topic(&trade.symbol, Suffix::HoldTrade);
        self.transport
            .publish(&self.gateway, &hold, &wire::encode_trade(&trade, false, false))?;
        debug!(
            "trade held symbol={} trade_serial={} release_at={}",
            trade.symbol, trade.trade_serial_num, trade.release_timestamp
        );
        self.push(trade.release_timestamp, Held::Trade(trade));
        Ok(())
    }

    /// Publishes `book` on `{symbol}_HOLD_BOOK` now and queues its release.
    pub fn hold_book(&mut self, mut book: LimitOrderBook) -> Result<(), ClientError> {
        book.release_timestamp = self.policy.release_at(book.creation_timestamp);
        let hold = topic(&book.symbol, Suffix::HoldBook);
        self.transport
            .publish(&self.gateway, &hold, &wire::encode_book(&book, 0, false))?;
        debug!(
            "book held symbol={} orders={} release_at={}",
            book.symbol,
            book.len(),
            book.release_timestamp
        );
        self.push(book.release_timestamp, Held::Book(book));
        Ok(())
    }

    fn push(&mut self, release_at: u64, item: Held) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Pending {
            release_at,
            seq,
            item,
        });
    }

    /// Publishes everything whose release time is `<= now`, earliest first.
    /// Returns how many items were released. On a publish failure the item is
    /// put back and the error returned; a later call retries it.
    pub fn release_due(&mut self, now: u64) -> Result<usize, ClientError> {
        let mut released = 0;
        while self.pending.peek().is_some_and(|p| p.release_at <= now) {
            let Some(next) = self.pending.pop() else {
                break;
            };
            if let Err(e) = self.publish_release(&next.item) {
                warn!("release failed release_at={} err={}", next.release_at, e);
                self.pending.push(next);
                return Err(e);
            }
            released += 1;
        }
        Ok(released)
    }

    fn publish_release(&self, item: &Held) -> Result<(), ClientError> {
        let gw = self.gateway.as_str();
        match item {
            Held::Trade(trade) => {
                let suffix = Suffix::Trade;
                self.transport.publish(
                    gw,
                    &topic(&trade.buyer_client_id, suffix),
                    &wire::encode_trade(trade, false, true),
                )?;
                self.transport.publish(
                    gw,
                    &topic(&trade.seller_client_id, suffix),
                    &wire::encode_trade(trade, true, false),
                )?;
                self.transport.publish(
                    gw,
                    &topic(&trade.symbol, suffix),
                    &wire::encode_trade(trade, true, true),
                )?;
                info!(
                    "trade released symbol={} trade_serial={} shares={} price={} release_ts={}",
                    trade.symbol,
                    trade.trade_serial_num,
                    trade.shares_traded,
                    trade.exec_price,
                    trade.release_timestamp
                );
            }
            Held::Book(book) => {
                self.transport.publish(
                    gw,
                    &topic(&book.symbol, Suffix::Book),
                    &wire::encode_book(book, self.policy.book_depth, true),
                )?;
                info!(
                    "book released symbol={} orders={} release_ts={}",
                    book.symbol,
                    book.len(),
                    book.release_timestamp
                );
            }
        }
        Ok(())
    }
}

/// Publishes `order` on `{client_id}_ORDER` without any hold.
pub fn publish_order_confirmation(
    transport: &dyn Transport,
    gateway: &str,
    order: &Order,
) -> Result<usize, ClientError> {
    let t = topic(&order.client_id, Suffix::Order);
    let n = transport.publish(gateway, &t, &wire::encode_order(order, false))?;
    debug!(
        "order confirmation published order_id={} result={:?}",
        order.order_id, order.result
    );
    Ok(n)
}

fn release_now(buffer: &Mutex<HoldReleaseBuffer>, clock: &dyn Clock) -> Result<usize, ClientError> {
    let now = clock.now_micros();
    buffer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .release_due(now)
}

/// Drives `buffer` from `clock` every `poll` until `token` is cancelled and
/// returns the total number of released items. A failed publish is logged;
/// the item stays held and is retried on the next tick.
pub async fn run_release_loop(
    buffer: Arc<Mutex<HoldReleaseBuffer>>,
    clock: Arc<dyn Clock>,
    poll: Duration,
    token: CancellationToken,
) -> Result<usize, ClientError> {
    let mut interval = tokio::time::interval(poll);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut total = 0;
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = interval.tick() => match release_now(&buffer, clock.as_ref()) {
                Ok(n) => total += n,
                Err(e) => warn!("release failed, retrying next tick err={}", e),
            },
        }
    }
    info!("release loop stopped released={}", total);
    Ok(total)
}
