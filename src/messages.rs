//! Market data messages: trades, limit order books and client snapshots.
//!
//! [`Trade`] is produced for each match between a buy and a sell.
//! [`LimitOrderBook`] is a point-in-time view of resting liquidity for one symbol.
//! [`ClientInformationSnapshot`] is a client's portfolio and outstanding orders.

use crate::types::{Order, OrderAction};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Completed match between two orders.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub buyer_serial_num: u64,
    pub seller_serial_num: u64,
    pub buyer_order_id: String,
    pub seller_order_id: String,
    pub buyer_client_id: String,
    pub seller_client_id: String,
    pub exec_price: i64,
    /// `exec_price * shares_traded`.
    pub cash_traded: i64,
    pub shares_traded: u64,
    /// When the match was formed.
    pub creation_timestamp: u64,
    /// When the fairness delay elapses; 0 until the hold/release buffer sets it.
    pub release_timestamp: u64,
    pub trade_serial_num: u64,
}

impl Trade {
    /// Builds the trade for `incoming` matching against `resting`.
    ///
    /// Sides are taken from the actions: the buy order is the buyer. Executes at
    /// the resting order's limit price for the smaller of the two unfilled counts.
    pub fn from_orders(
        incoming: &Order,
        resting: &Order,
        trade_serial_num: u64,
        creation_timestamp: u64,
    ) -> Self {
        let incoming_buys =
            incoming.action == OrderAction::Buy || resting.action == OrderAction::Sell;
        let (buyer, seller) = if incoming_buys {
            (incoming, resting)
        } else {
            (resting, incoming)
        };
        let shares_traded = incoming.num_shares.min(resting.num_shares);
        let exec_price = resting.limit_price;
        Self {
            symbol: resting.symbol.clone(),
            buyer_serial_num: buyer.order_serial_num,
            seller_serial_num: seller.order_serial_num,
            buyer_order_id: buyer.order_id.clone(),
            seller_order_id: seller.order_id.clone(),
            buyer_client_id: buyer.client_id.clone(),
            seller_client_id: seller.client_id.clone(),
            exec_price,
            cash_traded: exec_price * shares_traded as i64,
            shares_traded,
            creation_timestamp,
            release_timestamp: 0,
            trade_serial_num,
        }
    }

    pub fn creation_cmp(&self, other: &Trade) -> Ordering {
        self.creation_timestamp.cmp(&other.creation_timestamp)
    }

    /// True if `client_id` is either counterparty.
    pub fn involves(&self, client_id: &str) -> bool {
        self.buyer_client_id == client_id || self.seller_client_id == client_id
    }
}

/// Snapshot of resting liquidity for one symbol.
///
/// Both sides are keyed by order id. `BTreeMap` keeps ascending id order, which
/// is also the wire encoding and truncation order.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LimitOrderBook {
    pub symbol: String,
    pub buy_queue: BTreeMap<String, Order>,
    pub sell_queue: BTreeMap<String, Order>,
    pub creation_timestamp: u64,
    pub release_timestamp: u64,
}

impl LimitOrderBook {
    pub fn new(symbol: impl Into<String>, creation_timestamp: u64) -> Self {
        Self {
            symbol: symbol.into(),
            creation_timestamp,
            ..Default::default()
        }
    }

    /// Adds a resting order to its side. Returns `false` (and leaves the book
    /// untouched) if the order is for another symbol or is not a buy/sell.
    pub fn insert(&mut self, order: Order) -> bool {
        if order.symbol != self.symbol {
            return false;
        }
        let side = match order.action {
            OrderAction::Buy => &mut self.buy_queue,
            OrderAction::Sell => &mut self.sell_queue,
            _ => return false,
        };
        side.insert(order.order_id.clone(), order);
        true
    }

    /// Highest buy limit price, if any.
    pub fn best_bid(&self) -> Option<i64> {
        self.buy_queue.values().map(|o| o.limit_price).max()
    }

    /// Lowest sell limit price, if any.
    pub fn best_ask(&self) -> Option<i64> {
        self.sell_queue.values().map(|o| o.limit_price).min()
    }

    pub fn len(&self) -> usize {
        self.buy_queue.len() + self.sell_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-client state as of a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClientInformationSnapshot {
    pub client_id: String,
    /// Global trade serial watermark.
    pub global_serial_num: u64,
    /// Client-local order serial watermark.
    pub order_serial_num: u64,
    /// Symbol -> signed position.
    pub portfolio: BTreeMap<String, i64>,
    /// One entry per unresolved order.
    pub outstanding_orders: Vec<Order>,
}
