//! Synthetic order flow.
//!
//! Deterministic stream of orders, trades and books for replay tests, demos and
//! benchmarks. Same config and seed give the same stream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::client::Trader;
use crate::error::ClientError;
use crate::messages::{LimitOrderBook, Trade};
use crate::types::{Order, OrderAction, OrderResult, OrderType};

/// All ranges are inclusive.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub gateway_id: String,
    pub symbols: Vec<String>,
    /// Client ids are `C1..=C{num_clients}`.
    pub num_clients: u64,
    /// Used by [`Generator::all_orders`].
    pub num_orders: usize,
    /// Probability of a buy; sell otherwise.
    pub buy_ratio: f64,
    /// Probability of a limit order; market otherwise.
    pub limit_ratio: f64,
    pub price_min: i64,
    pub price_max: i64,
    pub shares_min: u64,
    pub shares_max: u64,
    /// First genesis timestamp (µs).
    pub start_us: u64,
    /// Gap between consecutive orders (µs).
    pub step_us: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            gateway_id: "G1".into(),
            symbols: vec!["AA".into()],
            num_clients: 5,
            num_orders: 1000,
            buy_ratio: 0.5,
            limit_ratio: 0.9,
            price_min: 95,
            price_max: 105,
            shares_min: 1,
            shares_max: 100,
            start_us: 1_000_000,
            step_us: 10,
        }
    }
}

pub struct Generator {
    rng: StdRng,
    config: GeneratorConfig,
    counter: u64,
    next_timestamp: u64,
    next_trade_serial: u64,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            next_timestamp: config.start_us,
            config,
            counter: 1,
            next_trade_serial: 1,
        }
    }

    /// Unstamped order as a strategy would build it: no id, no timestamps.
    pub fn next_request(&mut self) -> Order {
        let symbol = if self.config.symbols.is_empty() {
            "AA".to_string()
        } else {
            let i = self.rng.gen_range(0..self.config.symbols.len());
            self.config.symbols[i].clone()
        };
        let client = format!("C{}", self.rng.gen_range(1..=self.config.num_clients.max(1)));
        let action = if self.rng.gen::<f64>() < self.config.buy_ratio {
            OrderAction::Buy
        } else {
            OrderAction::Sell
        };
        let is_limit = self.rng.gen::<f64>() < self.config.limit_ratio;
        let (order_type, price) = if is_limit {
            (
                OrderType::Limit,
                self.rng.gen_range(self.config.price_min..=self.config.price_max),
            )
        } else {
            (OrderType::Market, 0)
        };
        let shares = self.rng.gen_range(self.config.shares_min..=self.config.shares_max);
        Order::new(symbol, client, action, order_type, shares, price)
    }

    /// Order with id, serial and all four lifecycle timestamps assigned, one
    /// microsecond apart.
    pub fn next_order(&mut self) -> Order {
        let mut order = self.next_request();
        let counter = self.counter;
        self.counter += 1;
        let t = self.next_timestamp;
        self.next_timestamp += self.config.step_us.max(4);
        let client = order.client_id.clone();
        order.generate_order_id_for_client(&self.config.gateway_id, &client, counter);
        order.order_serial_num = counter;
        order.genesis_timestamp = t;
        order.gateway_timestamp = t + 1;
        order.enqueue_timestamp = t + 2;
        order.dequeue_timestamp = t + 3;
        order.result = OrderResult::Valid;
        order
    }

    pub fn take_orders(&mut self, n: usize) -> Vec<Order> {
        (0..n).map(|_| self.next_order()).collect()
    }

    pub fn all_orders(&mut self) -> Vec<Order> {
        self.take_orders(self.config.num_orders)
    }

    /// A resting order and a crossing incoming order on the same symbol,
    /// matched into one trade created after both were dequeued.
    pub fn next_trade(&mut self) -> Trade {
        let resting = self.next_order();
        let mut incoming = self.next_order();
        incoming.symbol = resting.symbol.clone();
        incoming.action = resting.action.flip();
        incoming.limit_price = resting.limit_price;
        let serial = self.next_trade_serial;
        self.next_trade_serial += 1;
        Trade::from_orders(&incoming, &resting, serial, incoming.dequeue_timestamp + 1)
    }

    pub fn take_trades(&mut self, n: usize) -> Vec<Trade> {
        (0..n).map(|_| self.next_trade()).collect()
    }

    /// Book for `symbol` with `per_side` resting limit orders on each side.
    pub fn book(&mut self, symbol: &str, per_side: usize) -> LimitOrderBook {
        let mut book = LimitOrderBook::new(symbol, 0);
        for action in [OrderAction::Buy, OrderAction::Sell] {
            for _ in 0..per_side {
                let mut order = self.next_order();
                order.symbol = symbol.to_string();
                order.action = action;
                order.order_type = OrderType::Limit;
                book.insert(order);
            }
        }
        book.creation_timestamp = self.next_timestamp;
        self.next_timestamp += self.config.step_us.max(1);
        book
    }
}

/// Outcome counts of a replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// Submits `orders` through `trader`. Gateway rejections are counted; any
/// other error stops the replay.
pub fn replay_into_trader(
    trader: &Trader,
    orders: impl IntoIterator<Item = Order>,
) -> Result<ReplaySummary, ClientError> {
    let mut summary = ReplaySummary::default();
    for order in orders {
        match trader.submit_order(order) {
            Ok(_) => summary.accepted += 1,
            Err(ClientError::GatewayRejected { .. }) | Err(ClientError::DuplicateSubmission { .. }) => {
                summary.rejected += 1
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}
