//! Gateway link boundary and an in-process paper gateway.
//!
//! A [`GatewayLink`] is one client's connection to the exchange gateway: it
//! carries encoded order records out and encoded confirmations back. The
//! [`PaperGateway`] stamps, identifies, authenticates and confirms orders and
//! tracks each client's portfolio and resting orders. It does not match;
//! trades are fed to it with [`PaperGateway::apply_trade`].

use crate::bus::Transport;
use crate::clock::Clock;
use crate::fairness::{publish_order_confirmation, FairnessPolicy};
use crate::error::ClientError;
use crate::messages::{ClientInformationSnapshot, LimitOrderBook, Trade};
use crate::types::{Order, OrderAction, OrderResult};
use crate::wire;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

pub trait GatewayLink: Send {
    /// Sends one encoded order; returns the encoded confirmation.
    fn submit(&mut self, record: &str) -> Result<String, ClientError>;

    /// Encoded [`ClientInformationSnapshot`] for `client_id`.
    fn client_information(&mut self, client_id: &str, token: &str) -> Result<String, ClientError>;

    /// Symbols currently listed.
    fn symbols(&mut self) -> Result<Vec<String>, ClientError>;
}

#[derive(Debug, Default)]
struct ClientAccount {
    token: String,
    /// Positions from released trades only.
    portfolio: BTreeMap<String, i64>,
    /// Live resting orders, fills applied as soon as a trade is.
    outstanding: BTreeMap<String, Order>,
    order_serial: u64,
}

/// An applied trade whose release time has not come yet, with the resting
/// orders it filled completely.
#[derive(Debug)]
struct UnreleasedTrade {
    trade: Trade,
    filled: Vec<Order>,
}

impl UnreleasedTrade {
    /// Puts the trade's shares back on `client_id`'s side of `orders`.
    fn restore(&self, client_id: &str, orders: &mut BTreeMap<String, Order>, visible: impl Fn(&Order) -> bool) {
        let trade = &self.trade;
        for (client, order_id) in [
            (&trade.buyer_client_id, &trade.buyer_order_id),
            (&trade.seller_client_id, &trade.seller_order_id),
        ] {
            if client != client_id {
                continue;
            }
            if let Some(order) = orders.get_mut(order_id) {
                order.num_shares += trade.shares_traded;
            } else if let Some(order) = self.filled.iter().find(|o| &o.order_id == order_id) {
                if visible(order) {
                    orders.insert(
                        order_id.clone(),
                        Order {
                            num_shares: trade.shares_traded,
                            ..order.clone()
                        },
                    );
                }
            }
        }
    }
}

struct GatewayState {
    symbols: BTreeSet<String>,
    accounts: HashMap<String, ClientAccount>,
    seen_order_ids: HashSet<String>,
    next_counter: u64,
    next_order_serial: u64,
    trade_serial: u64,
    released_trade_serial: u64,
    unreleased: Vec<UnreleasedTrade>,
    offline: bool,
    lose_confirmations: bool,
}

impl GatewayState {
    /// Moves positions for every trade released by `now`.
    fn release_trades(&mut self, policy: &FairnessPolicy, now: u64) {
        let (due, held): (Vec<_>, Vec<_>) = std::mem::take(&mut self.unreleased)
            .into_iter()
            .partition(|u| policy.is_released(u.trade.creation_timestamp, now));
        self.unreleased = held;
        for UnreleasedTrade { trade, .. } in due {
            self.released_trade_serial = self.released_trade_serial.max(trade.trade_serial_num);
            let shares = trade.shares_traded as i64;
            for (client, delta) in [(&trade.buyer_client_id, shares), (&trade.seller_client_id, -shares)] {
                if let Some(account) = self.accounts.get_mut(client) {
                    *account.portfolio.entry(trade.symbol.clone()).or_insert(0) += delta;
                }
            }
        }
    }
}

/// Paper gateway. Clones share state; each client connects with [`PaperGateway::connect`].
#[derive(Clone)]
pub struct PaperGateway {
    gateway_id: String,
    address: String,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: FairnessPolicy,
    state: Arc<Mutex<GatewayState>>,
}

impl PaperGateway {
    pub fn new(
        gateway_id: impl Into<String>,
        address: impl Into<String>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        policy: FairnessPolicy,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            address: address.into(),
            transport,
            clock,
            policy,
            state: Arc::new(Mutex::new(GatewayState {
                symbols: BTreeSet::new(),
                accounts: HashMap::new(),
                seen_order_ids: HashSet::new(),
                next_counter: 1,
                next_order_serial: 1,
                trade_serial: 0,
                released_trade_serial: 0,
                unreleased: Vec::new(),
                offline: false,
                lose_confirmations: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn list_symbol(&self, symbol: impl Into<String>) {
        self.lock().symbols.insert(symbol.into());
    }

    pub fn register_client(&self, client_id: impl Into<String>, token: impl Into<String>) {
        let mut state = self.lock();
        let account = state.accounts.entry(client_id.into()).or_default();
        account.token = token.into();
    }

    /// While offline every link call fails.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// When set, submissions are processed but the confirmation never reaches
    /// the submitting link.
    pub fn set_lose_confirmations(&self, lose: bool) {
        self.lock().lose_confirmations = lose;
    }

    pub fn connect(&self, client_id: impl Into<String>, token: impl Into<String>) -> PaperLink {
        PaperLink {
            gateway: self.clone(),
            client_id: client_id.into(),
            token: token.into(),
        }
    }

    /// Resting orders for `client_id` keyed by order id.
    pub fn outstanding(&self, client_id: &str) -> BTreeMap<String, Order> {
        self.lock()
            .accounts
            .get(client_id)
            .map(|a| a.outstanding.clone())
            .unwrap_or_default()
    }

    /// Book of every resting order on `symbol`, stamped now.
    pub fn book(&self, symbol: &str) -> LimitOrderBook {
        let mut book = LimitOrderBook::new(symbol, self.clock.now_micros());
        let state = self.lock();
        for account in state.accounts.values() {
            for order in account.outstanding.values().filter(|o| o.symbol == symbol) {
                book.insert(order.clone());
            }
        }
        book
    }

    /// Next trade serial number.
    pub fn next_trade_serial(&self) -> u64 {
        let mut state = self.lock();
        state.trade_serial += 1;
        state.trade_serial
    }

    /// Applies a matched trade. Both resting orders are reduced at once, so
    /// the next [`PaperGateway::book`] reflects it; positions move and client
    /// snapshots show it only after the fairness delay.
    pub fn apply_trade(&self, trade: &Trade) {
        let mut state = self.lock();
        state.trade_serial = state.trade_serial.max(trade.trade_serial_num);
        let mut filled = Vec::new();
        for (client, order_id) in [
            (&trade.buyer_client_id, &trade.buyer_order_id),
            (&trade.seller_client_id, &trade.seller_order_id),
        ] {
            let Some(account) = state.accounts.get_mut(client) else {
                warn!("trade for unknown client client={} trade_serial={}", client, trade.trade_serial_num);
                continue;
            };
            if let Some(order) = account.outstanding.get_mut(order_id) {
                order.num_shares = order.num_shares.saturating_sub(trade.shares_traded);
                if order.num_shares == 0 {
                    filled.extend(account.outstanding.remove(order_id));
                }
            }
        }
        state.unreleased.push(UnreleasedTrade {
            trade: trade.clone(),
            filled,
        });
    }

    fn process(&self, client_id: &str, token: &str, record: &str) -> Result<Order, ClientError> {
        let mut order = match wire::decode_order(record) {
            Ok(order) => order,
            Err(e) => {
                warn!("gateway received malformed order client={} err={}", client_id, e);
                return Ok(Order {
                    client_id: client_id.to_string(),
                    result: OrderResult::Malformed,
                    ..Default::default()
                });
            }
        };
        let mut state = self.lock();
        if state.offline {
            return Err(ClientError::Link("gateway offline".into()));
        }
        order.assign_gateway_timestamp(self.clock.as_ref());

        let authorized = order.client_id == client_id
            && state
                .accounts
                .get(client_id)
                .is_some_and(|a| a.token == token);
        if !authorized {
            order.result = OrderResult::AuthorizationError;
            return Ok(order);
        }
        if order.has_order_id() && state.seen_order_ids.contains(&order.order_id) {
            order.result = OrderResult::Duplicate;
            return Ok(order);
        }

        let counter = state.next_counter;
        state.next_counter += 1;
        let serial = state.next_order_serial;
        state.next_order_serial += 1;
        order.order_serial_num = serial;

        if order.is_cancel() {
            let target = order.cancel_id.clone();
            order.generate_cancel_id(&self.gateway_id, client_id, counter, &target);
        } else if !order.has_order_id() {
            order.generate_order_id_for_client(&self.gateway_id, client_id, counter);
        }
        state.seen_order_ids.insert(order.order_id.clone());

        let listed = state.symbols.contains(&order.symbol);
        let Some(account) = state.accounts.get_mut(client_id) else {
            order.result = OrderResult::AuthorizationError;
            return Ok(order);
        };
        account.order_serial = serial;
        order.result = match order.action {
            OrderAction::Cancel => match account.outstanding.remove(&order.cancel_id) {
                Some(target) => {
                    order.symbol = target.symbol;
                    OrderResult::Valid
                }
                None => OrderResult::Invalid,
            },
            OrderAction::Buy | OrderAction::Sell if listed && order.num_shares > 0 => {
                order.assign_enqueue_timestamp(self.clock.as_ref());
                order.result = OrderResult::InSequencer;
                account.outstanding.insert(order.order_id.clone(), order.clone());
                OrderResult::InSequencer
            }
            _ => OrderResult::Invalid,
        };
        Ok(order)
    }

    fn snapshot(&self, client_id: &str, token: &str) -> Result<ClientInformationSnapshot, ClientError> {
        let now = self.clock.now_micros();
        let mut state = self.lock();
        if state.offline {
            return Err(ClientError::Link("gateway offline".into()));
        }
        state.release_trades(&self.policy, now);
        let account = state
            .accounts
            .get(client_id)
            .filter(|a| a.token == token)
            .ok_or_else(|| ClientError::Link(format!("client {} not authorized", client_id)))?;
        let visible = |o: &Order| self.policy.is_released(o.gateway_timestamp, now);
        let mut outstanding: BTreeMap<String, Order> = account
            .outstanding
            .iter()
            .filter(|(_, o)| visible(*o))
            .map(|(id, o)| (id.clone(), o.clone()))
            .collect();
        for unreleased in &state.unreleased {
            unreleased.restore(client_id, &mut outstanding, visible);
        }
        Ok(ClientInformationSnapshot {
            client_id: client_id.to_string(),
            global_serial_num: state.released_trade_serial,
            order_serial_num: account.order_serial,
            portfolio: account.portfolio.clone(),
            outstanding_orders: outstanding.into_values().collect(),
        })
    }
}

/// One client's session with a [`PaperGateway`].
pub struct PaperLink {
    gateway: PaperGateway,
    client_id: String,
    token: String,
}

impl PaperLink {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl GatewayLink for PaperLink {
    fn submit(&mut self, record: &str) -> Result<String, ClientError> {
        let order = self.gateway.process(&self.client_id, &self.token, record)?;
        info!(
            "gateway processed order_id={} client={} symbol={} action={:?} shares={} price={} result={:?}",
            order.order_id,
            order.client_id,
            order.symbol,
            order.action,
            order.num_shares,
            order.limit_price,
            order.result
        );
        let confirmable = order.has_order_id()
            && order.result != OrderResult::AuthorizationError
            && order.client_id == self.client_id;
        if confirmable {
            publish_order_confirmation(self.gateway.transport.as_ref(), &self.gateway.address, &order)?;
        }
        if self.gateway.lock().lose_confirmations {
            return Err(ClientError::Link("connection lost before confirmation".into()));
        }
        Ok(wire::encode_order(&order, false))
    }

    fn client_information(&mut self, client_id: &str, token: &str) -> Result<String, ClientError> {
        let snapshot = self.gateway.snapshot(client_id, token)?;
        Ok(wire::encode_snapshot(&snapshot))
    }

    fn symbols(&mut self) -> Result<Vec<String>, ClientError> {
        let state = self.gateway.lock();
        if state.offline {
            return Err(ClientError::Link("gateway offline".into()));
        }
        Ok(state.symbols.iter().cloned().collect())
    }
}
