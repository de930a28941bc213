//! Subscription channels: one logical stream per (scope, kind).
//!
//! The topic is the scope (a client id or a symbol) followed by the kind's
//! suffix, e.g. `C1_ORDER` or `AA_RELEASE_BOOK`. [`Subscription::fetch_next`]
//! is a non-blocking poll; callers loop.

use crate::bus::{Inbox, Transport};
use crate::error::ClientError;
use crate::messages::{LimitOrderBook, Trade};
use crate::types::{Order, Suffix};
use crate::wire;
use log::{debug, warn};

/// Default queue depth per channel, in records.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;
/// Default largest accepted record, in bytes.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1 << 20;

/// What a channel carries. Selects the topic suffix and the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Confirmations of this client's orders (client scoped).
    OrderConfirmation,
    /// Released trades this client took part in (client scoped).
    TradeConfirmation,
    /// Released, anonymized books (symbol scoped).
    LimitBook,
    /// Released, anonymized trade reports (symbol scoped).
    TradeReport,
    /// Trades before the fairness delay (symbol scoped, privileged).
    HeldTrade,
    /// Books before the fairness delay (symbol scoped, privileged).
    HeldBook,
}

impl ChannelKind {
    pub fn suffix(self) -> Suffix {
        match self {
            ChannelKind::OrderConfirmation => Suffix::Order,
            ChannelKind::TradeConfirmation | ChannelKind::TradeReport => Suffix::Trade,
            ChannelKind::LimitBook => Suffix::Book,
            ChannelKind::HeldTrade => Suffix::HoldTrade,
            ChannelKind::HeldBook => Suffix::HoldBook,
        }
    }

    pub fn is_client_scoped(self) -> bool {
        matches!(self, ChannelKind::OrderConfirmation | ChannelKind::TradeConfirmation)
    }

    fn decode(self, record: &str) -> Result<Message, ClientError> {
        match self {
            ChannelKind::OrderConfirmation => wire::decode_order(record).map(Message::Order),
            ChannelKind::TradeConfirmation | ChannelKind::TradeReport | ChannelKind::HeldTrade => {
                wire::decode_trade(record).map(Message::Trade)
            }
            ChannelKind::LimitBook | ChannelKind::HeldBook => {
                wire::decode_book(record).map(Message::Book)
            }
        }
    }
}

/// `scope` followed by the suffix string.
pub fn topic(scope: &str, suffix: Suffix) -> String {
    format!("{}{}", scope, suffix.as_str())
}

/// Splits a topic into scope and suffix. A topic with no known suffix is the
/// whole string as scope with [`Suffix::Order`].
pub fn split_topic(topic: &str) -> (&str, Suffix) {
    for suffix in Suffix::ALL {
        if let Some(scope) = topic.strip_suffix(suffix.as_str()) {
            return (scope, suffix);
        }
    }
    (topic, Suffix::Order)
}

/// One decoded message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Order(Order),
    Trade(Trade),
    Book(LimitOrderBook),
}

impl Message {
    pub fn into_order(self) -> Option<Order> {
        match self {
            Message::Order(o) => Some(o),
            _ => None,
        }
    }

    pub fn into_trade(self) -> Option<Trade> {
        match self {
            Message::Trade(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_book(self) -> Option<LimitOrderBook> {
        match self {
            Message::Book(b) => Some(b),
            _ => None,
        }
    }
}

/// Per-channel bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelLimits {
    /// Queue depth in records.
    pub capacity: usize,
    /// Largest record accepted; larger ones are reported as overflow.
    pub max_record_bytes: usize,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

/// One subscription. Owned by exactly one consumer loop.
#[derive(Debug)]
pub struct Subscription {
    kind: ChannelKind,
    gateway: String,
    inbox: Inbox,
    max_record_bytes: usize,
}

impl Subscription {
    /// Subscribes to `scope` + `kind.suffix()` on `gateway`.
    pub fn open(
        transport: &dyn Transport,
        gateway: &str,
        kind: ChannelKind,
        scope: &str,
        limits: ChannelLimits,
    ) -> Result<Self, ClientError> {
        let topic = topic(scope, kind.suffix());
        if gateway.is_empty() {
            return Err(ClientError::unavailable(topic, "empty gateway address"));
        }
        if scope.is_empty() {
            return Err(ClientError::unavailable(topic, "empty scope"));
        }
        let inbox = transport.subscribe(gateway, &topic, limits.capacity)?;
        debug!("subscribed gateway={} topic={}", gateway, topic);
        Ok(Self {
            kind,
            gateway: gateway.to_string(),
            inbox,
            max_record_bytes: limits.max_record_bytes,
        })
    }

    pub fn order_confirmations(
        transport: &dyn Transport,
        gateway: &str,
        client_id: &str,
        limits: ChannelLimits,
    ) -> Result<Self, ClientError> {
        Self::open(transport, gateway, ChannelKind::OrderConfirmation, client_id, limits)
    }

    pub fn trade_confirmations(
        transport: &dyn Transport,
        gateway: &str,
        client_id: &str,
        limits: ChannelLimits,
    ) -> Result<Self, ClientError> {
        Self::open(transport, gateway, ChannelKind::TradeConfirmation, client_id, limits)
    }

    pub fn limit_books(
        transport: &dyn Transport,
        gateway: &str,
        symbol: &str,
        limits: ChannelLimits,
    ) -> Result<Self, ClientError> {
        Self::open(transport, gateway, ChannelKind::LimitBook, symbol, limits)
    }

    pub fn trade_reports(
        transport: &dyn Transport,
        gateway: &str,
        symbol: &str,
        limits: ChannelLimits,
    ) -> Result<Self, ClientError> {
        Self::open(transport, gateway, ChannelKind::TradeReport, symbol, limits)
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn topic(&self) -> &str {
        self.inbox.topic()
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    /// Oldest undelivered message, or `None` if nothing is buffered.
    pub fn fetch_next(&mut self) -> Result<Option<Message>, ClientError> {
        let Some(record) = self.inbox.try_next()? else {
            return Ok(None);
        };
        if record.len() > self.max_record_bytes {
            return Err(ClientError::ChannelOverflow {
                topic: self.topic().to_string(),
                dropped: 1,
            });
        }
        self.kind.decode(&record).map(Some)
    }

    /// Everything currently buffered, oldest first. Malformed and oversized
    /// records are skipped and reported; a transport error ends the drain.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.fetch_next() {
                Ok(Some(message)) => drained.messages.push(message),
                Ok(None) => break,
                Err(e @ (ClientError::MalformedRecord { .. } | ClientError::ChannelOverflow { .. })) => {
                    warn!("skipped record topic={} err={}", self.topic(), e);
                    drained.errors.push(e);
                }
                Err(e) => {
                    drained.errors.push(e);
                    break;
                }
            }
        }
        drained
    }
}

/// What [`Subscription::drain`] collected.
#[derive(Debug, Default)]
pub struct Drained {
    pub messages: Vec<Message>,
    pub errors: Vec<ClientError>,
}
