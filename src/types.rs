//! Core enumerations and the order message.
//!
//! [`OrderAction`], [`OrderType`], [`OrderResult`] and [`Suffix`] carry their
//! wire codes. [`Order`] is the single instruction exchanged with the gateway;
//! its ids and timestamps are filled in by [`crate::lifecycle`].

use std::cmp::Ordering;

/// Sentinel for ids that have not been assigned (and for anonymized client ids).
pub const NULL_ID: &str = "NULL";

/// Order action. Unrecognised codes decode to [`OrderAction::Flush`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
    Cancel,
    Flush,
}

impl OrderAction {
    pub fn code(self) -> char {
        match self {
            OrderAction::Buy => 'B',
            OrderAction::Sell => 'S',
            OrderAction::Cancel => 'C',
            OrderAction::Flush => 'F',
        }
    }

    pub fn from_code(code: char) -> Self {
        match code {
            'B' => OrderAction::Buy,
            'S' => OrderAction::Sell,
            'C' => OrderAction::Cancel,
            _ => OrderAction::Flush,
        }
    }

    /// Opposite side for buy/sell; cancel and flush are returned unchanged.
    pub fn flip(self) -> Self {
        match self {
            OrderAction::Buy => OrderAction::Sell,
            OrderAction::Sell => OrderAction::Buy,
            other => other,
        }
    }
}

/// Order type. Unrecognised codes decode to [`OrderType::Null`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Null,
}

impl OrderType {
    pub fn code(self) -> char {
        match self {
            OrderType::Limit => 'L',
            OrderType::Market => 'M',
            OrderType::Null => 'N',
        }
    }

    pub fn from_code(code: char) -> Self {
        match code {
            'L' => OrderType::Limit,
            'M' => OrderType::Market,
            _ => OrderType::Null,
        }
    }
}

/// Outcome the gateway/sequencer attaches to an order.
/// Unrecognised codes decode to [`OrderResult::Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderResult {
    Valid,
    Invalid,
    Malformed,
    Duplicate,
    Error,
    Flushed,
    AuthorizationError,
    NetworkError,
    WindowExceeded,
    InGateway,
    InSequencer,
    MatchingEngineShutdown,
    Unknown,
}

impl OrderResult {
    pub fn code(self) -> char {
        match self {
            OrderResult::Valid => 'V',
            OrderResult::Invalid => 'I',
            OrderResult::Malformed => 'M',
            OrderResult::Duplicate => 'D',
            OrderResult::Flushed => 'F',
            OrderResult::AuthorizationError => 'A',
            OrderResult::NetworkError => 'N',
            OrderResult::WindowExceeded => 'W',
            OrderResult::InGateway => 'G',
            OrderResult::MatchingEngineShutdown => 'S',
            OrderResult::InSequencer => 'Q',
            OrderResult::Unknown => 'U',
            OrderResult::Error => 'E',
        }
    }

    pub fn from_code(code: char) -> Self {
        match code {
            'V' => OrderResult::Valid,
            'I' => OrderResult::Invalid,
            'M' => OrderResult::Malformed,
            'D' => OrderResult::Duplicate,
            'F' => OrderResult::Flushed,
            'A' => OrderResult::AuthorizationError,
            'N' => OrderResult::NetworkError,
            'W' => OrderResult::WindowExceeded,
            'G' => OrderResult::InGateway,
            'S' => OrderResult::MatchingEngineShutdown,
            'Q' => OrderResult::InSequencer,
            'U' => OrderResult::Unknown,
            _ => OrderResult::Error,
        }
    }

    /// True for the results that mean the exchange took the order.
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            OrderResult::Valid | OrderResult::InGateway | OrderResult::InSequencer
        )
    }
}

/// Topic suffix selecting one of the five logical streams of a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Suffix {
    Order,
    HoldTrade,
    Trade,
    HoldBook,
    Book,
}

impl Suffix {
    pub const ALL: [Suffix; 5] = [
        Suffix::Order,
        Suffix::HoldTrade,
        Suffix::Trade,
        Suffix::HoldBook,
        Suffix::Book,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Suffix::Order => "_ORDER",
            Suffix::HoldTrade => "_HOLD_TRADE",
            Suffix::Trade => "_RELEASE_TRADE",
            Suffix::HoldBook => "_HOLD_BOOK",
            Suffix::Book => "_RELEASE_BOOK",
        }
    }

    /// Exact-match decode; anything unrecognised is [`Suffix::Order`].
    pub fn parse(suffix: &str) -> Self {
        Suffix::ALL
            .into_iter()
            .find(|s| s.as_str() == suffix)
            .unwrap_or(Suffix::Order)
    }

    /// True for the privileged hold streams.
    pub fn is_hold(self) -> bool {
        matches!(self, Suffix::HoldTrade | Suffix::HoldBook)
    }
}

/// One resting or transient instruction.
///
/// Timestamps are microseconds since the Unix epoch; `0` means not yet assigned.
/// Once all four are assigned, `genesis <= gateway <= enqueue <= dequeue`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Order {
    pub symbol: String,
    /// Assigned by the gateway; [`NULL_ID`] until assignment succeeds.
    pub order_id: String,
    /// Id of the order being cancelled; [`NULL_ID`] unless this is a cancel.
    pub cancel_id: String,
    pub client_id: String,
    pub action: OrderAction,
    pub order_type: OrderType,
    /// Unfilled shares.
    pub num_shares: u64,
    pub limit_price: i64,
    pub genesis_timestamp: u64,
    pub gateway_timestamp: u64,
    pub enqueue_timestamp: u64,
    pub dequeue_timestamp: u64,
    pub order_serial_num: u64,
    pub result: OrderResult,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            symbol: NULL_ID.into(),
            order_id: NULL_ID.into(),
            cancel_id: NULL_ID.into(),
            client_id: NULL_ID.into(),
            action: OrderAction::Flush,
            order_type: OrderType::Null,
            num_shares: 0,
            limit_price: 0,
            genesis_timestamp: 0,
            gateway_timestamp: 0,
            enqueue_timestamp: 0,
            dequeue_timestamp: 0,
            order_serial_num: 0,
            result: OrderResult::Unknown,
        }
    }
}

impl Order {
    /// New buy/sell instruction with unassigned ids and timestamps.
    pub fn new(
        symbol: impl Into<String>,
        client_id: impl Into<String>,
        action: OrderAction,
        order_type: OrderType,
        num_shares: u64,
        limit_price: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            client_id: client_id.into(),
            action,
            order_type,
            num_shares,
            limit_price,
            ..Default::default()
        }
    }

    /// Cancel instruction targeting `target_order_id`.
    pub fn cancel(client_id: impl Into<String>, target_order_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            cancel_id: target_order_id.into(),
            action: OrderAction::Cancel,
            ..Default::default()
        }
    }

    pub fn has_order_id(&self) -> bool {
        self.order_id != NULL_ID
    }

    pub fn is_cancel(&self) -> bool {
        self.action == OrderAction::Cancel
    }

    /// Arrival-fairness ordering: gateway timestamp only, never price.
    pub fn arrival_cmp(&self, other: &Order) -> Ordering {
        self.gateway_timestamp.cmp(&other.gateway_timestamp)
    }

    /// Latest lifecycle timestamp assigned so far (0 if none).
    pub fn last_event_timestamp(&self) -> u64 {
        self.genesis_timestamp
            .max(self.gateway_timestamp)
            .max(self.enqueue_timestamp)
            .max(self.dequeue_timestamp)
    }
}

/// Heap adaptor: in a `BinaryHeap<EarliestArrival>` the order with the smallest
/// gateway timestamp is popped first.
#[derive(Clone, Debug)]
pub struct EarliestArrival(pub Order);

impl PartialEq for EarliestArrival {
    fn eq(&self, other: &Self) -> bool {
        self.0.gateway_timestamp == other.0.gateway_timestamp
    }
}

impl Eq for EarliestArrival {}

impl PartialOrd for EarliestArrival {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EarliestArrival {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.arrival_cmp(&self.0)
    }
}
