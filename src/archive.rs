//! Historical retrieval from a time-indexed cell archive.
//!
//! Layout: one row per entity, keyed `{scope}#{creation_us:020}#{serial}` so a
//! prefix scan over `{scope}#` returns a scope's history in creation order.
//! Symbol rows carry the `trade` and `book` columns (anonymized market data);
//! client rows carry `order` and `client_trade` (that client's own view). Each
//! cell is timestamped in milliseconds and queries select an inclusive
//! `[start_ms, end_ms]` window.
//!
//! `Ok(vec![])` means no results. `Err(ArchiveAccess)` means the archive could
//! not be queried or a stored cell did not decode; the two are never conflated.

use crate::bus::Transport;
use crate::channel::{ChannelKind, ChannelLimits, Message, Subscription};
use crate::error::ClientError;
use crate::messages::{LimitOrderBook, Trade};
use crate::types::Order;
use crate::wire;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub const TRADE_COLUMN: &str = "trade";
pub const BOOK_COLUMN: &str = "book";
pub const ORDER_COLUMN: &str = "order";
pub const CLIENT_TRADE_COLUMN: &str = "client_trade";

/// Where the archive lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLocation {
    pub project_id: String,
    #[serde(alias = "bigtable_id")]
    pub instance_id: String,
    pub table_id: String,
}

impl ArchiveLocation {
    pub fn new(
        project_id: impl Into<String>,
        instance_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            instance_id: instance_id.into(),
            table_id: table_id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveQuery {
    pub location: ArchiveLocation,
    pub column: String,
    pub row_prefix: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl ArchiveQuery {
    pub fn new(location: &ArchiveLocation, column: &str, scope: &str, start_ms: u64, end_ms: u64) -> Self {
        Self {
            location: location.clone(),
            column: column.to_string(),
            row_prefix: row_prefix(scope),
            start_ms,
            end_ms,
        }
    }
}

/// Read side of the archive.
pub trait Archive: Send + Sync {
    /// Values of matching cells in ascending row-key order.
    fn read_cells(&self, query: &ArchiveQuery) -> Result<Vec<String>, ClientError>;
}

/// Write side, used only by privileged recorders.
pub trait ArchiveWriter: Send + Sync {
    fn write_cell(&self, row_key: &str, column: &str, timestamp_ms: u64, value: &str) -> Result<(), ClientError>;
}

pub fn row_prefix(scope: &str) -> String {
    format!("{}#", scope)
}

pub fn row_key(scope: &str, creation_us: u64, serial: u64) -> String {
    format!("{}#{:020}#{}", scope, creation_us, serial)
}

fn micros_to_ms(us: u64) -> u64 {
    us / 1_000
}

#[derive(Clone, Debug)]
struct Cell {
    timestamp_ms: u64,
    value: String,
}

/// Single-table archive held in memory. Cells are overwritten per (row, column).
#[derive(Debug)]
pub struct InMemoryArchive {
    location: ArchiveLocation,
    rows: Mutex<BTreeMap<String, BTreeMap<String, Cell>>>,
    unavailable: AtomicBool,
}

impl InMemoryArchive {
    pub fn new(location: ArchiveLocation) -> Self {
        Self {
            location,
            rows: Mutex::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn location(&self) -> &ArchiveLocation {
        &self.location
    }

    /// Simulates a connectivity failure: every read fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Archive for InMemoryArchive {
    fn read_cells(&self, query: &ArchiveQuery) -> Result<Vec<String>, ClientError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::ArchiveAccess("archive unreachable".into()));
        }
        if query.location != self.location {
            return Err(ClientError::ArchiveAccess(format!(
                "no table {}/{}/{}",
                query.location.project_id, query.location.instance_id, query.location.table_id
            )));
        }
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let cells = rows
            .range(query.row_prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&query.row_prefix))
            .filter_map(|(_, columns)| columns.get(&query.column))
            .filter(|cell| (query.start_ms..=query.end_ms).contains(&cell.timestamp_ms))
            .map(|cell| cell.value.clone())
            .collect();
        Ok(cells)
    }
}

impl ArchiveWriter for InMemoryArchive {
    fn write_cell(&self, row_key: &str, column: &str, timestamp_ms: u64, value: &str) -> Result<(), ClientError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::ArchiveAccess("archive unreachable".into()));
        }
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.entry(row_key.to_string()).or_default().insert(
            column.to_string(),
            Cell {
                timestamp_ms,
                value: value.to_string(),
            },
        );
        Ok(())
    }
}

/// Release-consistent view for client-specific pulls: nothing created within
/// `delay_us` of `issued_at_us` is visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FairnessView {
    pub delay_us: u64,
    pub issued_at_us: u64,
}

impl FairnessView {
    pub fn new(delay_us: u64, issued_at_us: u64) -> Self {
        Self {
            delay_us,
            issued_at_us,
        }
    }

    pub fn admits(&self, timestamp_us: u64) -> bool {
        timestamp_us.saturating_add(self.delay_us) <= self.issued_at_us
    }

    /// Latest millisecond that can hold admitted cells.
    fn clamp_end_ms(&self, end_ms: u64) -> u64 {
        end_ms.min(micros_to_ms(self.issued_at_us.saturating_sub(self.delay_us)))
    }
}

fn decode_cells<T>(
    cells: Vec<String>,
    column: &str,
    decode: fn(&str) -> Result<T, ClientError>,
) -> Result<Vec<T>, ClientError> {
    cells
        .iter()
        .map(|cell| {
            decode(cell).map_err(|e| ClientError::ArchiveAccess(format!("stored {} cell: {}", column, e)))
        })
        .collect()
}

/// Trades and books for one symbol over one window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarketData {
    pub trades: Vec<Trade>,
    pub books: Vec<LimitOrderBook>,
}

pub fn pull_trades(
    archive: &dyn Archive,
    location: &ArchiveLocation,
    symbol: &str,
    start_ms: u64,
    end_ms: u64,
) -> Result<Vec<Trade>, ClientError> {
    let query = ArchiveQuery::new(location, TRADE_COLUMN, symbol, start_ms, end_ms);
    let trades = decode_cells(archive.read_cells(&query)?, TRADE_COLUMN, wire::decode_trade)?;
    debug!("pulled trades symbol={} count={}", symbol, trades.len());
    Ok(trades)
}

pub fn pull_books(
    archive: &dyn Archive,
    location: &ArchiveLocation,
    symbol: &str,
    start_ms: u64,
    end_ms: u64,
) -> Result<Vec<LimitOrderBook>, ClientError> {
    let query = ArchiveQuery::new(location, BOOK_COLUMN, symbol, start_ms, end_ms);
    let books = decode_cells(archive.read_cells(&query)?, BOOK_COLUMN, wire::decode_book)?;
    debug!("pulled books symbol={} count={}", symbol, books.len());
    Ok(books)
}

pub fn pull_market_data(
    archive: &dyn Archive,
    location: &ArchiveLocation,
    symbol: &str,
    start_ms: u64,
    end_ms: u64,
) -> Result<MarketData, ClientError> {
    Ok(MarketData {
        trades: pull_trades(archive, location, symbol, start_ms, end_ms)?,
        books: pull_books(archive, location, symbol, start_ms, end_ms)?,
    })
}

/// A client's own orders, as of `view`.
pub fn pull_orders(
    archive: &dyn Archive,
    location: &ArchiveLocation,
    client_id: &str,
    start_ms: u64,
    end_ms: u64,
    view: FairnessView,
) -> Result<Vec<Order>, ClientError> {
    let query = ArchiveQuery::new(location, ORDER_COLUMN, client_id, start_ms, view.clamp_end_ms(end_ms));
    let mut orders = decode_cells(archive.read_cells(&query)?, ORDER_COLUMN, wire::decode_order)?;
    orders.retain(|o| view.admits(o.gateway_timestamp));
    debug!("pulled orders client={} count={}", client_id, orders.len());
    Ok(orders)
}

/// Trades a client took part in, counterparty anonymized, as of `view`.
pub fn pull_client_trades(
    archive: &dyn Archive,
    location: &ArchiveLocation,
    client_id: &str,
    start_ms: u64,
    end_ms: u64,
    view: FairnessView,
) -> Result<Vec<Trade>, ClientError> {
    let query = ArchiveQuery::new(
        location,
        CLIENT_TRADE_COLUMN,
        client_id,
        start_ms,
        view.clamp_end_ms(end_ms),
    );
    let mut trades = decode_cells(archive.read_cells(&query)?, CLIENT_TRADE_COLUMN, wire::decode_trade)?;
    trades.retain(|t| view.admits(t.creation_timestamp));
    debug!("pulled client trades client={} count={}", client_id, trades.len());
    Ok(trades)
}

/// Privileged consumer that writes hold-channel traffic and order
/// confirmations into the archive.
pub struct ArchiveRecorder {
    writer: Arc<dyn ArchiveWriter>,
    subscriptions: Vec<Subscription>,
    /// Fetched but not yet written; retried first on the next pump.
    backlog: VecDeque<Message>,
    book_seq: u64,
}

impl ArchiveRecorder {
    pub fn new(writer: Arc<dyn ArchiveWriter>) -> Self {
        Self {
            writer,
            subscriptions: Vec::new(),
            backlog: VecDeque::new(),
            book_seq: 0,
        }
    }

    /// Follows a symbol's held trades and books.
    pub fn watch_symbol(
        &mut self,
        transport: &dyn Transport,
        gateway: &str,
        symbol: &str,
        limits: ChannelLimits,
    ) -> Result<(), ClientError> {
        for kind in [ChannelKind::HeldTrade, ChannelKind::HeldBook] {
            self.subscriptions
                .push(Subscription::open(transport, gateway, kind, symbol, limits)?);
        }
        Ok(())
    }

    /// Follows a client's order confirmations.
    pub fn watch_client(
        &mut self,
        transport: &dyn Transport,
        gateway: &str,
        client_id: &str,
        limits: ChannelLimits,
    ) -> Result<(), ClientError> {
        self.subscriptions.push(Subscription::order_confirmations(
            transport, gateway, client_id, limits,
        )?);
        Ok(())
    }

    /// Drains every watched channel into the archive and returns how many
    /// messages were written. Overflow and malformed records are logged and
    /// skipped. A failed write keeps the message for the next pump.
    pub fn pump(&mut self) -> Result<usize, ClientError> {
        let mut written = 0;
        while let Some(message) = self.backlog.pop_front() {
            if let Err(e) = self.record(&message) {
                self.backlog.push_front(message);
                return Err(e);
            }
            written += 1;
        }
        for i in 0..self.subscriptions.len() {
            loop {
                let message = match self.subscriptions[i].fetch_next() {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(ClientError::ChannelOverflow { topic, dropped }) => {
                        warn!("archive recorder lost records topic={} dropped={}", topic, dropped);
                        continue;
                    }
                    Err(ClientError::MalformedRecord { kind, reason }) => {
                        warn!(
                            "archive recorder skipped malformed {} record topic={} reason={}",
                            kind,
                            self.subscriptions[i].topic(),
                            reason
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if let Err(e) = self.record(&message) {
                    warn!("archive write failed, keeping message for retry err={}", e);
                    self.backlog.push_back(message);
                    return Err(e);
                }
                written += 1;
            }
        }
        Ok(written)
    }

    /// Messages fetched but not yet written.
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    fn record(&mut self, message: &Message) -> Result<(), ClientError> {
        match message {
            Message::Order(order) => self.record_order(order),
            Message::Trade(trade) => self.record_trade(trade),
            Message::Book(book) => self.record_book(book),
        }
    }

    /// Market row gets the fully anonymized trade; each counterparty's row
    /// gets its own view with the other side anonymized.
    pub fn record_trade(&mut self, trade: &Trade) -> Result<(), ClientError> {
        let ts_ms = micros_to_ms(trade.creation_timestamp);
        let serial = trade.trade_serial_num;
        self.writer.write_cell(
            &row_key(&trade.symbol, trade.creation_timestamp, serial),
            TRADE_COLUMN,
            ts_ms,
            &wire::encode_trade(trade, true, true),
        )?;
        self.writer.write_cell(
            &row_key(&trade.buyer_client_id, trade.creation_timestamp, serial),
            CLIENT_TRADE_COLUMN,
            ts_ms,
            &wire::encode_trade(trade, false, true),
        )?;
        self.writer.write_cell(
            &row_key(&trade.seller_client_id, trade.creation_timestamp, serial),
            CLIENT_TRADE_COLUMN,
            ts_ms,
            &wire::encode_trade(trade, true, false),
        )
    }

    pub fn record_book(&mut self, book: &LimitOrderBook) -> Result<(), ClientError> {
        let seq = self.book_seq;
        self.book_seq += 1;
        self.writer.write_cell(
            &row_key(&book.symbol, book.creation_timestamp, seq),
            BOOK_COLUMN,
            micros_to_ms(book.creation_timestamp),
            &wire::encode_book(book, 0, true),
        )
    }

    pub fn record_order(&mut self, order: &Order) -> Result<(), ClientError> {
        self.writer.write_cell(
            &row_key(&order.client_id, order.gateway_timestamp, order.order_serial_num),
            ORDER_COLUMN,
            micros_to_ms(order.gateway_timestamp),
            &wire::encode_order(order, false),
        )
    }
}
