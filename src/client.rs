//! Client facade: the one surface a strategy talks to.
//!
//! Submissions go through a single gateway link behind a mutex, so concurrent
//! workers never interleave records. Market data comes from release channels
//! for active symbols and from the archive otherwise. Hold channels are never
//! opened here.

use crate::archive::{self, Archive, FairnessView};
use crate::audit::{AuditEvent, AuditSink, LogAuditSink};
use crate::bus::Transport;
use crate::channel::{Message, Subscription};
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gateway::GatewayLink;
use crate::messages::{ClientInformationSnapshot, LimitOrderBook, Trade};
use crate::recent::{since_watermark, RecentCache};
use crate::types::{Order, OrderAction, OrderResult, OrderType};
use crate::wire;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct SymbolFeed {
    trades: Subscription,
    books: Subscription,
    recent_trades: RecentCache<Trade>,
    recent_books: RecentCache<LimitOrderBook>,
}

impl SymbolFeed {
    fn pump(&mut self) -> Result<(), ClientError> {
        while let Some(message) = self.trades.fetch_next()? {
            if let Message::Trade(trade) = message {
                self.recent_trades.push(trade);
            }
        }
        while let Some(message) = self.books.fetch_next()? {
            if let Message::Book(book) = message {
                self.recent_books.push(book);
            }
        }
        Ok(())
    }
}

/// Trading client for one client id.
pub struct Trader {
    config: ClientConfig,
    link: Mutex<Box<dyn GatewayLink>>,
    transport: Arc<dyn Transport>,
    archive: Arc<dyn Archive>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    feeds: Mutex<BTreeMap<String, SymbolFeed>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Trader {
    pub fn new(
        config: ClientConfig,
        link: Box<dyn GatewayLink>,
        transport: Arc<dyn Transport>,
        archive: Arc<dyn Archive>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            config,
            link: Mutex::new(link),
            transport,
            archive,
            clock,
            audit: Arc::new(LogAuditSink),
            feeds: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Limit or market order for this client, ready for [`Trader::submit_order`].
    pub fn new_order(
        &self,
        symbol: &str,
        action: OrderAction,
        order_type: OrderType,
        num_shares: u64,
        limit_price: i64,
    ) -> Order {
        Order::new(symbol, self.client_id(), action, order_type, num_shares, limit_price)
    }

    /// Stamps genesis time and sends `order`. Returns the gateway's
    /// confirmation when it was accepted.
    ///
    /// If the link fails mid-submission the order may still have been placed:
    /// the error is [`ClientError::OutcomeUnknown`] carrying the order with
    /// result `NetworkError`; reconcile with [`Trader::get_all_historical_orders`].
    pub fn submit_order(&self, mut order: Order) -> Result<Order, ClientError> {
        order.client_id = self.config.client_id.clone();
        order.assign_genesis_timestamp(self.clock.as_ref());
        let record = wire::encode_order(&order, false);
        info!(
            "order submitted client={} symbol={} action={:?} type={:?} shares={} price={} cancel_id={}",
            order.client_id,
            order.symbol,
            order.action,
            order.order_type,
            order.num_shares,
            order.limit_price,
            order.cancel_id
        );

        let reply = lock(&self.link).submit(&record);
        let confirmed = match reply.and_then(|r| wire::decode_order(&r)) {
            Ok(confirmed) => confirmed,
            Err(e) => {
                warn!("submission outcome unknown client={} err={}", order.client_id, e);
                order.result = OrderResult::NetworkError;
                self.audit
                    .emit(&AuditEvent::for_order(&order, format!("error:{}", e)));
                return Err(ClientError::OutcomeUnknown {
                    order: Box::new(order),
                    reason: e.to_string(),
                });
            }
        };

        info!(
            "order confirmed order_id={} result={:?} gateway_ts={}",
            confirmed.order_id, confirmed.result, confirmed.gateway_timestamp
        );
        match confirmed.result {
            r if r.is_accepted() => {
                self.audit.emit(&AuditEvent::for_order(&confirmed, "accepted"));
                Ok(confirmed)
            }
            OrderResult::Duplicate => {
                self.audit
                    .emit(&AuditEvent::for_order(&confirmed, "rejected:Duplicate"));
                Err(ClientError::DuplicateSubmission {
                    order_id: confirmed.order_id,
                })
            }
            result => {
                self.audit
                    .emit(&AuditEvent::for_order(&confirmed, format!("rejected:{:?}", result)));
                Err(ClientError::GatewayRejected {
                    order_id: confirmed.order_id,
                    result,
                })
            }
        }
    }

    /// Cancels `target_order_id`. The cancel gets its own id; the confirmation's
    /// `cancel_id` is the target.
    pub fn submit_cancel(&self, target_order_id: &str) -> Result<Order, ClientError> {
        let cancel = Order::cancel(self.client_id(), target_order_id);
        info!("order cancel requested target={}", target_order_id);
        self.submit_order(cancel)
    }

    /// Replaces the set of symbols followed on release channels. Feeds for
    /// symbols no longer listed are dropped with their caches. If any new
    /// feed fails to open, the active set is left as it was.
    pub fn config_active_symbols<S: AsRef<str>>(&self, symbols: &[S]) -> Result<(), ClientError> {
        let limits = self.config.channel_limits();
        let gateway = self.config.gateway_address.as_str();
        let wanted: BTreeSet<&str> = symbols.iter().map(AsRef::as_ref).collect();
        let mut feeds = lock(&self.feeds);
        let mut opened = BTreeMap::new();
        for &symbol in wanted.iter().filter(|s| !feeds.contains_key(**s)) {
            let feed = SymbolFeed {
                trades: Subscription::trade_reports(self.transport.as_ref(), gateway, symbol, limits)?,
                books: Subscription::limit_books(self.transport.as_ref(), gateway, symbol, limits)?,
                recent_trades: RecentCache::new(self.config.recent_capacity),
                recent_books: RecentCache::new(self.config.recent_capacity),
            };
            opened.insert(symbol.to_string(), feed);
        }
        feeds.retain(|symbol, _| wanted.contains(symbol.as_str()));
        feeds.extend(opened);
        info!("active symbols set to {:?}", feeds.keys().collect::<Vec<_>>());
        Ok(())
    }

    pub fn active_symbols(&self) -> Vec<String> {
        lock(&self.feeds).keys().cloned().collect()
    }

    /// Released trades on `symbol` created after `watermark`, oldest first.
    pub fn get_recent_trades(&self, symbol: &str, watermark: u64) -> Result<Vec<Trade>, ClientError> {
        let now = self.clock.now_micros();
        if let Some(feed) = lock(&self.feeds).get_mut(symbol) {
            feed.pump()?;
            return Ok(feed.recent_trades.since(watermark, now));
        }
        let trades = archive::pull_trades(
            self.archive.as_ref(),
            &self.config.archive_location(),
            symbol,
            watermark / 1_000,
            now / 1_000,
        )?;
        Ok(since_watermark(&trades, watermark, now))
    }

    /// Released books on `symbol` created after `watermark`, oldest first.
    pub fn get_recent_lobs(&self, symbol: &str, watermark: u64) -> Result<Vec<LimitOrderBook>, ClientError> {
        let now = self.clock.now_micros();
        if let Some(feed) = lock(&self.feeds).get_mut(symbol) {
            feed.pump()?;
            return Ok(feed.recent_books.since(watermark, now));
        }
        let books = archive::pull_books(
            self.archive.as_ref(),
            &self.config.archive_location(),
            symbol,
            watermark / 1_000,
            now / 1_000,
        )?;
        Ok(since_watermark(&books, watermark, now))
    }

    pub fn pull_client_information(&self) -> Result<ClientInformationSnapshot, ClientError> {
        let record = lock(&self.link).client_information(&self.config.client_id, &self.config.client_token)?;
        wire::decode_snapshot(&record)
    }

    /// Resting orders keyed by order id.
    pub fn get_outstanding_orders(&self) -> Result<BTreeMap<String, Order>, ClientError> {
        Ok(self
            .pull_client_information()?
            .outstanding_orders
            .into_iter()
            .map(|o| (o.order_id.clone(), o))
            .collect())
    }

    /// Signed position per symbol.
    pub fn get_portfolio(&self) -> Result<BTreeMap<String, i64>, ClientError> {
        Ok(self.pull_client_information()?.portfolio)
    }

    fn fairness_view(&self) -> FairnessView {
        FairnessView::new(self.config.fairness.delay_us, self.clock.now_micros())
    }

    /// Every order this client placed, as far as the archive has released it.
    pub fn get_all_historical_orders(&self) -> Result<Vec<Order>, ClientError> {
        let view = self.fairness_view();
        archive::pull_orders(
            self.archive.as_ref(),
            &self.config.archive_location(),
            &self.config.client_id,
            0,
            view.issued_at_us / 1_000,
            view,
        )
    }

    /// Every trade this client took part in, counterparty anonymized.
    pub fn get_all_historical_trades(&self) -> Result<Vec<Trade>, ClientError> {
        let view = self.fairness_view();
        archive::pull_client_trades(
            self.archive.as_ref(),
            &self.config.archive_location(),
            &self.config.client_id,
            0,
            view.issued_at_us / 1_000,
            view,
        )
    }

    pub fn pull_symbol_list(&self) -> Result<Vec<String>, ClientError> {
        lock(&self.link).symbols()
    }

    /// A fresh order confirmation channel, owned by the calling worker.
    pub fn order_confirmations(&self) -> Result<Subscription, ClientError> {
        Subscription::order_confirmations(
            self.transport.as_ref(),
            &self.config.gateway_address,
            &self.config.client_id,
            self.config.channel_limits(),
        )
    }

    /// A fresh trade confirmation channel, owned by the calling worker.
    pub fn trade_confirmations(&self) -> Result<Subscription, ClientError> {
        Subscription::trade_confirmations(
            self.transport.as_ref(),
            &self.config.gateway_address,
            &self.config.client_id,
            self.config.channel_limits(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveLocation, InMemoryArchive};
    use crate::audit::InMemoryAuditSink;
    use crate::bus::InProcessBus;
    use crate::clock::{ManualClock, SystemClock};
    use crate::fairness::FairnessPolicy;
    use crate::gateway::PaperGateway;
    use crate::types::NULL_ID;

    struct Fixture {
        bus: Arc<InProcessBus>,
        clock: ManualClock,
        gateway: PaperGateway,
        audit: InMemoryAuditSink,
        trader: Trader,
    }

    fn config() -> ClientConfig {
        ClientConfig {
            gateway_address: "gw".into(),
            client_id: "C1".into(),
            client_token: "t1".into(),
            project_id: "proj".into(),
            instance_id: "inst".into(),
            table_id: "market".into(),
            ..Default::default()
        }
    }

    fn fixture() -> Fixture {
        let _ = env_logger::try_init();
        let bus = Arc::new(InProcessBus::new());
        bus.bind("gw");
        let clock = ManualClock::new(1_000_000);
        let gateway = PaperGateway::new("G1", "gw", bus.clone(), Arc::new(clock.clone()), FairnessPolicy::default());
        gateway.list_symbol("AA");
        gateway.register_client("C1", "t1");
        let archive = Arc::new(InMemoryArchive::new(ArchiveLocation::new("proj", "inst", "market")));
        let audit = InMemoryAuditSink::new();
        let trader = Trader::new(
            config(),
            Box::new(gateway.connect("C1", "t1")),
            bus.clone(),
            archive,
            Arc::new(clock.clone()),
        )
        .unwrap()
        .with_audit(Arc::new(audit.clone()));
        Fixture {
            bus,
            clock,
            gateway,
            audit,
            trader,
        }
    }

    #[test]
    fn buy_aa_is_identified_and_stamped() {
        let f = fixture();
        let order = f.trader.new_order("AA", OrderAction::Buy, OrderType::Limit, 100, 50);
        assert_eq!(order.order_id, NULL_ID);
        f.clock.advance(1);
        let confirmed = f.trader.submit_order(order).unwrap();
        assert_ne!(confirmed.order_id, NULL_ID);
        assert_eq!(confirmed.genesis_timestamp, 1_000_001);
        let decoded = wire::decode_order(&wire::encode_order(&confirmed, false)).unwrap();
        assert_eq!(decoded.symbol, "AA");
        assert_eq!(decoded.num_shares, 100);
        assert_eq!(decoded.limit_price, 50);
        assert_eq!(decoded.action, OrderAction::Buy);
        assert_eq!(decoded.order_type, OrderType::Limit);
        assert_eq!(f.audit.events().len(), 1);
    }

    #[test]
    fn rejections_map_to_errors() {
        let f = fixture();
        let confirmed = f
            .trader
            .submit_order(f.trader.new_order("AA", OrderAction::Buy, OrderType::Limit, 1, 1))
            .unwrap();
        assert!(matches!(
            f.trader.submit_order(confirmed),
            Err(ClientError::DuplicateSubmission { .. })
        ));
        assert!(matches!(
            f.trader.submit_order(f.trader.new_order("ZZ", OrderAction::Buy, OrderType::Limit, 1, 1)),
            Err(ClientError::GatewayRejected {
                result: OrderResult::Invalid,
                ..
            })
        ));
        let outcomes: Vec<String> = f.audit.events().into_iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec!["accepted", "rejected:Duplicate", "rejected:Invalid"]);
    }

    #[test]
    fn lost_link_is_outcome_unknown() {
        let f = fixture();
        f.gateway.set_lose_confirmations(true);
        let err = f
            .trader
            .submit_order(f.trader.new_order("AA", OrderAction::Sell, OrderType::Limit, 5, 10))
            .unwrap_err();
        match err {
            ClientError::OutcomeUnknown { order, .. } => assert_eq!(order.result, OrderResult::NetworkError),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.gateway.outstanding("C1").len(), 1);
    }

    #[test]
    fn cancel_and_outstanding_orders() {
        let f = fixture();
        let placed = f
            .trader
            .submit_order(f.trader.new_order("AA", OrderAction::Buy, OrderType::Limit, 10, 5))
            .unwrap();
        f.clock.advance(200_000);
        assert!(f.trader.get_outstanding_orders().unwrap().contains_key(&placed.order_id));
        let cancel = f.trader.submit_cancel(&placed.order_id).unwrap();
        assert_eq!(cancel.cancel_id, placed.order_id);
        assert!(f.trader.get_outstanding_orders().unwrap().is_empty());
        assert!(f.trader.get_portfolio().unwrap().is_empty());
    }

    #[test]
    fn active_symbols_are_replaced() {
        let f = fixture();
        f.trader.config_active_symbols(&["AA", "AB"]).unwrap();
        assert_eq!(f.trader.active_symbols(), vec!["AA", "AB"]);
        f.trader.config_active_symbols(&["AB"]).unwrap();
        assert_eq!(f.trader.active_symbols(), vec!["AB"]);
        assert_eq!(f.trader.pull_symbol_list().unwrap(), vec!["AA"]);
    }

    #[test]
    fn failed_symbol_change_keeps_existing_feeds() {
        let f = fixture();
        f.trader.config_active_symbols(&["AA", "AB"]).unwrap();
        let trade = Trade {
            symbol: "AA".into(),
            exec_price: 50,
            shares_traded: 5,
            creation_timestamp: 500,
            release_timestamp: 600,
            trade_serial_num: 1,
            ..Default::default()
        };
        f.bus
            .publish("gw", "AA_RELEASE_TRADE", &wire::encode_trade(&trade, true, true))
            .unwrap();

        assert!(f.trader.config_active_symbols(&["AA", ""]).is_err());
        assert_eq!(f.trader.active_symbols(), vec!["AA", "AB"]);
        let recent = f.trader.get_recent_trades("AA", 0).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].trade_serial_num, 1);
    }

    #[test]
    fn gateway_stamp_follows_genesis() {
        let bus = Arc::new(InProcessBus::new());
        bus.bind("gw");
        let clock = Arc::new(SystemClock::new());
        let gateway = PaperGateway::new("G1", "gw", bus.clone(), clock.clone(), FairnessPolicy::default());
        gateway.list_symbol("AA");
        gateway.register_client("C1", "t1");
        let archive = Arc::new(InMemoryArchive::new(ArchiveLocation::new("proj", "inst", "market")));
        let trader = Trader::new(config(), Box::new(gateway.connect("C1", "t1")), bus, archive, clock).unwrap();
        let confirmed = trader
            .submit_order(trader.new_order("AA", OrderAction::Buy, OrderType::Limit, 100, 50))
            .unwrap();
        assert!(confirmed.genesis_timestamp > 0);
        assert!(confirmed.gateway_timestamp > confirmed.genesis_timestamp);
        assert!(confirmed.enqueue_timestamp > confirmed.gateway_timestamp);
    }

    #[test]
    fn inactive_symbol_reads_archive() {
        let f = fixture();
        assert!(f.trader.get_recent_trades("AA", 0).unwrap().is_empty());
        assert!(f.trader.get_recent_lobs("AA", 0).unwrap().is_empty());
    }
}
