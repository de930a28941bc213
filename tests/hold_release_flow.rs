//! End-to-end hold/release: gateway confirmations, held trades and books,
//! release after the fairness delay, archival, and the trader's view of it.

use exchange_client::archive::{self, ArchiveRecorder};
use exchange_client::Clock;
use exchange_client::{
    ArchiveLocation, ChannelLimits, ClientConfig, FairnessPolicy, HoldReleaseBuffer, InMemoryArchive,
    InProcessBus, ManualClock, Message, OrderAction, OrderType, PaperGateway, Subscription, Trade,
    Trader, Watermark, NULL_ID,
};
use std::sync::Arc;

const DELAY: u64 = 100_000;

fn init_log() {
    let _ = env_logger::try_init();
}

struct Session {
    bus: Arc<InProcessBus>,
    clock: ManualClock,
    gateway: PaperGateway,
    buffer: HoldReleaseBuffer,
    archive: Arc<InMemoryArchive>,
    recorder: ArchiveRecorder,
    c1: Trader,
    c2: Trader,
}

fn location() -> ArchiveLocation {
    ArchiveLocation::new("proj", "inst", "market")
}

fn config(client: &str, token: &str) -> ClientConfig {
    ClientConfig {
        gateway_address: "gw".into(),
        client_id: client.into(),
        client_token: token.into(),
        project_id: "proj".into(),
        instance_id: "inst".into(),
        table_id: "market".into(),
        ..Default::default()
    }
}

fn session() -> Session {
    init_log();
    let bus = Arc::new(InProcessBus::new());
    bus.bind("gw");
    let clock = ManualClock::new(10_000_000);
    let policy = FairnessPolicy {
        delay_us: DELAY,
        book_depth: 0,
    };
    let gateway = PaperGateway::new("G1", "gw", bus.clone(), Arc::new(clock.clone()), policy);
    gateway.list_symbol("AA");
    gateway.register_client("C1", "t1");
    gateway.register_client("C2", "t2");
    let buffer = HoldReleaseBuffer::new(bus.clone(), "gw", policy).unwrap();
    let archive = Arc::new(InMemoryArchive::new(location()));
    let mut recorder = ArchiveRecorder::new(archive.clone());
    recorder.watch_symbol(bus.as_ref(), "gw", "AA", ChannelLimits::default()).unwrap();
    for client in ["C1", "C2"] {
        recorder.watch_client(bus.as_ref(), "gw", client, ChannelLimits::default()).unwrap();
    }
    let trader = |client: &str, token: &str| {
        Trader::new(
            config(client, token),
            Box::new(gateway.connect(client, token)),
            bus.clone(),
            archive.clone(),
            Arc::new(clock.clone()),
        )
        .unwrap()
    };
    let c1 = trader("C1", "t1");
    let c2 = trader("C2", "t2");
    Session {
        bus,
        clock,
        gateway,
        buffer,
        archive,
        recorder,
        c1,
        c2,
    }
}

/// C1 rests a buy of 100 @ 50; C2 sells 40 into it.
fn cross(s: &mut Session) -> Trade {
    let buy = s
        .c1
        .submit_order(s.c1.new_order("AA", OrderAction::Buy, OrderType::Limit, 100, 50))
        .unwrap();
    s.clock.advance(10);
    let sell = s
        .c2
        .submit_order(s.c2.new_order("AA", OrderAction::Sell, OrderType::Limit, 40, 50))
        .unwrap();
    s.clock.advance(10);
    let trade = Trade::from_orders(&sell, &buy, s.gateway.next_trade_serial(), s.clock.now_micros());
    s.gateway.apply_trade(&trade);
    s.buffer.hold_trade(trade.clone()).unwrap();
    s.buffer.hold_book(s.gateway.book("AA")).unwrap();
    trade
}

#[test]
fn held_is_visible_before_released() {
    let mut s = session();
    let mut held = Subscription::open(
        s.bus.as_ref(),
        "gw",
        exchange_client::ChannelKind::HeldTrade,
        "AA",
        ChannelLimits::default(),
    )
    .unwrap();
    s.c1.config_active_symbols(&["AA"]).unwrap();

    let trade = cross(&mut s);
    let on_hold = held.fetch_next().unwrap().and_then(Message::into_trade).unwrap();
    assert_eq!(on_hold.buyer_client_id, "C1");
    assert!(s.c1.get_recent_trades("AA", 0).unwrap().is_empty());

    s.clock.advance(DELAY);
    s.buffer.release_due(s.clock.now_micros()).unwrap();
    let released = s.c1.get_recent_trades("AA", 0).unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].trade_serial_num, trade.trade_serial_num);
    assert!(on_hold.creation_timestamp < released[0].release_timestamp);
    assert_eq!(released[0].release_timestamp - released[0].creation_timestamp, DELAY);
    assert_eq!(released[0].buyer_client_id, NULL_ID);
    assert_eq!(released[0].seller_client_id, NULL_ID);
}

#[test]
fn trade_confirmations_hide_the_counterparty() {
    let mut s = session();
    let mut c1_trades = s.c1.trade_confirmations().unwrap();
    let mut c2_trades = s.c2.trade_confirmations().unwrap();
    cross(&mut s);
    assert_eq!(c1_trades.fetch_next().unwrap(), None);

    s.clock.advance(DELAY);
    s.buffer.release_due(s.clock.now_micros()).unwrap();
    let mine = c1_trades.fetch_next().unwrap().and_then(Message::into_trade).unwrap();
    assert_eq!((mine.buyer_client_id.as_str(), mine.seller_client_id.as_str()), ("C1", NULL_ID));
    let theirs = c2_trades.fetch_next().unwrap().and_then(Message::into_trade).unwrap();
    assert_eq!((theirs.buyer_client_id.as_str(), theirs.seller_client_id.as_str()), (NULL_ID, "C2"));
}

#[test]
fn watermark_polling_over_live_books() {
    let mut s = session();
    s.c1.config_active_symbols(&["AA"]).unwrap();
    cross(&mut s);
    s.clock.advance(DELAY);
    s.buffer.release_due(s.clock.now_micros()).unwrap();

    let mut mark = Watermark::default();
    let books = s.c1.get_recent_lobs("AA", mark.value()).unwrap();
    assert_eq!(books.len(), 1);
    let book = &books[0];
    assert_eq!(book.buy_queue.len(), 1);
    assert!(book.buy_queue.values().all(|o| o.client_id == NULL_ID));
    assert_eq!(book.buy_queue.values().next().map(|o| o.num_shares), Some(60));
    mark.advance(&books);
    assert!(s.c1.get_recent_lobs("AA", mark.value()).unwrap().is_empty());
}

#[test]
fn archive_backs_inactive_symbols_and_history() {
    let mut s = session();
    let trade = cross(&mut s);
    assert_eq!(s.recorder.pump().unwrap(), 4);
    assert!(s.archive.row_count() > 0);

    assert!(s.c1.get_recent_trades("AA", 0).unwrap().is_empty());
    s.clock.advance(DELAY);
    let from_archive = s.c1.get_recent_trades("AA", 0).unwrap();
    assert_eq!(from_archive.len(), 1);
    assert_eq!(from_archive[0].trade_serial_num, trade.trade_serial_num);

    let orders = s.c1.get_all_historical_orders().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].client_id, "C1");
    let trades = s.c1.get_all_historical_trades().unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].seller_client_id, NULL_ID);

    let data = archive::pull_market_data(s.archive.as_ref(), &location(), "AA", 0, u64::MAX).unwrap();
    assert_eq!(data.trades.len(), 1);
    assert_eq!(data.books.len(), 1);
}

#[test]
fn archive_outage_is_not_empty() {
    let s = session();
    s.archive.set_unavailable(true);
    assert!(matches!(
        s.c1.get_all_historical_orders(),
        Err(exchange_client::ClientError::ArchiveAccess(_))
    ));
}
