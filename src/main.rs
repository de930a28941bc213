//! Paper trading session: bus, paper gateway, hold/release loop, archive
//! recorder and one trader, all in process.
//!
//! `GATEWAY_ID` (default `G1`) and `FAIRNESS_DELAY_US` (default 100 ms) tune the run.

use exchange_client::archive::ArchiveRecorder;
use exchange_client::fairness::run_release_loop;
use exchange_client::worker::SymbolWatch;
use exchange_client::{
    ChannelLimits, ClientConfig, Clock, FairnessPolicy, HoldReleaseBuffer, InMemoryArchive,
    InProcessBus, Message, OrderAction, OrderType, PaperGateway, SystemClock, Trade, Trader,
};
use log::{error, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GATEWAY_ADDRESS: &str = "paper";

#[tokio::main]
async fn main() {
    let _ = env_logger::try_init();
    if let Err(e) = run().await {
        error!("session failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let gateway_id = std::env::var("GATEWAY_ID").unwrap_or_else(|_| "G1".to_string());
    let config = ClientConfig {
        gateway_address: GATEWAY_ADDRESS.into(),
        client_id: "C1".into(),
        client_token: "t1".into(),
        project_id: "paper".into(),
        instance_id: "local".into(),
        table_id: "market".into(),
        fairness: FairnessPolicy {
            book_depth: 10,
            ..Default::default()
        },
        ..Default::default()
    }
    .with_env_overrides()?;
    let policy = config.fairness;
    let delay_us = policy.delay_us;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let bus = Arc::new(InProcessBus::new());
    bus.bind(GATEWAY_ADDRESS);
    let gateway = PaperGateway::new(&gateway_id, GATEWAY_ADDRESS, bus.clone(), clock.clone(), policy);
    for symbol in ["AA", "AB"] {
        gateway.list_symbol(symbol);
    }
    gateway.register_client("C1", "t1");
    gateway.register_client("C2", "t2");

    let archive = Arc::new(InMemoryArchive::new(config.archive_location()));
    let mut recorder = ArchiveRecorder::new(archive.clone());
    for symbol in ["AA", "AB"] {
        recorder.watch_symbol(bus.as_ref(), GATEWAY_ADDRESS, symbol, ChannelLimits::default())?;
    }
    for client in ["C1", "C2"] {
        recorder.watch_client(bus.as_ref(), GATEWAY_ADDRESS, client, ChannelLimits::default())?;
    }

    let buffer = Arc::new(Mutex::new(HoldReleaseBuffer::new(bus.clone(), GATEWAY_ADDRESS, policy)?));
    let token = CancellationToken::new();
    let release = tokio::spawn(run_release_loop(
        buffer.clone(),
        clock.clone(),
        Duration::from_millis(5),
        token.clone(),
    ));

    let c1 = Trader::new(
        config.clone(),
        Box::new(gateway.connect("C1", "t1")),
        bus.clone(),
        archive.clone(),
        clock.clone(),
    )?;
    let c2 = Trader::new(
        ClientConfig {
            client_id: "C2".into(),
            client_token: "t2".into(),
            ..config.clone()
        },
        Box::new(gateway.connect("C2", "t2")),
        bus.clone(),
        archive.clone(),
        clock.clone(),
    )?;
    info!("symbols listed {:?}", c1.pull_symbol_list()?);
    c1.config_active_symbols(&["AA"])?;
    let mut confirmations = c1.trade_confirmations()?;
    let mut watch = SymbolWatch::new("AA");

    let buy = c1.submit_order(c1.new_order("AA", OrderAction::Buy, OrderType::Limit, 100, 50))?;
    let sell = c2.submit_order(c2.new_order("AA", OrderAction::Sell, OrderType::Limit, 40, 50))?;
    info!("resting buy={} incoming sell={}", buy.order_id, sell.order_id);

    let trade = Trade::from_orders(&sell, &buy, gateway.next_trade_serial(), clock.now_micros());
    gateway.apply_trade(&trade);
    {
        let mut buffer = buffer.lock().map_err(|_| "release buffer poisoned")?;
        buffer.hold_trade(trade)?;
        buffer.hold_book(gateway.book("AA"))?;
    }

    let (trades, books) = watch.poll(&c1)?;
    info!("before release: trades={} books={}", trades.len(), books.len());
    tokio::time::sleep(Duration::from_micros(delay_us) + Duration::from_millis(20)).await;
    let (trades, books) = watch.poll(&c1)?;
    info!("after release: trades={} books={}", trades.len(), books.len());
    while let Some(Message::Trade(t)) = confirmations.fetch_next()? {
        info!(
            "trade confirmation buyer={} seller={} shares={} price={}",
            t.buyer_client_id, t.seller_client_id, t.shares_traded, t.exec_price
        );
    }

    let cancel = c1.submit_cancel(&buy.order_id)?;
    info!("cancelled target={} with {}", cancel.cancel_id, cancel.order_id);

    let recorded = recorder.pump()?;
    info!("archived {} messages", recorded);
    tokio::time::sleep(Duration::from_micros(delay_us)).await;
    info!("portfolio {:?}", c1.get_portfolio()?);
    info!("historical orders {}", c1.get_all_historical_orders()?.len());
    info!("historical trades {}", c1.get_all_historical_trades()?.len());

    token.cancel();
    let released = release.await??;
    info!("session done released={}", released);
    Ok(())
}
