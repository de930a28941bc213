//! Worker loops with cooperative shutdown.
//!
//! Each worker owns its state (watermarks, channel handles); only the
//! [`Trader`] is shared. Loops stop at the next tick after the token fires.

use crate::client::Trader;
use crate::error::ClientError;
use crate::messages::{LimitOrderBook, Trade};
use crate::recent::Watermark;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Calls `step` every `tick` until `token` is cancelled. Returns the number of
/// completed steps, or the first step error.
pub async fn run_worker<F>(token: CancellationToken, tick: Duration, mut step: F) -> Result<u64, ClientError>
where
    F: FnMut() -> Result<(), ClientError>,
{
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut steps = 0;
    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!("worker cancelled steps={}", steps);
                break;
            }
            _ = interval.tick() => {
                step()?;
                steps += 1;
            }
        }
    }
    Ok(steps)
}

/// One symbol's trade and book watermarks.
#[derive(Clone, Debug)]
pub struct SymbolWatch {
    pub symbol: String,
    pub trades: Watermark,
    pub books: Watermark,
}

impl SymbolWatch {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            trades: Watermark::default(),
            books: Watermark::default(),
        }
    }

    /// Everything released since the last poll; advances both watermarks.
    pub fn poll(&mut self, trader: &Trader) -> Result<(Vec<Trade>, Vec<LimitOrderBook>), ClientError> {
        let trades = trader.get_recent_trades(&self.symbol, self.trades.value())?;
        let books = trader.get_recent_lobs(&self.symbol, self.books.value())?;
        self.trades.advance(&trades);
        self.books.advance(&books);
        Ok((trades, books))
    }
}

/// Spawns one worker per symbol. `make_step` builds each worker's step
/// closure, which owns whatever per-symbol state it needs.
pub fn spawn_symbol_workers<F, S>(
    trader: Arc<Trader>,
    symbols: Vec<String>,
    tick: Duration,
    token: CancellationToken,
    make_step: F,
) -> Vec<JoinHandle<Result<u64, ClientError>>>
where
    F: Fn(Arc<Trader>, String) -> S,
    S: FnMut() -> Result<(), ClientError> + Send + 'static,
{
    symbols
        .into_iter()
        .map(|symbol| {
            info!("starting worker symbol={}", symbol);
            let step = make_step(Arc::clone(&trader), symbol.clone());
            let token = token.clone();
            tokio::spawn(async move {
                let result = run_worker(token, tick, step).await;
                if let Err(e) = &result {
                    warn!("worker stopped symbol={} err={}", symbol, e);
                }
                result
            })
        })
        .collect()
}
