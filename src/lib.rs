//! # Exchange client
//!
//! Client-side protocol layer for an exchange gateway that delivers market data
//! under a fairness delay: wire codec, order identity and timestamp lifecycle,
//! subscription channels, the hold/release buffer, historical retrieval and the
//! [`Trader`] facade that strategies use.
//!
//! ## Example
//!
//! ```rust
//! use exchange_client::{wire, Order, OrderAction, OrderType, NULL_ID};
//!
//! let order = Order::new("AA", "C1", OrderAction::Buy, OrderType::Limit, 100, 50);
//! assert_eq!(order.order_id, NULL_ID);
//! let decoded = wire::decode_order(&wire::encode_order(&order, false)).unwrap();
//! assert_eq!(decoded, order);
//! ```
//!
//! ## In-process collaborators
//!
//! [`InProcessBus`], [`InMemoryArchive`] and [`PaperGateway`] implement the
//! transport, archive and gateway boundaries so a whole session can run in one
//! process; see `src/main.rs`.

pub mod archive;
pub mod audit;
pub mod bus;
pub mod channel;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod fairness;
pub mod gateway;
pub mod lifecycle;
pub mod market_data_gen;
pub mod messages;
pub mod recent;
pub mod types;
pub mod wire;
pub mod worker;

pub use archive::{Archive, ArchiveLocation, ArchiveRecorder, FairnessView, InMemoryArchive};
pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, LogAuditSink};
pub use bus::{InProcessBus, Transport};
pub use channel::{ChannelKind, ChannelLimits, Drained, Message, Subscription};
pub use client::Trader;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use error::ClientError;
pub use fairness::{FairnessPolicy, HoldReleaseBuffer, DEFAULT_FAIRNESS_DELAY_US};
pub use gateway::{GatewayLink, PaperGateway, PaperLink};
pub use market_data_gen::{replay_into_trader, Generator, GeneratorConfig};
pub use messages::{ClientInformationSnapshot, LimitOrderBook, Trade};
pub use recent::{since_watermark, Timestamped, Watermark};
pub use types::{EarliestArrival, Order, OrderAction, OrderResult, OrderType, Suffix, NULL_ID};
