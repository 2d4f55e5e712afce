//! # Crossfeed
//!
//! A single-venue, in-memory limit order matching engine with a dual
//! redundant market-data feed layer and a cross-feed arbitrage detector.
//!
//! ## Design Principles
//!
//! - **Single-Writer Books**: one worker thread owns all order books; every
//!   mutation flows through a serialized work queue
//! - **Price-Time Priority**: better price first, then FIFO within a level;
//!   executions always print at the resting order's price
//! - **Cache-Line Records**: `Order` and `Trade` are exactly 64 bytes and
//!   64-byte aligned
//! - **A/B Redundancy**: two feed simulators with independent latency models
//!   expose the timing gaps the arbitrage detector measures
//!
//! ## Architecture
//!
//! ```text
//! [Submitters] --> [SPSC Queue] --> [Engine Worker] --> trade/order callbacks
//!                                        |
//!                                  [OrderBooks]
//!
//! [Publishers] --> [Feed A] --\
//!              --> [Feed B] ---+--> [Arbitrage Detector] --> opportunities
//!                  (latency)   \--> synthetic orders into the engine (A only)
//! ```

pub mod arbitrage;
pub mod engine;
pub mod feed;
pub mod feed_handler;
pub mod market_data;
pub mod mpmc;
pub mod order;
pub mod order_book;
pub mod price_level;
pub mod spsc;

// Re-exports for convenience
pub use arbitrage::{ArbitrageDetector, ArbitrageOpportunity, ArbitrageStats};
pub use engine::{EngineError, EngineStatsSnapshot, MatchingEngine};
pub use feed::{FeedConfig, FeedSimulator};
pub use feed_handler::FeedHandler;
pub use market_data::{FeedId, FeedStatsSnapshot, MarketDataUpdate, Quote, TradeTick};
pub use mpmc::MpmcQueue;
pub use order::{now_ns, Order, OrderStatus, OrderType, Side, TimeInForce, Trade};
pub use order_book::{BookDepth, BookSnapshot, LevelInfo, OrderBook};
pub use price_level::PriceLevel;
pub use spsc::SpscQueue;
