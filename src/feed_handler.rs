//! Feed handler - wires the A/B feeds, the arbitrage detector, and the
//! matching engine together.
//!
//! Published market data fans out to both simulators. Every delivered
//! update reaches the arbitrage detector; quotes delivered on feed A (the
//! primary) are additionally turned into synthetic bid/ask limit orders and
//! submitted to the engine. Synthetic orders get fresh ids on every quote
//! and prior ones are not cancelled, so resting liquidity accumulates for
//! as long as quotes keep flowing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::arbitrage::{ArbitrageDetector, ArbitrageOpportunity, ArbitrageStats};
use crate::engine::{EngineStatsSnapshot, MatchingEngine};
use crate::feed::{FeedConfig, FeedSimulator};
use crate::market_data::{FeedId, FeedStatsSnapshot, MarketDataUpdate, Quote};
use crate::order::{Order, Side};

/// Synthetic engine-side order ids start here so they never collide with
/// externally assigned ids.
pub const SYNTHETIC_ORDER_ID_START: u64 = 1_000_000;

/// Opportunities below this profit are not worth logging.
const LOGGED_PROFIT_THRESHOLD_BPS: f64 = 1.0;

static NEXT_SYNTHETIC_ORDER_ID: AtomicU64 = AtomicU64::new(SYNTHETIC_ORDER_ID_START);

fn next_synthetic_order_id() -> u64 {
    NEXT_SYNTHETIC_ORDER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Composes the dual feed pipeline around a matching engine.
pub struct FeedHandler {
    engine: Arc<MatchingEngine>,
    feed_a: Arc<FeedSimulator>,
    feed_b: Arc<FeedSimulator>,
    detector: Arc<ArbitrageDetector>,
}

impl FeedHandler {
    /// Build the handler with the reference A/B configurations: A primary
    /// and fast, B backup with doubled base latency and heavier spikes.
    pub fn new(engine: Arc<MatchingEngine>) -> Self {
        let config_a = FeedConfig {
            base_latency_ns: 5_000,
            jitter_normal_ns: 1_000,
            jitter_spike_ns: 500_000,
            spike_probability: 0.001,
            is_primary_feed: true,
            ..FeedConfig::default()
        };
        let config_b = FeedConfig {
            base_latency_ns: 10_000,
            jitter_normal_ns: 2_000,
            jitter_spike_ns: 1_000_000,
            spike_probability: 0.002,
            is_primary_feed: false,
            ..FeedConfig::default()
        };
        Self::with_configs(engine, config_a, config_b)
    }

    /// Build the handler with explicit per-feed configurations.
    pub fn with_configs(
        engine: Arc<MatchingEngine>,
        config_a: FeedConfig,
        config_b: FeedConfig,
    ) -> Self {
        let feed_a = Arc::new(FeedSimulator::new(FeedId::A, config_a));
        let feed_b = Arc::new(FeedSimulator::new(FeedId::B, config_b));
        let detector = Arc::new(ArbitrageDetector::new());

        // Feed A drives both the detector and the engine
        {
            let detector = Arc::clone(&detector);
            let engine = Arc::clone(&engine);
            feed_a.set_callback(move |update, _stats| {
                detector.on_feed_update(update);
                if let MarketDataUpdate::Quote(quote) = update {
                    submit_synthetic_orders(&engine, quote);
                }
            });
        }

        // Feed B only informs the detector
        {
            let detector = Arc::clone(&detector);
            feed_b.set_callback(move |update, _stats| {
                detector.on_feed_update(update);
            });
        }

        detector.set_callback(|opportunity: &ArbitrageOpportunity| {
            if opportunity.is_profitable()
                && opportunity.profit_basis_points() > LOGGED_PROFIT_THRESHOLD_BPS
            {
                info!(
                    symbol_id = opportunity.symbol_id,
                    profit_bps = opportunity.profit_basis_points(),
                    latency_diff_us = opportunity.latency_difference_ns as f64 / 1_000.0,
                    fast_feed = %opportunity.fast_feed,
                    "arbitrage opportunity"
                );
            }
        });

        Self {
            engine,
            feed_a,
            feed_b,
            detector,
        }
    }

    /// Start the engine it owns, then both feeds.
    pub fn start(&self) -> Result<(), crate::engine::EngineError> {
        self.engine.start()?;
        self.feed_a.start();
        self.feed_b.start();
        info!("feed handler started with A/B feeds");
        Ok(())
    }

    /// Stop both feeds, then the engine.
    pub fn stop(&self) {
        self.feed_a.stop();
        self.feed_b.stop();
        self.engine.stop();
        info!("feed handler stopped");
    }

    /// Fan a quote out to both feeds.
    pub fn publish_quote(
        &self,
        symbol_id: u64,
        bid_price: i64,
        ask_price: i64,
        bid_size: u32,
        ask_size: u32,
    ) {
        self.feed_a
            .publish_quote(symbol_id, bid_price, ask_price, bid_size, ask_size);
        self.feed_b
            .publish_quote(symbol_id, bid_price, ask_price, bid_size, ask_size);
    }

    /// Fan a trade print out to both feeds.
    pub fn publish_trade(&self, symbol_id: u64, price: i64, quantity: u32, is_buy: bool) {
        self.feed_a.publish_trade(symbol_id, price, quantity, is_buy);
        self.feed_b.publish_trade(symbol_id, price, quantity, is_buy);
    }

    /// Propagate volatility mode to both feeds.
    pub fn set_volatile_market(&self, is_volatile: bool) {
        self.feed_a.set_volatile_market(is_volatile);
        self.feed_b.set_volatile_market(is_volatile);
        if is_volatile {
            info!("market volatility on: normal jitter multiplied");
        } else {
            info!("market conditions normal");
        }
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    pub fn arbitrage_detector(&self) -> &Arc<ArbitrageDetector> {
        &self.detector
    }

    /// (feed A, feed B) delivery statistics.
    pub fn feed_stats(&self) -> (FeedStatsSnapshot, FeedStatsSnapshot) {
        (self.feed_a.stats(), self.feed_b.stats())
    }

    pub fn arbitrage_stats(&self) -> ArbitrageStats {
        self.detector.stats()
    }

    pub fn engine_stats(&self) -> EngineStatsSnapshot {
        self.engine.stats()
    }

    /// The newest `count` detected opportunities, oldest first.
    pub fn recent_arbitrage(&self, count: usize) -> Vec<ArbitrageOpportunity> {
        self.detector.recent_opportunities(count)
    }

    /// Emit both feeds' and the detector's counters through `tracing`.
    pub fn log_stats(&self) {
        let (stats_a, stats_b) = self.feed_stats();
        let arbitrage = self.arbitrage_stats();

        info!(
            messages = stats_a.messages_received,
            dropped = stats_a.messages_dropped,
            avg_latency_us = stats_a.average_latency_us(),
            jitter_events = stats_a.jitter_events,
            "feed A statistics"
        );
        info!(
            messages = stats_b.messages_received,
            dropped = stats_b.messages_dropped,
            avg_latency_us = stats_b.average_latency_us(),
            jitter_events = stats_b.jitter_events,
            "feed B statistics"
        );
        info!(
            detected = arbitrage.opportunities_detected,
            profitable = arbitrage.profitable_opportunities,
            missed = arbitrage.missed_opportunities,
            avg_profit_bps = arbitrage.average_profit_bps(),
            avg_latency_diff_us = arbitrage.average_latency_diff_us(),
            max_latency_diff_us = arbitrage.max_latency_diff_ns as f64 / 1_000.0,
            "arbitrage statistics"
        );
    }
}

/// Turn a primary-feed quote into resting bid/ask limit orders. Sides with
/// a non-positive price or zero size are skipped; submission failures (the
/// engine raced into a stop) are dropped.
fn submit_synthetic_orders(engine: &MatchingEngine, quote: &Quote) {
    if quote.bid_price > 0 && quote.bid_size > 0 {
        let bid = Order::new(
            next_synthetic_order_id(),
            quote.symbol_id,
            quote.bid_price,
            quote.bid_size,
            Side::Buy,
            0,
        );
        let _ = engine.submit_order(bid);
    }

    if quote.ask_price > 0 && quote.ask_size > 0 {
        let ask = Order::new(
            next_synthetic_order_id(),
            quote.symbol_id,
            quote.ask_price,
            quote.ask_size,
            Side::Sell,
            0,
        );
        let _ = engine.submit_order(ask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_ids_start_high_and_increase() {
        let first = next_synthetic_order_id();
        let second = next_synthetic_order_id();
        assert!(first >= SYNTHETIC_ORDER_ID_START);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_default_feed_configs() {
        let engine = Arc::new(MatchingEngine::new());
        let handler = FeedHandler::new(engine);

        let config_a = handler.feed_a.config();
        let config_b = handler.feed_b.config();

        assert!(config_a.is_primary_feed);
        assert!(!config_b.is_primary_feed);
        assert_eq!(config_a.base_latency_ns, 5_000);
        assert_eq!(config_b.base_latency_ns, 10_000);
        assert!(config_b.jitter_spike_ns > config_a.jitter_spike_ns);
        assert!(config_b.spike_probability > config_a.spike_probability);
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let engine = Arc::new(MatchingEngine::new());
        let handler = FeedHandler::new(Arc::clone(&engine));

        handler.start().unwrap();
        assert!(engine.is_running());
        handler.stop();
        assert!(!engine.is_running());
    }
}
