//! Arbitrage detector - cross-feed comparison of A/B market data.
//!
//! Keeps the latest quote per (symbol, feed). Once both feeds have been
//! seen for a symbol, every quote update is checked for a cross-feed
//! crossing (profitable) or a same-side price disparity (zero-profit,
//! a pure latency indicator). Trades only feed the missed-opportunity
//! counter; they never emit events.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::market_data::{FeedId, MarketDataUpdate, Quote, TradeTick};
use crate::order::now_ns;

/// Rolling window of retained opportunities.
const RECENT_OPPORTUNITY_WINDOW: usize = 1000;

/// Trade-report gap between feeds beyond which an opportunity is considered
/// missed (1 ms).
const MISSED_OPPORTUNITY_GAP_NS: u64 = 1_000_000;

/// A detected disagreement between the two feeds for one symbol.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ArbitrageOpportunity {
    pub symbol_id: u64,
    /// Feed whose quote carries the earlier timestamp
    pub fast_feed: FeedId,
    pub slow_feed: FeedId,
    /// max(|bid difference|, |ask difference|)
    pub price_difference: i64,
    /// Absolute gap between the two quote timestamps
    pub latency_difference_ns: u64,
    pub timestamp_ns: u64,
    pub feed_a_bid: i64,
    pub feed_a_ask: i64,
    pub feed_b_bid: i64,
    pub feed_b_ask: i64,
}

impl ArbitrageOpportunity {
    /// Profit of the crossing, in basis points of the buy leg; zero when the
    /// feeds merely disagree without crossing.
    pub fn profit_basis_points(&self) -> f64 {
        if self.feed_a_ask > 0 && self.feed_b_bid > 0 && self.feed_b_bid > self.feed_a_ask {
            // Buy on A, sell on B
            (self.feed_b_bid - self.feed_a_ask) as f64 / self.feed_a_ask as f64 * 10_000.0
        } else if self.feed_b_ask > 0 && self.feed_a_bid > 0 && self.feed_a_bid > self.feed_b_ask {
            // Buy on B, sell on A
            (self.feed_a_bid - self.feed_b_ask) as f64 / self.feed_b_ask as f64 * 10_000.0
        } else {
            0.0
        }
    }

    pub fn is_profitable(&self) -> bool {
        self.profit_basis_points() > 0.0
    }
}

/// Aggregate detection counters.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ArbitrageStats {
    pub opportunities_detected: u64,
    pub profitable_opportunities: u64,
    /// Trade reports more than 1 ms apart between feeds
    pub missed_opportunities: u64,
    pub total_profit_bps: f64,
    pub max_latency_diff_ns: u64,
    pub total_latency_diff_ns: u64,
}

impl ArbitrageStats {
    fn record(&mut self, opportunity: &ArbitrageOpportunity) {
        self.opportunities_detected += 1;
        if opportunity.is_profitable() {
            self.profitable_opportunities += 1;
            self.total_profit_bps += opportunity.profit_basis_points();
        }
        self.max_latency_diff_ns = self
            .max_latency_diff_ns
            .max(opportunity.latency_difference_ns);
        self.total_latency_diff_ns += opportunity.latency_difference_ns;
    }

    pub fn average_latency_diff_us(&self) -> f64 {
        if self.opportunities_detected == 0 {
            return 0.0;
        }
        self.total_latency_diff_ns as f64 / self.opportunities_detected as f64 / 1_000.0
    }

    pub fn average_profit_bps(&self) -> f64 {
        if self.profitable_opportunities == 0 {
            return 0.0;
        }
        self.total_profit_bps / self.profitable_opportunities as f64
    }
}

/// Invoked for every detected opportunity, outside the detector lock.
pub type OpportunityCallback = Arc<dyn Fn(&ArbitrageOpportunity) + Send + Sync>;

#[derive(Default)]
struct SymbolQuotes {
    feed_a: Option<Quote>,
    feed_b: Option<Quote>,
}

impl SymbolQuotes {
    fn set(&mut self, quote: Quote) {
        match quote.feed_id {
            FeedId::A => self.feed_a = Some(quote),
            FeedId::B => self.feed_b = Some(quote),
        }
    }
}

#[derive(Default)]
struct TradeTimes {
    feed_a_ns: Option<u64>,
    feed_b_ns: Option<u64>,
}

#[derive(Default)]
struct DetectorState {
    quotes: FxHashMap<u64, SymbolQuotes>,
    trade_times: FxHashMap<u64, TradeTimes>,
    recent: VecDeque<ArbitrageOpportunity>,
    stats: ArbitrageStats,
}

/// Cross-feed arbitrage detector. Safe to call from both feed worker
/// threads; all state sits behind one mutex.
#[derive(Default)]
pub struct ArbitrageDetector {
    state: Mutex<DetectorState>,
    callback: Mutex<Option<OpportunityCallback>>,
}

impl ArbitrageDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the opportunity callback.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&ArbitrageOpportunity) + Send + Sync + 'static,
    {
        *self.callback.lock() = Some(Arc::new(callback));
    }

    /// Feed one delivered update into the detector.
    pub fn on_feed_update(&self, update: &MarketDataUpdate) {
        match update {
            MarketDataUpdate::Quote(quote) => self.on_quote(*quote),
            MarketDataUpdate::Trade(tick) => self.on_trade(tick),
        }
    }

    fn on_quote(&self, quote: Quote) {
        let opportunity = {
            let mut state = self.state.lock();
            let symbol_quotes = state.quotes.entry(quote.symbol_id).or_default();
            symbol_quotes.set(quote);

            let (Some(a), Some(b)) = (symbol_quotes.feed_a, symbol_quotes.feed_b) else {
                return;
            };
            let Some(opportunity) = check_arbitrage(quote.symbol_id, &a, &b) else {
                return;
            };

            state.stats.record(&opportunity);
            state.recent.push_back(opportunity);
            if state.recent.len() > RECENT_OPPORTUNITY_WINDOW {
                state.recent.pop_front();
            }
            opportunity
        };

        // Snapshot taken, lock released: the callback may block without
        // holding up the other feed's worker.
        if let Some(cb) = self.callback.lock().clone() {
            cb(&opportunity);
        }
    }

    fn on_trade(&self, tick: &TradeTick) {
        let mut state = self.state.lock();
        let times = state.trade_times.entry(tick.symbol_id).or_default();
        match tick.feed_id {
            FeedId::A => times.feed_a_ns = Some(tick.timestamp_ns),
            FeedId::B => times.feed_b_ns = Some(tick.timestamp_ns),
        }

        if let (Some(a), Some(b)) = (times.feed_a_ns, times.feed_b_ns) {
            if a.abs_diff(b) > MISSED_OPPORTUNITY_GAP_NS {
                state.stats.missed_opportunities += 1;
            }
        }
    }

    pub fn stats(&self) -> ArbitrageStats {
        self.state.lock().stats
    }

    /// The newest `count` opportunities, oldest first.
    pub fn recent_opportunities(&self, count: usize) -> Vec<ArbitrageOpportunity> {
        let state = self.state.lock();
        let skip = state.recent.len().saturating_sub(count);
        state.recent.iter().skip(skip).copied().collect()
    }
}

/// Compare the two latest quotes for a symbol; `None` when the feeds agree
/// on both sides and neither direction crosses.
fn check_arbitrage(symbol_id: u64, a: &Quote, b: &Quote) -> Option<ArbitrageOpportunity> {
    let crossed = (a.ask_price > 0 && b.bid_price > 0 && b.bid_price > a.ask_price)
        || (b.ask_price > 0 && a.bid_price > 0 && a.bid_price > b.ask_price);

    let bid_diff = (a.bid_price - b.bid_price).abs();
    let ask_diff = (a.ask_price - b.ask_price).abs();

    if !crossed && bid_diff == 0 && ask_diff == 0 {
        return None;
    }

    let (fast_feed, slow_feed) = if a.timestamp_ns < b.timestamp_ns {
        (FeedId::A, FeedId::B)
    } else {
        (FeedId::B, FeedId::A)
    };

    Some(ArbitrageOpportunity {
        symbol_id,
        fast_feed,
        slow_feed,
        price_difference: bid_diff.max(ask_diff),
        latency_difference_ns: a.timestamp_ns.abs_diff(b.timestamp_ns),
        timestamp_ns: now_ns(),
        feed_a_bid: a.bid_price,
        feed_a_ask: a.ask_price,
        feed_b_bid: b.bid_price,
        feed_b_ask: b.ask_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::MarketDataUpdate;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn quote(symbol: u64, feed: FeedId, bid: i64, ask: i64, ts: u64) -> MarketDataUpdate {
        let mut q = Quote::new(symbol, bid, ask, 100, 100, feed);
        q.timestamp_ns = ts;
        MarketDataUpdate::Quote(q)
    }

    fn trade(symbol: u64, feed: FeedId, ts: u64) -> MarketDataUpdate {
        let mut t = TradeTick::new(symbol, 100, 10, true, feed);
        t.timestamp_ns = ts;
        MarketDataUpdate::Trade(t)
    }

    #[test]
    fn test_single_feed_never_fires() {
        let detector = ArbitrageDetector::new();
        detector.on_feed_update(&quote(1, FeedId::A, 100, 101, 10));
        detector.on_feed_update(&quote(1, FeedId::A, 105, 106, 20));
        assert_eq!(detector.stats().opportunities_detected, 0);
    }

    #[test]
    fn test_agreeing_feeds_never_fire() {
        let detector = ArbitrageDetector::new();
        detector.on_feed_update(&quote(1, FeedId::A, 100, 101, 10));
        detector.on_feed_update(&quote(1, FeedId::B, 100, 101, 20));
        assert_eq!(detector.stats().opportunities_detected, 0);
    }

    #[test]
    fn test_crossing_is_profitable() {
        let detector = ArbitrageDetector::new();

        // B's bid 10020 crosses A's ask 10010: buy on A, sell on B
        detector.on_feed_update(&quote(1, FeedId::A, 10_000, 10_010, 10));
        detector.on_feed_update(&quote(1, FeedId::B, 10_020, 10_030, 25));

        let stats = detector.stats();
        assert_eq!(stats.opportunities_detected, 1);
        assert_eq!(stats.profitable_opportunities, 1);

        let recent = detector.recent_opportunities(1);
        let opportunity = recent[0];
        assert!(opportunity.is_profitable());
        // (10020 - 10010) / 10010 * 10000 ~ 9.99 bp
        assert!((opportunity.profit_basis_points() - 9.99).abs() < 0.01);
        assert_eq!(opportunity.fast_feed, FeedId::A);
        assert_eq!(opportunity.slow_feed, FeedId::B);
        assert_eq!(opportunity.latency_difference_ns, 15);
        assert_eq!(opportunity.price_difference, 20);
    }

    #[test]
    fn test_reverse_crossing() {
        let detector = ArbitrageDetector::new();

        // A's bid crosses B's ask: buy on B, sell on A
        detector.on_feed_update(&quote(1, FeedId::B, 10_000, 10_010, 10));
        detector.on_feed_update(&quote(1, FeedId::A, 10_020, 10_030, 5));

        let recent = detector.recent_opportunities(1);
        assert!(recent[0].is_profitable());
        assert_eq!(recent[0].fast_feed, FeedId::A);
        assert_eq!(recent[0].slow_feed, FeedId::B);
    }

    #[test]
    fn test_disparity_fires_with_zero_profit() {
        let detector = ArbitrageDetector::new();

        detector.on_feed_update(&quote(1, FeedId::A, 10_000, 10_010, 10));
        detector.on_feed_update(&quote(1, FeedId::B, 10_001, 10_010, 20));

        let stats = detector.stats();
        assert_eq!(stats.opportunities_detected, 1);
        assert_eq!(stats.profitable_opportunities, 0);

        let opportunity = detector.recent_opportunities(1)[0];
        assert!(!opportunity.is_profitable());
        assert_eq!(opportunity.profit_basis_points(), 0.0);
        assert_eq!(opportunity.price_difference, 1);
    }

    #[test]
    fn test_callback_receives_opportunity() {
        let detector = ArbitrageDetector::new();
        let fired = Arc::new(AtomicU64::new(0));
        let fired_in_cb = Arc::clone(&fired);
        detector.set_callback(move |opportunity| {
            assert_eq!(opportunity.symbol_id, 3);
            fired_in_cb.fetch_add(1, Ordering::Relaxed);
        });

        detector.on_feed_update(&quote(3, FeedId::A, 10_000, 10_010, 10));
        detector.on_feed_update(&quote(3, FeedId::B, 10_020, 10_030, 20));
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_symbols_tracked_independently() {
        let detector = ArbitrageDetector::new();

        detector.on_feed_update(&quote(1, FeedId::A, 10_000, 10_010, 10));
        // Different symbol on B: no pairing yet
        detector.on_feed_update(&quote(2, FeedId::B, 10_020, 10_030, 20));
        assert_eq!(detector.stats().opportunities_detected, 0);

        detector.on_feed_update(&quote(2, FeedId::A, 10_000, 10_010, 30));
        assert_eq!(detector.stats().opportunities_detected, 1);
    }

    #[test]
    fn test_trades_count_missed_opportunities() {
        let detector = ArbitrageDetector::new();

        // Within 1 ms: nothing
        detector.on_feed_update(&trade(1, FeedId::A, 1_000_000));
        detector.on_feed_update(&trade(1, FeedId::B, 1_500_000));
        assert_eq!(detector.stats().missed_opportunities, 0);

        // Beyond 1 ms: counted, but no opportunity emitted
        detector.on_feed_update(&trade(1, FeedId::B, 3_000_000));
        let stats = detector.stats();
        assert_eq!(stats.missed_opportunities, 1);
        assert_eq!(stats.opportunities_detected, 0);
    }

    #[test]
    fn test_recent_window_is_bounded() {
        let detector = ArbitrageDetector::new();

        detector.on_feed_update(&quote(1, FeedId::A, 10_000, 10_010, 1));
        for i in 0..(RECENT_OPPORTUNITY_WINDOW as i64 + 50) {
            detector.on_feed_update(&quote(1, FeedId::B, 10_011 + i, 10_020 + i, 2));
        }

        let all = detector.recent_opportunities(usize::MAX);
        assert_eq!(all.len(), RECENT_OPPORTUNITY_WINDOW);

        // Newest entries survive
        let last = all.last().unwrap();
        assert_eq!(
            last.feed_b_bid,
            10_011 + RECENT_OPPORTUNITY_WINDOW as i64 + 49
        );

        let tail = detector.recent_opportunities(10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail.last().unwrap().feed_b_bid, last.feed_b_bid);
    }

    #[test]
    fn test_stats_averages() {
        let mut stats = ArbitrageStats::default();
        let opportunity = ArbitrageOpportunity {
            symbol_id: 1,
            fast_feed: FeedId::A,
            slow_feed: FeedId::B,
            price_difference: 20,
            latency_difference_ns: 4_000,
            timestamp_ns: 0,
            feed_a_bid: 10_000,
            feed_a_ask: 10_010,
            feed_b_bid: 10_020,
            feed_b_ask: 10_030,
        };
        stats.record(&opportunity);
        stats.record(&opportunity);

        assert_eq!(stats.opportunities_detected, 2);
        assert_eq!(stats.profitable_opportunities, 2);
        assert_eq!(stats.max_latency_diff_ns, 4_000);
        assert!((stats.average_latency_diff_us() - 4.0).abs() < f64::EPSILON);
        assert!((stats.average_profit_bps() - opportunity.profit_basis_points()).abs() < 1e-9);
    }
}
