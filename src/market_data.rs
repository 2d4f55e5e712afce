//! Market data records shared by the feed pipeline.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::order::now_ns;

/// Which of the two redundant feeds an update travelled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedId {
    A,
    B,
}

impl FeedId {
    #[inline]
    pub const fn other(self) -> Self {
        match self {
            FeedId::A => FeedId::B,
            FeedId::B => FeedId::A,
        }
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedId::A => write!(f, "A"),
            FeedId::B => write!(f, "B"),
        }
    }
}

/// Level-1 quote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quote {
    pub symbol_id: u64,
    pub bid_price: i64,
    pub ask_price: i64,
    pub bid_size: u32,
    pub ask_size: u32,
    pub feed_id: FeedId,
    pub timestamp_ns: u64,
    pub sequence_number: u64,
}

impl Quote {
    /// Stamp a quote with the monotonic clock; the feed assigns the
    /// sequence number at publication.
    pub fn new(
        symbol_id: u64,
        bid_price: i64,
        ask_price: i64,
        bid_size: u32,
        ask_size: u32,
        feed_id: FeedId,
    ) -> Self {
        Self {
            symbol_id,
            bid_price,
            ask_price,
            bid_size,
            ask_size,
            feed_id,
            timestamp_ns: now_ns(),
            sequence_number: 0,
        }
    }
}

/// A printed trade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TradeTick {
    pub symbol_id: u64,
    pub price: i64,
    pub quantity: u32,
    pub is_buy_side: bool,
    pub feed_id: FeedId,
    pub timestamp_ns: u64,
    pub sequence_number: u64,
}

impl TradeTick {
    pub fn new(symbol_id: u64, price: i64, quantity: u32, is_buy_side: bool, feed_id: FeedId) -> Self {
        Self {
            symbol_id,
            price,
            quantity,
            is_buy_side,
            feed_id,
            timestamp_ns: now_ns(),
            sequence_number: 0,
        }
    }
}

/// One message on a feed. IMBALANCE and STATUS updates would extend this
/// enum; nothing matches on them today.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketDataUpdate {
    Quote(Quote),
    Trade(TradeTick),
}

impl MarketDataUpdate {
    #[inline]
    pub fn symbol_id(&self) -> u64 {
        match self {
            MarketDataUpdate::Quote(q) => q.symbol_id,
            MarketDataUpdate::Trade(t) => t.symbol_id,
        }
    }

    #[inline]
    pub fn feed_id(&self) -> FeedId {
        match self {
            MarketDataUpdate::Quote(q) => q.feed_id,
            MarketDataUpdate::Trade(t) => t.feed_id,
        }
    }

    #[inline]
    pub fn sequence_number(&self) -> u64 {
        match self {
            MarketDataUpdate::Quote(q) => q.sequence_number,
            MarketDataUpdate::Trade(t) => t.sequence_number,
        }
    }
}

/// Live per-feed delivery counters, mutated by the feed worker and
/// snapshot-read by observers.
#[derive(Debug)]
pub struct FeedStats {
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    latency_sum_ns: AtomicU64,
    latency_min_ns: AtomicU64,
    latency_max_ns: AtomicU64,
    jitter_events: AtomicU64,
}

impl Default for FeedStats {
    fn default() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            latency_sum_ns: AtomicU64::new(0),
            latency_min_ns: AtomicU64::new(u64::MAX),
            latency_max_ns: AtomicU64::new(0),
            jitter_events: AtomicU64::new(0),
        }
    }
}

impl FeedStats {
    /// Fold one observed inter-arrival latency into the counters and return
    /// the updated received count.
    pub fn record_latency(&self, latency_ns: u64) -> u64 {
        self.latency_sum_ns.fetch_add(latency_ns, Ordering::Relaxed);
        self.latency_min_ns.fetch_min(latency_ns, Ordering::Relaxed);
        self.latency_max_ns.fetch_max(latency_ns, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_drop(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_jitter_event(&self) {
        self.jitter_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into a plain value. Fields are loaded
    /// independently; the snapshot is not a consistent cross-field cut.
    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            latency_sum_ns: self.latency_sum_ns.load(Ordering::Relaxed),
            latency_min_ns: self.latency_min_ns.load(Ordering::Relaxed),
            latency_max_ns: self.latency_max_ns.load(Ordering::Relaxed),
            jitter_events: self.jitter_events.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`FeedStats`].
///
/// `latency_min_ns` is `u64::MAX` until the first latency sample lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FeedStatsSnapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub latency_sum_ns: u64,
    pub latency_min_ns: u64,
    pub latency_max_ns: u64,
    pub jitter_events: u64,
}

impl FeedStatsSnapshot {
    /// Mean inter-arrival latency in microseconds (0 before any sample).
    pub fn average_latency_us(&self) -> f64 {
        if self.messages_received == 0 {
            return 0.0;
        }
        self.latency_sum_ns as f64 / self.messages_received as f64 / 1_000.0
    }

    /// Mean inter-arrival latency in nanoseconds (0 before any sample).
    pub fn average_latency_ns(&self) -> f64 {
        if self.messages_received == 0 {
            return 0.0;
        }
        self.latency_sum_ns as f64 / self.messages_received as f64
    }
}
