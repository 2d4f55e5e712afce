//! Feed simulator - asynchronous market-data delivery with injected
//! latency, jitter, and packet loss.
//!
//! Publication is non-blocking: updates are sequence-stamped and queued.
//! A dedicated worker dequeues each update, sleeps for the simulated
//! network latency, rolls for packet loss, and only then invokes the
//! delivery callback. Two simulators with different parameters are what
//! make the A/B timing discrepancies the arbitrage detector feeds on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::market_data::{FeedId, FeedStats, FeedStatsSnapshot, MarketDataUpdate, Quote, TradeTick};
use crate::spsc::SpscQueue;

/// Fixed extra latency a backup (non-primary) feed pays per message.
pub const BACKUP_FEED_EXTRA_LATENCY_NS: u64 = 500_000;

/// Deliveries before jitter detection arms.
const JITTER_WARMUP_MESSAGES: u64 = 100;

/// Inter-arrival latency beyond this multiple of the running average counts
/// as a jitter event.
const JITTER_THRESHOLD_MULTIPLIER: f64 = 10.0;

/// Latency model for one simulated feed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Constant latency floor
    pub base_latency_ns: u64,
    /// Uniform jitter in [0, jitter_normal_ns)
    pub jitter_normal_ns: u64,
    /// Latency added on a spike instead of normal jitter
    pub jitter_spike_ns: u64,
    /// Bernoulli probability of a spike per message
    pub spike_probability: f64,
    /// Bernoulli probability of dropping a message
    pub drop_probability: f64,
    /// Backup feeds pay [`BACKUP_FEED_EXTRA_LATENCY_NS`] on top
    pub is_primary_feed: bool,
    /// First sequence number assigned
    pub sequence_start: u64,
    /// Initial volatility state; toggled at runtime through
    /// [`FeedSimulator::set_volatile_market`]
    pub volatile_market: bool,
    /// Normal jitter multiplier while the market is volatile (spikes are
    /// suppressed in that mode)
    pub volatile_jitter_multiplier: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_latency_ns: 5_000,
            jitter_normal_ns: 1_000,
            jitter_spike_ns: 500_000,
            spike_probability: 0.001,
            drop_probability: 0.0001,
            is_primary_feed: true,
            sequence_start: 1,
            volatile_market: false,
            volatile_jitter_multiplier: 100,
        }
    }
}

impl FeedConfig {
    /// Force the probabilities into [0, 1].
    fn clamped(mut self, feed_id: FeedId) -> Self {
        if !(0.0..=1.0).contains(&self.spike_probability) {
            warn!(feed = %feed_id, value = self.spike_probability, "clamping spike_probability");
            self.spike_probability = self.spike_probability.clamp(0.0, 1.0);
        }
        if !(0.0..=1.0).contains(&self.drop_probability) {
            warn!(feed = %feed_id, value = self.drop_probability, "clamping drop_probability");
            self.drop_probability = self.drop_probability.clamp(0.0, 1.0);
        }
        self
    }
}

/// Invoked by the feed worker after each delivered update, with the stats
/// as of that delivery.
pub type FeedCallback = Arc<dyn Fn(&MarketDataUpdate, &FeedStatsSnapshot) + Send + Sync>;

struct FeedInner {
    feed_id: FeedId,
    config: FeedConfig,
    volatile_market: AtomicBool,
    running: AtomicBool,
    sequence: AtomicU64,
    queue: SpscQueue<MarketDataUpdate>,
    /// Serializes publishers so the queue keeps its single-producer contract
    publish_lock: Mutex<()>,
    stats: FeedStats,
    callback: Mutex<Option<FeedCallback>>,
}

/// One simulated market-data feed.
pub struct FeedSimulator {
    inner: Arc<FeedInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FeedSimulator {
    pub fn new(feed_id: FeedId, config: FeedConfig) -> Self {
        let config = config.clamped(feed_id);
        Self {
            inner: Arc::new(FeedInner {
                feed_id,
                volatile_market: AtomicBool::new(config.volatile_market),
                running: AtomicBool::new(false),
                sequence: AtomicU64::new(config.sequence_start),
                queue: SpscQueue::new(),
                publish_lock: Mutex::new(()),
                stats: FeedStats::default(),
                callback: Mutex::new(None),
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    #[inline]
    pub fn feed_id(&self) -> FeedId {
        self.inner.feed_id
    }

    /// The (clamped) configuration this feed runs with.
    pub fn config(&self) -> FeedConfig {
        self.inner.config
    }

    /// Install the delivery callback. Takes effect when the worker
    /// (re)starts.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&MarketDataUpdate, &FeedStatsSnapshot) + Send + Sync + 'static,
    {
        *self.inner.callback.lock() = Some(Arc::new(callback));
    }

    /// Queue a quote for delivery. Non-blocking; assigns the next sequence
    /// number.
    pub fn publish_quote(
        &self,
        symbol_id: u64,
        bid_price: i64,
        ask_price: i64,
        bid_size: u32,
        ask_size: u32,
    ) {
        let mut quote = Quote::new(
            symbol_id,
            bid_price,
            ask_price,
            bid_size,
            ask_size,
            self.inner.feed_id,
        );
        quote.sequence_number = self.inner.sequence.fetch_add(1, Ordering::Relaxed);

        let _guard = self.inner.publish_lock.lock();
        self.inner.queue.enqueue(MarketDataUpdate::Quote(quote));
    }

    /// Queue a trade print for delivery. Non-blocking; assigns the next
    /// sequence number.
    pub fn publish_trade(&self, symbol_id: u64, price: i64, quantity: u32, is_buy: bool) {
        let mut tick = TradeTick::new(symbol_id, price, quantity, is_buy, self.inner.feed_id);
        tick.sequence_number = self.inner.sequence.fetch_add(1, Ordering::Relaxed);

        let _guard = self.inner.publish_lock.lock();
        self.inner.queue.enqueue(MarketDataUpdate::Trade(tick));
    }

    /// Toggle volatility: normal jitter is multiplied by
    /// `volatile_jitter_multiplier` and the spike branch is suppressed.
    pub fn set_volatile_market(&self, volatile_market: bool) {
        self.inner
            .volatile_market
            .store(volatile_market, Ordering::Relaxed);
    }

    pub fn stats(&self) -> FeedStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Spawn the delivery worker. A no-op if already running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let callback = self.inner.callback.lock().clone();
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("feed-{}", self.inner.feed_id))
            .spawn(move || worker_loop(&inner, callback.as_ref()))
            .expect("failed to spawn feed worker");
        *self.worker.lock() = Some(handle);
        info!(feed = %self.inner.feed_id, "feed simulator started");
    }

    /// Join the worker and discard any still-queued updates. A no-op if
    /// already stopped.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        while self.inner.queue.dequeue().is_some() {}
        info!(feed = %self.inner.feed_id, "feed simulator stopped");
    }
}

impl Drop for FeedSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(inner: &FeedInner, callback: Option<&FeedCallback>) {
    let mut rng = SmallRng::from_entropy();
    let mut last_delivery: Option<Instant> = None;

    while inner.running.load(Ordering::Acquire) {
        let Some(update) = inner.queue.dequeue() else {
            thread::sleep(Duration::from_micros(1));
            continue;
        };

        inject_latency(inner, &mut rng);

        // Packet loss: counted, silent, and the latency was still paid
        if rng.gen::<f64>() < inner.config.drop_probability {
            inner.stats.record_drop();
            continue;
        }

        let now = Instant::now();
        if let Some(last) = last_delivery {
            // The first delivery only seeds the inter-arrival clock; every
            // later one contributes a latency sample.
            let latency_ns = now.duration_since(last).as_nanos() as u64;
            let received = inner.stats.record_latency(latency_ns);
            if received > JITTER_WARMUP_MESSAGES {
                let average = inner.stats.snapshot().average_latency_ns();
                if latency_ns as f64 > average * JITTER_THRESHOLD_MULTIPLIER {
                    inner.stats.record_jitter_event();
                }
            }
        }
        last_delivery = Some(now);

        if let Some(cb) = callback {
            cb(&update, &inner.stats.snapshot());
        }
    }
}

fn inject_latency(inner: &FeedInner, rng: &mut SmallRng) {
    let config = &inner.config;
    let mut latency_ns = config.base_latency_ns;

    if inner.volatile_market.load(Ordering::Relaxed) {
        let jitter = config.jitter_normal_ns * config.volatile_jitter_multiplier;
        latency_ns += (rng.gen::<f64>() * jitter as f64) as u64;
    } else if rng.gen::<f64>() < config.spike_probability {
        latency_ns += config.jitter_spike_ns;
    } else {
        latency_ns += (rng.gen::<f64>() * config.jitter_normal_ns as f64) as u64;
    }

    if !config.is_primary_feed {
        latency_ns += BACKUP_FEED_EXTRA_LATENCY_NS;
    }

    thread::sleep(Duration::from_nanos(latency_ns));
}
