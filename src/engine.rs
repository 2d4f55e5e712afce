//! Matching engine - per-symbol book registry behind a serialized work
//! queue.
//!
//! Submitters enqueue tagged requests; a single worker thread dequeues,
//! dispatches to the addressed book, updates counters, and fires the trade
//! and order callbacks from its own thread. `stop()` drains every queued
//! request before joining, and a stopped engine can be started again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::order::{Order, Trade};
use crate::order_book::OrderBook;
use crate::spsc::SpscQueue;

/// Control-plane failures. Data-plane misses (unknown ids, invalid orders)
/// are not errors; see the book and worker semantics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("matching engine is not running")]
    NotRunning,
    #[error("matching engine is already running")]
    AlreadyRunning,
}

/// Invoked by the worker for every trade, synchronously.
pub type TradeCallback = Arc<dyn Fn(&Trade) + Send + Sync>;
/// Invoked by the worker for every new-order decision: `true` when the order
/// reached a book, `false` when it was rejected (unknown symbol).
pub type OrderCallback = Arc<dyn Fn(&Order, bool) + Send + Sync>;

#[derive(Clone, Default)]
struct CallbackSet {
    trade: Option<TradeCallback>,
    order: Option<OrderCallback>,
}

/// Live engine counters, updated by the worker thread.
#[derive(Default)]
pub struct EngineStats {
    total_orders: AtomicU64,
    total_trades: AtomicU64,
    total_volume: AtomicU64,
    rejected_orders: AtomicU64,
    cancelled_orders: AtomicU64,
    modified_orders: AtomicU64,
}

impl EngineStats {
    /// Copy the counters into a plain value.
    ///
    /// Each field is loaded independently; the snapshot is not a consistent
    /// cross-field cut while the worker is running.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            total_orders: self.total_orders.load(Ordering::Relaxed),
            total_trades: self.total_trades.load(Ordering::Relaxed),
            total_volume: self.total_volume.load(Ordering::Relaxed),
            rejected_orders: self.rejected_orders.load(Ordering::Relaxed),
            cancelled_orders: self.cancelled_orders.load(Ordering::Relaxed),
            modified_orders: self.modified_orders.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total_orders.store(0, Ordering::Relaxed);
        self.total_trades.store(0, Ordering::Relaxed);
        self.total_volume.store(0, Ordering::Relaxed);
        self.rejected_orders.store(0, Ordering::Relaxed);
        self.cancelled_orders.store(0, Ordering::Relaxed);
        self.modified_orders.store(0, Ordering::Relaxed);
    }
}

/// Plain-value copy of [`EngineStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub total_orders: u64,
    pub total_trades: u64,
    pub total_volume: u64,
    pub rejected_orders: u64,
    pub cancelled_orders: u64,
    pub modified_orders: u64,
}

/// A tagged order command, queued from submitters to the worker.
#[derive(Clone, Copy, Debug)]
pub enum EngineRequest {
    New(Order),
    Cancel {
        symbol_id: u64,
        order_id: u64,
    },
    Modify {
        symbol_id: u64,
        order_id: u64,
        new_price: i64,
        new_quantity: u32,
    },
}

struct EngineInner {
    books: Mutex<FxHashMap<u64, OrderBook>>,
    queue: SpscQueue<EngineRequest>,
    /// Serializes submitters so the work queue keeps its single-producer
    /// contract; per-submitter FIFO holds, cross-submitter order is whatever
    /// the lock decides.
    submit_lock: Mutex<()>,
    running: AtomicBool,
    stats: EngineStats,
    callbacks: Mutex<CallbackSet>,
}

/// The matching engine. One worker thread per engine; all book mutation
/// happens on that thread.
pub struct MatchingEngine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                books: Mutex::new(FxHashMap::default()),
                queue: SpscQueue::new(),
                submit_lock: Mutex::new(()),
                running: AtomicBool::new(false),
                stats: EngineStats::default(),
                callbacks: Mutex::new(CallbackSet::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Create a book for the symbol. Returns `false` if already registered.
    pub fn register_symbol(&self, symbol_id: u64) -> bool {
        let mut books = self.inner.books.lock();
        if books.contains_key(&symbol_id) {
            return false;
        }
        books.insert(symbol_id, OrderBook::new(symbol_id));
        true
    }

    /// Clear and drop the symbol's book. Returns `false` if unknown.
    pub fn unregister_symbol(&self, symbol_id: u64) -> bool {
        let mut books = self.inner.books.lock();
        match books.get_mut(&symbol_id) {
            Some(book) => {
                book.clear();
                books.remove(&symbol_id);
                true
            }
            None => false,
        }
    }

    /// Install the trade callback. Takes effect when the worker (re)starts.
    pub fn set_trade_callback<F>(&self, callback: F)
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().trade = Some(Arc::new(callback));
    }

    /// Install the order-decision callback. Takes effect when the worker
    /// (re)starts.
    pub fn set_order_callback<F>(&self, callback: F)
    where
        F: Fn(&Order, bool) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().order = Some(Arc::new(callback));
    }

    /// Queue a new order. Errors if the engine is stopped.
    pub fn submit_order(&self, order: Order) -> Result<(), EngineError> {
        self.enqueue(EngineRequest::New(order))
    }

    /// Queue a cancel. Errors if the engine is stopped.
    pub fn cancel_order(&self, symbol_id: u64, order_id: u64) -> Result<(), EngineError> {
        self.enqueue(EngineRequest::Cancel {
            symbol_id,
            order_id,
        })
    }

    /// Queue a modify. Errors if the engine is stopped.
    pub fn modify_order(
        &self,
        symbol_id: u64,
        order_id: u64,
        new_price: i64,
        new_quantity: u32,
    ) -> Result<(), EngineError> {
        self.enqueue(EngineRequest::Modify {
            symbol_id,
            order_id,
            new_price,
            new_quantity,
        })
    }

    fn enqueue(&self, request: EngineRequest) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        let _guard = self.inner.submit_lock.lock();
        self.inner.queue.enqueue(request);
        Ok(())
    }

    /// Run a read-only closure against a symbol's book, synchronized with
    /// the worker (the registry lock is held for the duration). Returns
    /// `None` for an unknown symbol.
    pub fn with_order_book<R>(&self, symbol_id: u64, f: impl FnOnce(&OrderBook) -> R) -> Option<R> {
        let books = self.inner.books.lock();
        books.get(&symbol_id).map(f)
    }

    /// Counter snapshot; see [`EngineStats::snapshot`] for its consistency
    /// contract.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    /// Empty every registered book, returning the market to a pristine
    /// state. Symbols stay registered.
    pub fn clear_all_books(&self) {
        let mut books = self.inner.books.lock();
        for book in books.values_mut() {
            book.clear();
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Spawn the worker. Errors if already running.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyRunning);
        }

        // Callbacks are captured here: installing them later only affects
        // the next start.
        let callbacks = self.inner.callbacks.lock().clone();
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("matching-engine".into())
            .spawn(move || worker_loop(&inner, &callbacks))
            .expect("failed to spawn engine worker");

        *self.worker.lock() = Some(handle);
        info!("matching engine started");
        Ok(())
    }

    /// Signal shutdown, drain every queued request, and join the worker.
    /// A no-op on a stopped engine.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        info!("matching engine stopped");
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(inner: &EngineInner, callbacks: &CallbackSet) {
    while inner.running.load(Ordering::Acquire) {
        match inner.queue.dequeue() {
            Some(request) => dispatch(inner, callbacks, request),
            None => thread::sleep(Duration::from_micros(10)),
        }
    }

    // Drain whatever was queued before the stop signal was observed
    while let Some(request) = inner.queue.dequeue() {
        dispatch(inner, callbacks, request);
    }
}

fn dispatch(inner: &EngineInner, callbacks: &CallbackSet, request: EngineRequest) {
    match request {
        EngineRequest::New(order) => {
            inner.stats.total_orders.fetch_add(1, Ordering::Relaxed);

            let mut books = inner.books.lock();
            let Some(book) = books.get_mut(&order.symbol_id) else {
                drop(books);
                inner.stats.rejected_orders.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = &callbacks.order {
                    cb(&order, false);
                }
                return;
            };

            let trades = book.add_order(order);
            drop(books);

            if let Some(cb) = &callbacks.order {
                cb(&order, true);
            }
            for trade in &trades {
                inner.stats.total_trades.fetch_add(1, Ordering::Relaxed);
                inner
                    .stats
                    .total_volume
                    .fetch_add(u64::from(trade.quantity), Ordering::Relaxed);
                if let Some(cb) = &callbacks.trade {
                    cb(trade);
                }
            }
        }

        EngineRequest::Cancel {
            symbol_id,
            order_id,
        } => {
            // Unknown symbol or order id: silent no-op, no counter
            let mut books = inner.books.lock();
            if let Some(book) = books.get_mut(&symbol_id) {
                if book.cancel_order(order_id) {
                    inner.stats.cancelled_orders.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        EngineRequest::Modify {
            symbol_id,
            order_id,
            new_price,
            new_quantity,
        } => {
            let mut books = inner.books.lock();
            if let Some(book) = books.get_mut(&symbol_id) {
                if book.modify_order(order_id, new_price, new_quantity).is_some() {
                    inner.stats.modified_orders.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Side;
    use std::sync::mpsc;
    use std::time::Instant;

    fn order(id: u64, symbol: u64, side: Side, price: i64, qty: u32) -> Order {
        Order::new(id, symbol, price, qty, side, 0)
    }

    /// Poll until the condition holds or the deadline passes.
    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for engine");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_register_unregister() {
        let engine = MatchingEngine::new();

        assert!(engine.register_symbol(1));
        assert!(!engine.register_symbol(1));
        assert!(engine.unregister_symbol(1));
        assert!(!engine.unregister_symbol(1));
    }

    #[test]
    fn test_submit_while_stopped_is_an_error() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);

        let result = engine.submit_order(order(1, 1, Side::Buy, 100, 10));
        assert_eq!(result, Err(EngineError::NotRunning));
        assert_eq!(engine.cancel_order(1, 1), Err(EngineError::NotRunning));
        assert_eq!(engine.modify_order(1, 1, 10, 1), Err(EngineError::NotRunning));
    }

    #[test]
    fn test_double_start_rejected() {
        let engine = MatchingEngine::new();
        engine.start().unwrap();
        assert_eq!(engine.start(), Err(EngineError::AlreadyRunning));
        engine.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);

        engine.start().unwrap();
        engine.stop();

        engine.start().unwrap();
        engine.submit_order(order(1, 1, Side::Buy, 100, 10)).unwrap();
        wait_until(|| engine.stats().total_orders == 1);
        engine.stop();
    }

    #[test]
    fn test_orders_match_through_worker() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);

        let (trade_tx, trade_rx) = mpsc::channel();
        engine.set_trade_callback(move |trade: &Trade| {
            trade_tx.send(*trade).unwrap();
        });

        engine.start().unwrap();
        engine.submit_order(order(1, 1, Side::Sell, 100, 10)).unwrap();
        engine.submit_order(order(2, 1, Side::Buy, 100, 10)).unwrap();

        let trade = trade_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(trade.price, 100);
        assert_eq!(trade.quantity, 10);
        assert_eq!(trade.buy_order_id, 2);
        assert_eq!(trade.sell_order_id, 1);

        wait_until(|| engine.stats().total_trades == 1);
        let stats = engine.stats();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.total_volume, 10);
        assert_eq!(stats.rejected_orders, 0);

        assert_eq!(
            engine.with_order_book(1, |book| book.total_orders()),
            Some(0)
        );
        engine.stop();
    }

    #[test]
    fn test_unknown_symbol_rejects_and_fires_callback() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);

        let (order_tx, order_rx) = mpsc::channel();
        engine.set_order_callback(move |order: &Order, accepted| {
            order_tx.send((order.order_id, accepted)).unwrap();
        });

        engine.start().unwrap();
        engine.submit_order(order(7, 999, Side::Buy, 100, 10)).unwrap();

        let (order_id, accepted) = order_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(order_id, 7);
        assert!(!accepted);

        wait_until(|| engine.stats().rejected_orders == 1);
        assert_eq!(engine.stats().total_orders, 1);
        engine.stop();
    }

    #[test]
    fn test_unknown_cancel_and_modify_are_silent() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);
        engine.start().unwrap();

        engine.cancel_order(1, 42).unwrap();
        engine.cancel_order(999, 42).unwrap();
        engine.modify_order(1, 42, 100, 10).unwrap();
        engine.stop();

        let stats = engine.stats();
        assert_eq!(stats.cancelled_orders, 0);
        assert_eq!(stats.modified_orders, 0);
        assert_eq!(stats.rejected_orders, 0);
    }

    #[test]
    fn test_cancel_and_modify_counters() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);
        engine.start().unwrap();

        engine.submit_order(order(1, 1, Side::Buy, 100, 10)).unwrap();
        engine.submit_order(order(2, 1, Side::Buy, 99, 10)).unwrap();
        engine.cancel_order(1, 1).unwrap();
        engine.modify_order(1, 2, 98, 5).unwrap();
        engine.stop();

        let stats = engine.stats();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.cancelled_orders, 1);
        assert_eq!(stats.modified_orders, 1);

        engine
            .with_order_book(1, |book| {
                assert_eq!(book.best_bid(), Some(98));
                assert_eq!(book.total_orders(), 1);
            })
            .unwrap();
    }

    #[test]
    fn test_stop_drains_pending_requests() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);
        engine.start().unwrap();

        for i in 0..1000 {
            engine
                .submit_order(order(i, 1, Side::Buy, 100 + (i as i64 % 50), 10))
                .unwrap();
        }
        // Stop must process everything already queued before joining
        engine.stop();

        assert_eq!(engine.stats().total_orders, 1000);
        assert_eq!(
            engine.with_order_book(1, |book| book.total_orders()),
            Some(1000)
        );
    }

    #[test]
    fn test_clear_all_books() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);
        engine.register_symbol(2);
        engine.start().unwrap();

        engine.submit_order(order(1, 1, Side::Buy, 100, 10)).unwrap();
        engine.submit_order(order(2, 2, Side::Sell, 200, 10)).unwrap();
        engine.stop();

        engine.clear_all_books();
        assert_eq!(engine.with_order_book(1, |b| b.total_orders()), Some(0));
        assert_eq!(engine.with_order_book(2, |b| b.total_orders()), Some(0));
        // Symbols remain registered
        assert!(!engine.register_symbol(1));
    }

    #[test]
    fn test_stats_reset() {
        let engine = MatchingEngine::new();
        engine.register_symbol(1);
        engine.start().unwrap();
        engine.submit_order(order(1, 1, Side::Buy, 100, 10)).unwrap();
        engine.stop();

        assert_eq!(engine.stats().total_orders, 1);
        engine.reset_stats();
        assert_eq!(engine.stats(), EngineStatsSnapshot::default());
    }
}
