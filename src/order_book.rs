//! Order book - per-symbol central limit order book.
//!
//! Two sorted price-level maps (buys iterated highest-first, sells
//! lowest-first) plus an order-id index for O(log n) cancel and modify.
//! Matching follows strict price-time priority and executes at the resting
//! order's price.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::order::{now_ns, Order, OrderStatus, Side, Trade};
use crate::price_level::PriceLevel;

/// Top-of-book view: best prices with the volume and order count behind them.
#[derive(Clone, Copy, Debug)]
pub struct BookSnapshot {
    pub symbol_id: u64,
    pub best_bid: Option<i64>,
    pub best_ask: Option<i64>,
    pub bid_volume: u64,
    pub ask_volume: u64,
    pub bid_orders: usize,
    pub ask_orders: usize,
    pub timestamp_ns: u64,
}

/// One aggregated price level in a depth view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelInfo {
    pub price: i64,
    pub total_volume: u64,
    pub order_count: usize,
}

/// Top-N levels per side. Bids sorted highest to lowest, asks lowest to
/// highest.
#[derive(Clone, Debug)]
pub struct BookDepth {
    pub symbol_id: u64,
    pub bids: Vec<LevelInfo>,
    pub asks: Vec<LevelInfo>,
    pub timestamp_ns: u64,
}

/// Central limit order book for a single symbol.
pub struct OrderBook {
    symbol_id: u64,
    /// Buy side: best bid is the highest key
    buy_levels: BTreeMap<i64, PriceLevel>,
    /// Sell side: best ask is the lowest key
    sell_levels: BTreeMap<i64, PriceLevel>,
    /// order_id -> (price, side) locator into the level maps
    order_index: FxHashMap<u64, (i64, Side)>,
    next_trade_id: u64,
}

impl OrderBook {
    pub fn new(symbol_id: u64) -> Self {
        Self {
            symbol_id,
            buy_levels: BTreeMap::new(),
            sell_levels: BTreeMap::new(),
            order_index: FxHashMap::default(),
            next_trade_id: 1,
        }
    }

    #[inline]
    pub fn symbol_id(&self) -> u64 {
        self.symbol_id
    }

    /// Add an order: match aggressively against the opposite side, then rest
    /// any remainder. Returns the trades generated, oldest resting first.
    ///
    /// Zero-quantity or non-positive-price orders are dropped silently, as
    /// are duplicates of a resting order id; both return no trades.
    pub fn add_order(&mut self, mut order: Order) -> Vec<Trade> {
        if order.quantity == 0 || order.price <= 0 {
            return Vec::new();
        }
        if self.order_index.contains_key(&order.order_id) {
            return Vec::new();
        }

        let mut trades = Vec::new();
        self.match_incoming(&mut order, &mut trades);

        if !order.is_filled() {
            self.rest_order(order);
        }

        trades
    }

    /// Cancel a resting order. Returns `false` if the id is unknown.
    pub fn cancel_order(&mut self, order_id: u64) -> bool {
        let Some((price, side)) = self.order_index.remove(&order_id) else {
            return false;
        };

        let levels = self.levels_mut(side);
        if let Some(level) = levels.get_mut(&price) {
            level.remove(order_id);
            if level.is_empty() {
                levels.remove(&price);
            }
        }
        true
    }

    /// Replace a resting order's price and quantity, keeping its id.
    ///
    /// Implemented as cancel-then-add: the replacement takes a fresh
    /// timestamp and goes to the tail of its (new) price level, so time
    /// priority is always lost. Trades triggered by a crossing replacement
    /// are applied to the book but not reported through this call.
    ///
    /// Returns the replacement order, or `None` if the id is unknown.
    pub fn modify_order(
        &mut self,
        order_id: u64,
        new_price: i64,
        new_quantity: u32,
    ) -> Option<Order> {
        let &(price, side) = self.order_index.get(&order_id)?;

        let levels = self.levels_mut(side);
        let level = levels.get_mut(&price)?;
        let old = level.remove(order_id)?;
        if level.is_empty() {
            levels.remove(&price);
        }
        self.order_index.remove(&order_id);

        let mut replacement = old;
        replacement.price = new_price;
        replacement.quantity = new_quantity;
        replacement.executed_quantity = 0;
        replacement.status = OrderStatus::New;
        replacement.timestamp_ns = now_ns();

        let _ = self.add_order(replacement);
        Some(replacement)
    }

    /// Highest resting buy price
    #[inline]
    pub fn best_bid(&self) -> Option<i64> {
        self.buy_levels.keys().next_back().copied()
    }

    /// Lowest resting sell price
    #[inline]
    pub fn best_ask(&self) -> Option<i64> {
        self.sell_levels.keys().next().copied()
    }

    /// best_ask - best_bid, when both sides are populated
    pub fn spread(&self) -> Option<i64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Total remaining volume at a price level (0 if the level is absent)
    pub fn volume_at_price(&self, price: i64, side: Side) -> u64 {
        self.levels(side)
            .get(&price)
            .map_or(0, PriceLevel::volume)
    }

    /// Number of orders at a price level (0 if the level is absent)
    pub fn order_count_at_price(&self, price: i64, side: Side) -> usize {
        self.levels(side)
            .get(&price)
            .map_or(0, PriceLevel::order_count)
    }

    /// Total number of resting orders on both sides
    #[inline]
    pub fn total_orders(&self) -> usize {
        self.order_index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order_index.is_empty()
    }

    /// Remove every order and level.
    pub fn clear(&mut self) {
        self.buy_levels.clear();
        self.sell_levels.clear();
        self.order_index.clear();
    }

    /// Top-of-book snapshot with per-side volume and order counts.
    pub fn snapshot(&self) -> BookSnapshot {
        let best_bid = self.best_bid();
        let best_ask = self.best_ask();
        BookSnapshot {
            symbol_id: self.symbol_id,
            best_bid,
            best_ask,
            bid_volume: best_bid.map_or(0, |p| self.volume_at_price(p, Side::Buy)),
            ask_volume: best_ask.map_or(0, |p| self.volume_at_price(p, Side::Sell)),
            bid_orders: best_bid.map_or(0, |p| self.order_count_at_price(p, Side::Buy)),
            ask_orders: best_ask.map_or(0, |p| self.order_count_at_price(p, Side::Sell)),
            timestamp_ns: now_ns(),
        }
    }

    /// Aggregated depth, up to `max_levels` per side.
    pub fn depth(&self, max_levels: usize) -> BookDepth {
        let info = |level: &PriceLevel| LevelInfo {
            price: level.price(),
            total_volume: level.volume(),
            order_count: level.order_count(),
        };
        BookDepth {
            symbol_id: self.symbol_id,
            bids: self
                .buy_levels
                .values()
                .rev()
                .take(max_levels)
                .map(info)
                .collect(),
            asks: self
                .sell_levels
                .values()
                .take(max_levels)
                .map(info)
                .collect(),
            timestamp_ns: now_ns(),
        }
    }

    // ------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------

    /// Cross the incoming order against the opposite side until its price no
    /// longer reaches the best opposing level or it is exhausted.
    fn match_incoming(&mut self, order: &mut Order, trades: &mut Vec<Trade>) {
        let maker_side = order.side.opposite();

        while !order.is_filled() {
            let Some(best) = self.best_price_on(maker_side) else {
                break;
            };
            if !prices_cross(order.price, best, order.side) {
                break;
            }
            self.match_at_level(order, best, maker_side, trades);
        }
    }

    /// Consume resting orders at one level, oldest first, at the level's
    /// price.
    fn match_at_level(
        &mut self,
        order: &mut Order,
        price: i64,
        maker_side: Side,
        trades: &mut Vec<Trade>,
    ) {
        while !order.is_filled() {
            let levels = match maker_side {
                Side::Buy => &mut self.buy_levels,
                Side::Sell => &mut self.sell_levels,
            };
            let Some(level) = levels.get_mut(&price) else {
                break;
            };
            let Some(resting) = level.front_mut() else {
                levels.remove(&price);
                break;
            };

            let fill = order.remaining().min(resting.remaining());
            trades.push(Trade::new(self.next_trade_id, order, resting, price, fill));
            self.next_trade_id += 1;

            order.fill(fill);
            resting.fill(fill);
            level.reduce_volume(fill);

            if level.front().is_some_and(Order::is_filled) {
                let done = level.pop_front().expect("front exists");
                let now_empty = level.is_empty();
                self.order_index.remove(&done.order_id);
                if now_empty {
                    levels.remove(&price);
                    break;
                }
            }
        }
    }

    /// Rest the (possibly partially filled) order on its own side.
    fn rest_order(&mut self, order: Order) {
        self.order_index
            .insert(order.order_id, (order.price, order.side));
        self.levels_mut(order.side)
            .entry(order.price)
            .or_insert_with(|| PriceLevel::new(order.price))
            .push_back(order);
    }

    #[inline]
    fn best_price_on(&self, side: Side) -> Option<i64> {
        match side {
            Side::Buy => self.best_bid(),
            Side::Sell => self.best_ask(),
        }
    }

    #[inline]
    fn levels(&self, side: Side) -> &BTreeMap<i64, PriceLevel> {
        match side {
            Side::Buy => &self.buy_levels,
            Side::Sell => &self.sell_levels,
        }
    }

    #[inline]
    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<i64, PriceLevel> {
        match side {
            Side::Buy => &mut self.buy_levels,
            Side::Sell => &mut self.sell_levels,
        }
    }
}

/// Whether an incoming order at `order_price` reaches the best opposing
/// price.
#[inline]
fn prices_cross(order_price: i64, opposite_best: i64, order_side: Side) -> bool {
    match order_side {
        Side::Buy => order_price >= opposite_best,
        Side::Sell => order_price <= opposite_best,
    }
}
