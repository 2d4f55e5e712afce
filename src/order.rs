//! Order and Trade records - the core data model.
//!
//! Both records are exactly 64 bytes (one cache line) and cache-line
//! aligned, so a matching pass never straddles lines.

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

/// Nanoseconds since the first call in this process.
///
/// Monotonic: every timestamp in the crate (orders, trades, quotes) shares
/// this clock, so cross-component comparisons are meaningful.
pub fn now_ns() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Order side (buy = bid, sell = ask)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type. Only `Limit` is matched by the book; the others are carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OrderType {
    Market = 0,
    #[default]
    Limit = 1,
    Stop = 2,
    StopLimit = 3,
}

/// Order lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OrderStatus {
    #[default]
    New = 0,
    PartiallyFilled = 1,
    Filled = 2,
    Cancelled = 3,
    Rejected = 4,
}

/// Time in force. Carried on the order; not enforced by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimeInForce {
    #[default]
    Day = 0,
    Gtc = 1,
    Ioc = 2,
    Fok = 3,
    Gtd = 4,
}

/// A limit order - exactly 64 bytes (one cache line).
///
/// # Memory Layout
///
/// | Field             | Type  | Offset | Size |
/// |-------------------|-------|--------|------|
/// | order_id          | u64   | 0      | 8    |
/// | symbol_id         | u64   | 8      | 8    |
/// | price             | i64   | 16     | 8    |
/// | quantity          | u32   | 24     | 4    |
/// | executed_quantity | u32   | 28     | 4    |
/// | timestamp_ns      | u64   | 32     | 8    |
/// | client_id         | u64   | 40     | 8    |
/// | sequence_number   | u32   | 48     | 4    |
/// | side              | u8    | 52     | 1    |
/// | order_type        | u8    | 53     | 1    |
/// | status            | u8    | 54     | 1    |
/// | tif               | u8    | 55     | 1    |
/// | _reserved         | [u8]  | 56     | 8    |
/// | **Total**         |       |        | 64   |
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy)]
pub struct Order {
    /// Caller-assigned id, unique within a symbol
    pub order_id: u64,
    /// Instrument this order trades
    pub symbol_id: u64,
    /// Fixed-point price; one scale for the whole process
    pub price: i64,
    /// Original quantity
    pub quantity: u32,
    /// Quantity filled so far
    pub executed_quantity: u32,
    /// Monotonic nanoseconds, assigned at construction
    pub timestamp_ns: u64,
    /// Owning client
    pub client_id: u64,
    /// Session sequence number
    pub sequence_number: u32,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub tif: TimeInForce,
    _reserved: [u8; 8],
}

const _: () = assert!(
    std::mem::size_of::<Order>() == 64,
    "Order must be exactly 64 bytes (one cache line)"
);

const _: () = assert!(
    std::mem::align_of::<Order>() == 64,
    "Order must be 64-byte aligned"
);

impl Order {
    /// Create a new limit order, stamping the monotonic clock.
    pub fn new(
        order_id: u64,
        symbol_id: u64,
        price: i64,
        quantity: u32,
        side: Side,
        client_id: u64,
    ) -> Self {
        Self {
            order_id,
            symbol_id,
            price,
            quantity,
            executed_quantity: 0,
            timestamp_ns: now_ns(),
            client_id,
            sequence_number: 0,
            side,
            order_type: OrderType::Limit,
            status: OrderStatus::New,
            tif: TimeInForce::Day,
            _reserved: [0u8; 8],
        }
    }

    #[inline]
    pub const fn is_buy(&self) -> bool {
        matches!(self.side, Side::Buy)
    }

    #[inline]
    pub const fn is_sell(&self) -> bool {
        matches!(self.side, Side::Sell)
    }

    /// Quantity still open on this order
    #[inline]
    pub const fn remaining(&self) -> u32 {
        self.quantity - self.executed_quantity
    }

    #[inline]
    pub const fn is_filled(&self) -> bool {
        self.executed_quantity >= self.quantity
    }

    /// Whether this order could trade against `other`:
    /// same symbol, opposite sides, prices crossing.
    pub fn can_match(&self, other: &Order) -> bool {
        if self.symbol_id != other.symbol_id {
            return false;
        }
        if self.side == other.side {
            return false;
        }
        if self.is_buy() {
            self.price >= other.price
        } else {
            self.price <= other.price
        }
    }

    /// Apply a partial or full fill and advance the status.
    pub fn fill(&mut self, fill_quantity: u32) {
        debug_assert!(fill_quantity <= self.remaining());
        self.executed_quantity += fill_quantity;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }
}

impl fmt::Debug for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Order")
            .field("order_id", &self.order_id)
            .field("symbol_id", &self.symbol_id)
            .field("price", &self.price)
            .field("quantity", &self.quantity)
            .field("executed_quantity", &self.executed_quantity)
            .field("side", &self.side)
            .field("status", &self.status)
            .finish()
    }
}

/// An execution record, one per matched slice - exactly 64 bytes.
///
/// The buy/sell pair is recoverable as aggressor/passive through
/// [`Trade::aggressor_order_id`] and [`Trade::passive_order_id`].
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy)]
pub struct Trade {
    /// Monotonically increasing within a book, starting from 1
    pub trade_id: u64,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
    pub symbol_id: u64,
    /// Execution price - always the resting (passive) order's price
    pub price: i64,
    pub quantity: u32,
    /// Side of the incoming order that triggered the match
    pub aggressor_side: Side,
    _pad0: [u8; 3],
    pub timestamp_ns: u64,
    _reserved: [u8; 8],
}

const _: () = assert!(
    std::mem::size_of::<Trade>() == 64,
    "Trade must be exactly 64 bytes (one cache line)"
);

const _: () = assert!(
    std::mem::align_of::<Trade>() == 64,
    "Trade must be 64-byte aligned"
);

impl Trade {
    /// Build a trade from the matched pair. The aggressor's side decides
    /// which id lands in the buy slot and which in the sell slot.
    pub fn new(
        trade_id: u64,
        aggressor: &Order,
        passive: &Order,
        price: i64,
        quantity: u32,
    ) -> Self {
        let (buy_order_id, sell_order_id) = match aggressor.side {
            Side::Buy => (aggressor.order_id, passive.order_id),
            Side::Sell => (passive.order_id, aggressor.order_id),
        };
        Self {
            trade_id,
            buy_order_id,
            sell_order_id,
            symbol_id: aggressor.symbol_id,
            price,
            quantity,
            aggressor_side: aggressor.side,
            _pad0: [0u8; 3],
            timestamp_ns: now_ns(),
            _reserved: [0u8; 8],
        }
    }

    /// Id of the incoming order that crossed the book
    #[inline]
    pub const fn aggressor_order_id(&self) -> u64 {
        match self.aggressor_side {
            Side::Buy => self.buy_order_id,
            Side::Sell => self.sell_order_id,
        }
    }

    /// Id of the resting (maker) order
    #[inline]
    pub const fn passive_order_id(&self) -> u64 {
        match self.aggressor_side {
            Side::Buy => self.sell_order_id,
            Side::Sell => self.buy_order_id,
        }
    }
}

impl fmt::Debug for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trade")
            .field("trade_id", &self.trade_id)
            .field("symbol_id", &self.symbol_id)
            .field("price", &self.price)
            .field("quantity", &self.quantity)
            .field("buy_order_id", &self.buy_order_id)
            .field("sell_order_id", &self.sell_order_id)
            .field("aggressor_side", &self.aggressor_side)
            .finish()
    }
}
