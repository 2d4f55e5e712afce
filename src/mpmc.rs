//! MPMC queue - bounded multi-producer/multi-consumer ring.
//!
//! Each cell carries a sequence stamp alongside its value. A producer may
//! write a cell when the stamp equals its ticket; it publishes by storing
//! ticket+1. A consumer may read when the stamp equals ticket+1; it recycles
//! the cell for the next lap by storing ticket+capacity. Tickets advance by
//! compare-and-swap, so contention resolves without locks.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_utils::CachePadded;

struct Cell<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC ring of power-of-two capacity.
///
/// `try_enqueue`/`try_dequeue` never block: a full ring hands the value back,
/// an empty ring returns `None`. The blocking variants retry with a
/// spin-then-yield backoff and give up after a caller-specified budget
/// rather than waiting forever.
///
/// FIFO holds per (producer, consumer) slot pairing; no stronger global
/// ordering is promised.
pub struct MpmcQueue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// SAFETY: a cell's value is written by exactly one producer (the CAS winner)
// and read by exactly one consumer, with the sequence stamp's Release/Acquire
// pair ordering the handoff.
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Create a ring with the given capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is not a power of two or is less than 2.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity.is_power_of_two(),
            "MpmcQueue capacity must be a power of two >= 2"
        );
        let buffer: Box<[Cell<T>]> = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Attempt to enqueue without blocking.
    ///
    /// Returns `Err(value)` if the ring is full, handing the value back to
    /// the caller. Never overwrites.
    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                // Cell is empty at this generation; race for the ticket
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS grants exclusive write
                        // access to this cell until the sequence store below.
                        unsafe {
                            (*cell.value.get()).write(value);
                        }
                        cell.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Cell still holds the previous lap's value: ring is full
                return Err(value);
            } else {
                // Another producer claimed this ticket; reload and retry
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to dequeue without blocking. Returns `None` if empty.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS grants exclusive read
                        // access; the Acquire load of the sequence saw the
                        // producer's Release, so the value is initialized.
                        let value = unsafe { (*cell.value.get()).assume_init_read() };
                        // Recycle the cell for the next lap
                        cell.sequence
                            .store(pos + self.buffer.len(), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Enqueue with a retry budget. Spins briefly, then yields between
    /// attempts; returns `Err(value)` once the budget is exhausted.
    pub fn enqueue(&self, value: T, max_retries: usize) -> Result<(), T> {
        let mut value = value;
        for attempt in 0..max_retries {
            match self.try_enqueue(value) {
                Ok(()) => return Ok(()),
                Err(v) => value = v,
            }
            backoff(attempt);
        }
        Err(value)
    }

    /// Dequeue with a retry budget. Returns `None` once the budget is
    /// exhausted.
    pub fn dequeue(&self, max_retries: usize) -> Option<T> {
        for attempt in 0..max_retries {
            if let Some(value) = self.try_dequeue() {
                return Some(value);
            }
            backoff(attempt);
        }
        None
    }

    /// Approximate occupancy; exact only when no operation is in flight.
    pub fn len_approx(&self) -> usize {
        let enq = self.enqueue_pos.load(Ordering::Acquire);
        let deq = self.dequeue_pos.load(Ordering::Acquire);
        enq.saturating_sub(deq).min(self.buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len_approx() == 0
    }
}

#[inline]
fn backoff(attempt: usize) {
    if attempt < 10 {
        std::hint::spin_loop();
    } else {
        thread::yield_now();
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        // Drain so initialized cells drop their values
        while self.try_dequeue().is_some() {}
    }
}
