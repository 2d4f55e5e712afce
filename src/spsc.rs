//! SPSC queue - unbounded single-producer/single-consumer FIFO.
//!
//! Linked list with a dummy sentinel. The producer appends at the tail,
//! the consumer advances the head; the two never touch the same node
//! except through the `next` pointer handoff, and head/tail live on
//! separate cache lines so the threads do not false-share.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    // None only in the sentinel position
    value: Option<T>,
}

impl<T> Node<T> {
    fn new(value: Option<T>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            value,
        }))
    }
}

/// Unbounded SPSC FIFO.
///
/// `enqueue` is non-blocking and never fails; `dequeue` returns the oldest
/// unconsumed value or `None`. FIFO order and at-most-once delivery hold as
/// long as the caller upholds the contract: exactly one thread enqueues and
/// exactly one thread dequeues at any time. The queue itself is `Sync` so it
/// can sit behind an `Arc`; callers that fan in multiple producers must
/// serialize them (the engine and feeds do this with a mutex at the
/// publishing side).
pub struct SpscQueue<T> {
    /// Consumer end: the current sentinel
    head: CachePadded<AtomicPtr<Node<T>>>,
    /// Producer end: the most recently appended node
    tail: CachePadded<AtomicPtr<Node<T>>>,
}

// SAFETY: values cross threads exactly once (producer -> consumer), and the
// single-producer/single-consumer discipline means head and tail are each
// mutated by one thread only.
unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    pub fn new() -> Self {
        let sentinel = Node::new(None);
        Self {
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
        }
    }

    /// Append a value (producer only). Never blocks.
    ///
    /// The value is fully written before the node becomes reachable: the
    /// `Release` store on the predecessor's `next` pointer is what publishes
    /// it to the consumer.
    pub fn enqueue(&self, value: T) {
        let node = Node::new(Some(value));
        let prev = self.tail.load(Ordering::Relaxed);
        // SAFETY: `prev` was allocated by this queue and only the producer
        // advances `tail`, so it is still live here.
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
        self.tail.store(node, Ordering::Release);
    }

    /// Remove and return the oldest value (consumer only), or `None` if the
    /// queue is empty. Never blocks.
    pub fn dequeue(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        // SAFETY: `head` is the sentinel, owned by the consumer until it is
        // replaced below.
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }

        // SAFETY: the Acquire load above synchronizes with the producer's
        // Release store, so the node behind `next` is fully initialized.
        // Taking the value turns `next` into the new sentinel.
        let value = unsafe { (*next).value.take() };
        self.head.store(next, Ordering::Release);

        // SAFETY: the old sentinel is no longer reachable from either end.
        drop(unsafe { Box::from_raw(head) });

        value
    }

    /// Whether the queue currently has no values (consumer-accurate).
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: head is always a live node owned by this queue.
        unsafe { (*head).next.load(Ordering::Acquire).is_null() }
    }

    /// Approximate number of queued values. Walks the chain; intended for
    /// diagnostics, not hot paths.
    pub fn len_approx(&self) -> usize {
        let mut count = 0;
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            // SAFETY: every pointer in the chain is a live node until freed
            // by the consumer, and we start from the current sentinel.
            let next = unsafe { (*current).next.load(Ordering::Acquire) };
            if next.is_null() {
                return count;
            }
            count += 1;
            current = next;
        }
    }
}

impl<T> Default for SpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            // SAFETY: &mut self means no other thread holds the queue; every
            // node in the chain was allocated by `Node::new`.
            let node = unsafe { Box::from_raw(current) };
            current = node.next.load(Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_queue() {
        let queue: SpscQueue<u64> = SpscQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.len_approx(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let queue = SpscQueue::new();
        for i in 0..100 {
            queue.enqueue(i);
        }
        assert_eq!(queue.len_approx(), 100);
        for i in 0..100 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_interleaved_enqueue_dequeue() {
        let queue = SpscQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        assert_eq!(queue.dequeue(), Some(1));
        queue.enqueue(3);
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_values_dropped_with_queue() {
        let marker = Arc::new(());
        {
            let queue = SpscQueue::new();
            for _ in 0..10 {
                queue.enqueue(Arc::clone(&marker));
            }
            queue.dequeue();
            assert_eq!(Arc::strong_count(&marker), 10);
        }
        // Remaining nodes freed their values on drop
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_threaded_producer_consumer() {
        const COUNT: u64 = 100_000;
        let queue = Arc::new(SpscQueue::new());

        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                producer_queue.enqueue(i);
            }
        });

        let consumer_queue = Arc::clone(&queue);
        let consumer = thread::spawn(move || {
            let mut received = Vec::with_capacity(COUNT as usize);
            while received.len() < COUNT as usize {
                if let Some(v) = consumer_queue.dequeue() {
                    received.push(v);
                } else {
                    thread::yield_now();
                }
            }
            received
        });

        producer.join().unwrap();
        let received = consumer.join().unwrap();

        // FIFO, no duplicates, no fabricated values
        for (i, v) in received.iter().enumerate() {
            assert_eq!(*v, i as u64);
        }
        assert!(queue.is_empty());
    }
}
