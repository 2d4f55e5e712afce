//! Queue primitive benchmarks - enqueue/dequeue throughput for the SPSC
//! and MPMC queues, and the engine's request-sized payload path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use crossfeed::{MpmcQueue, Order, OrderBook, Side, SpscQueue};

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");

    for batch in [64u64, 1024, 16_384] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(
            BenchmarkId::new("enqueue_dequeue", batch),
            &batch,
            |b, &batch| {
                let queue = SpscQueue::new();
                b.iter(|| {
                    for i in 0..batch {
                        queue.enqueue(black_box(i));
                    }
                    for _ in 0..batch {
                        black_box(queue.dequeue());
                    }
                });
            },
        );
    }

    group.bench_function("enqueue_dequeue_order_payload", |b| {
        let queue = SpscQueue::new();
        let order = Order::new(1, 1, 10_000, 100, Side::Buy, 0);
        b.iter(|| {
            queue.enqueue(black_box(order));
            black_box(queue.dequeue());
        });
    });

    group.finish();
}

fn bench_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc");

    for batch in [64u64, 1024] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(
            BenchmarkId::new("try_enqueue_try_dequeue", batch),
            &batch,
            |b, &batch| {
                let queue = MpmcQueue::with_capacity(32_768);
                b.iter(|| {
                    for i in 0..batch {
                        let _ = queue.try_enqueue(black_box(i));
                    }
                    for _ in 0..batch {
                        black_box(queue.try_dequeue());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_book(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_book");

    group.bench_function("add_resting_order", |b| {
        let mut book = OrderBook::new(1);
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            // Alternate sides on a wide spread so nothing matches
            let (side, price) = if id % 2 == 0 {
                (Side::Buy, 9_000 + (id % 64) as i64)
            } else {
                (Side::Sell, 20_000 + (id % 64) as i64)
            };
            black_box(book.add_order(Order::new(id, 1, price, 100, side, 0)));
        });
    });

    group.bench_function("add_and_match", |b| {
        let mut book = OrderBook::new(1);
        let mut id = 0u64;
        b.iter(|| {
            id += 2;
            book.add_order(Order::new(id - 1, 1, 10_000, 100, Side::Sell, 0));
            black_box(book.add_order(Order::new(id, 1, 10_000, 100, Side::Buy, 0)));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpmc, bench_book);
criterion_main!(benches);
