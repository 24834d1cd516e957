//! # Range fast path — unbounded demand
//!
//! **Real-world scenario**: a consumer that never backpressures (`request(MAX)`)
//! pulling an index range straight through, e.g. re-emitting row numbers while
//! scanning a table.
//!
//! ```text
//! range(0, N).subscribe(sink);
//! sink.request(i64::MAX);   // ← fast_path: no demand bookkeeping per item
//! ```
//!
//! **What matters**: with unbounded demand, `RangePublisher` skips the
//! `requested` atomic entirely (see `src/range.rs`'s `fast_path`), so this
//! benchmark isolates the cost of the per-item `on_next` dispatch and the
//! drain loop itself from the demand-accounting CAS paths exercised by
//! `bounded_demand_in_batches` below.

use flusso::error::FlowError;
use flusso::range::RangePublisher;
use flusso::subscription::{Publisher, Subscriber, Subscription};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use test::Bencher;

const COUNT: i64 = 10_000;

struct Sink {
    seen: AtomicI64,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
}

impl Sink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: AtomicI64::new(0),
            subscription: Mutex::new(None),
        })
    }
}

impl Subscriber<i64, ()> for Arc<Sink> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock().unwrap() = Some(subscription);
    }
    fn on_next(&self, item: i64) {
        test::black_box(item);
        self.seen.fetch_add(1, Ordering::Relaxed);
    }
    fn on_error(&self, _err: FlowError<()>) {}
    fn on_complete(&self) {}
}

#[bench]
fn unbounded_drain(b: &mut Bencher) {
    b.iter(|| {
        let publisher = RangePublisher::new(0, COUNT).unwrap();
        let sink = Sink::new();
        Publisher::<i64, ()>::subscribe(&publisher, Box::new(sink.clone()));
        let sub = sink.subscription.lock().unwrap().clone().unwrap();
        sub.request(i64::MAX);
        test::black_box(sink.seen.load(Ordering::Relaxed));
    });
}

#[bench]
fn bounded_demand_in_batches(b: &mut Bencher) {
    const BATCH: i64 = 64;
    b.iter(|| {
        let publisher = RangePublisher::new(0, COUNT).unwrap();
        let sink = Sink::new();
        Publisher::<i64, ()>::subscribe(&publisher, Box::new(sink.clone()));
        let sub = sink.subscription.lock().unwrap().clone().unwrap();
        let mut remaining = COUNT;
        while remaining > 0 {
            sub.request(BATCH);
            remaining -= BATCH;
        }
        test::black_box(sink.seen.load(Ordering::Relaxed));
    });
}
