//! # Take-last post-complete drain
//!
//! **Real-world scenario**: replaying the tail of a finished log or event
//! stream to a slow consumer, e.g. "show me the last 50 lines" after the
//! producer has already finished writing.
//!
//! ```text
//! take_last(range(0, N), 50).subscribe(sink);
//! sink.request(50);   // ← arrives after upstream already completed
//! ```
//!
//! **What matters**: once upstream signals completion, every buffered item sits
//! in the ring until a request drains it (`TakeLastMany`'s packed demand
//! counter, `COMPLETE_FLAG` in `src/take_last.rs`). This isolates that
//! post-complete drain from the ring-fill cost upstream already paid.

use flusso::error::FlowError;
use flusso::range::RangePublisher;
use flusso::subscription::{Publisher, Subscriber, Subscription};
use flusso::take_last::TakeLastPublisher;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use test::Bencher;

const TAIL: usize = 50;
const UPSTREAM_LEN: i64 = 5_000;

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
fn drain_tail_after_upstream_completes(b: &mut Bencher) {
    b.iter(|| {
        let upstream = RangePublisher::new(0, UPSTREAM_LEN).unwrap();
        let publisher = TakeLastPublisher::new(upstream, TAIL);
        let sink = Sink::new();
        // RangePublisher only emits once demand is requested, so subscribing here
        // fills the ring and signals completion before the sink ever asks for
        // anything — exactly the post-complete ordering this benchmark targets.
        Publisher::<i64, ()>::subscribe(&publisher, Box::new(sink.clone()));
        let sub = sink.subscription.lock().unwrap().clone().unwrap();
        sub.request(i64::MAX);
        test::black_box(sink.seen.load(Ordering::Relaxed));
    });
}
