//! # Amb coordinator fan-out
//!
//! **Real-world scenario**: racing several equivalent upstreams (mirrored read
//! replicas, redundant RPC calls) and taking whichever answers first.
//!
//! ```text
//! amb(vec![replica_a, replica_b, replica_c]).subscribe(sink);
//! ```
//!
//! **What matters**: every source here completes synchronously on its own
//! `subscribe` call, so the first candidate always wins and the race never
//! actually reaches the remaining sources — but the coordinator still builds
//! one candidate adapter (and its own deferred-subscription arbiter) per
//! source up front, before any of them are subscribed. This isolates that
//! fixed per-source setup cost from any real I/O latency.

use flusso::amb::AmbPublisher;
use flusso::error::FlowError;
use flusso::subscription::{Publisher, Subscriber, Subscription};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use test::Bencher;

struct CountingSink {
    completions: AtomicUsize,
}

impl Subscriber<i32, &'static str> for Arc<CountingSink> {
    fn on_subscribe(&self, _subscription: Arc<dyn Subscription>) {}
    fn on_next(&self, item: i32) {
        test::black_box(item);
    }
    fn on_error(&self, _err: FlowError<&'static str>) {}
    fn on_complete(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Emits its own index immediately and completes; every source is "equally fast"
/// so the benchmark measures coordinator overhead, not a real race.
struct Immediate(i32);
impl Publisher<i32, &'static str> for Immediate {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<i32, &'static str>>) {
        let subscriber: Arc<dyn Subscriber<i32, &'static str>> = Arc::from(subscriber);
        subscriber.on_subscribe(Arc::new(flusso::subscription::NoopSubscription));
        subscriber.on_next(self.0);
        subscriber.on_complete();
    }
}

fn race(n: usize) {
    let sources = (0..n)
        .map(|i| Box::new(Immediate(i as i32)) as Box<dyn Publisher<i32, &'static str>>)
        .collect();
    let publisher = AmbPublisher::new(sources);
    let sink = Arc::new(CountingSink {
        completions: AtomicUsize::new(0),
    });
    Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(sink.clone()));
    test::black_box(sink.completions.load(Ordering::Relaxed));
}

#[bench]
fn two_candidates(b: &mut Bencher) {
    b.iter(|| race(2));
}

#[bench]
fn sixteen_candidates(b: &mut Bencher) {
    b.iter(|| race(16));
}
