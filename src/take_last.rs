//! `take_last(n)`: capture the last `n` values and replay them under downstream
//! demand once upstream completes.
//!
//! The `n >= 2` ring is a `VecDeque` rather than a const-generic `RingBuffer<T, N>`:
//! here `n` is a runtime constructor argument, not a compile-time constant, so a
//! const-generic buffer doesn't fit. The post-complete
//! drain reuses the same WIP/demand-counter discipline as [`crate::range`]'s slow
//! path, packed into one `u64` (high bit = "upstream completed").

use crate::defer_scalar::DeferredScalarSubscription;
use crate::error::FlowError;
use crate::subscription::{self, Publisher, Subscriber, Subscription, UNBOUNDED};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const COMPLETE_FLAG: u64 = 1 << 63;

/// `take_last(n)` over some upstream publisher.
pub struct TakeLastPublisher<P> {
    upstream: P,
    n: usize,
}

impl<P> TakeLastPublisher<P> {
    pub fn new(upstream: P, n: usize) -> Self {
        Self { upstream, n }
    }
}

impl<P, T, E> Publisher<T, E> for TakeLastPublisher<P>
where
    P: Publisher<T, E>,
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T, E>>) {
        match self.n {
            0 => self.upstream.subscribe(Box::new(TakeLastZero {
                downstream: Arc::from(subscriber),
            })),
            1 => {
                let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);
                let scalar = Arc::new(DeferredScalarSubscription::new(downstream.clone()));
                downstream.on_subscribe(scalar.clone() as Arc<dyn Subscription>);
                self.upstream.subscribe(Box::new(TakeLastOne {
                    downstream,
                    scalar,
                    last: Mutex::new(None),
                }));
            }
            n => {
                let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);
                let inner = Arc::new(TakeLastMany::new(n, downstream.clone()));
                downstream.on_subscribe(inner.clone() as Arc<dyn Subscription>);
                self.upstream.subscribe(Box::new(UpstreamAdapter { inner }));
            }
        }
    }
}

/// `n == 0`: discard every value, forward only the terminal signal.
struct TakeLastZero<T, E> {
    downstream: Arc<dyn Subscriber<T, E>>,
}

impl<T: Send + Sync + 'static, E: Send + Sync + 'static> Subscriber<T, E> for TakeLastZero<T, E> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.downstream.on_subscribe(subscription.clone());
        subscription.request(UNBOUNDED as i64);
    }
    fn on_next(&self, _item: T) {}
    fn on_error(&self, err: FlowError<E>) {
        self.downstream.on_error(err);
    }
    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}

/// `n == 1`: remember the latest value; emit it through the deferred-scalar helper
/// once upstream completes.
struct TakeLastOne<T, E> {
    downstream: Arc<dyn Subscriber<T, E>>,
    scalar: Arc<DeferredScalarSubscription<T, E>>,
    last: Mutex<Option<T>>,
}

impl<T: Clone + Send + Sync + 'static, E: Send + Sync + 'static> Subscriber<T, E>
    for TakeLastOne<T, E>
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(UNBOUNDED as i64);
    }
    fn on_next(&self, item: T) {
        *self.last.lock().unwrap() = Some(item);
    }
    fn on_error(&self, err: FlowError<E>) {
        // Bypasses the scalar's value-slot state machine entirely: an early upstream
        // error is forwarded verbatim, not gated on demand/value.
        self.downstream.on_error(err);
    }
    fn on_complete(&self) {
        if let Some(value) = self.last.lock().unwrap().take() {
            self.scalar.set(value);
        }
    }
}

/// `n >= 2`: a ring of the last `n` values, drained under downstream demand once
/// upstream completes.
struct TakeLastMany<T, E> {
    n: usize,
    buffer: Mutex<VecDeque<T>>,
    downstream: Arc<dyn Subscriber<T, E>>,
    /// Packed demand counter: bit 63 is the "upstream completed" flag, the low 63
    /// bits are outstanding downstream demand.
    requested: AtomicU64,
    wip: AtomicU64,
    cancelled: AtomicBool,
}

impl<T: Clone + Send + Sync + 'static, E: Send + Sync + 'static> TakeLastMany<T, E> {
    fn new(n: usize, downstream: Arc<dyn Subscriber<T, E>>) -> Self {
        Self {
            n,
            buffer: Mutex::new(VecDeque::with_capacity(n)),
            downstream,
            requested: AtomicU64::new(0),
            wip: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    fn push(&self, item: T) {
        let mut buf = self.buffer.lock().unwrap();
        if buf.len() == self.n {
            buf.pop_front();
        }
        buf.push_back(item);
    }

    /// `postComplete`: sets the completion flag into the demand counter, then drains.
    fn post_complete(&self) {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            match self.requested.compare_exchange_weak(
                current,
                current | COMPLETE_FLAG,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.drain();
    }

    /// `postCompleteRequest`: adds `n` to demand; if completion already happened,
    /// drains.
    fn post_complete_request(&self, n: u64) {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            let demand = current & !COMPLETE_FLAG;
            let completed = current & COMPLETE_FLAG;
            let next = (subscription::add_cap(demand, n)) | completed;
            match self.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if completed != 0 {
                        self.drain();
                    }
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Standard WIP-gated drain: only the first re-entrant caller runs the loop,
    /// later callers just bump `wip` and trust the current drainer to see it.
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1u64;
        loop {
            let packed = self.requested.load(Ordering::Acquire);
            if packed & COMPLETE_FLAG == 0 {
                // Not complete yet; nothing to drain. Relinquish.
                if self.wip.fetch_sub(missed, Ordering::AcqRel) == missed {
                    return;
                }
                missed = self.wip.load(Ordering::Acquire);
                continue;
            }
            let demand = packed & !COMPLETE_FLAG;
            let mut emitted = 0u64;
            loop {
                if self.cancelled.load(Ordering::Relaxed) {
                    return;
                }
                if emitted == demand {
                    break;
                }
                let next = self.buffer.lock().unwrap().pop_front();
                match next {
                    Some(value) => {
                        self.downstream.on_next(value);
                        emitted += 1;
                    }
                    None => {
                        self.downstream.on_complete();
                        return;
                    }
                }
            }
            if emitted > 0 {
                let mut current = self.requested.load(Ordering::Acquire);
                loop {
                    let bare_demand = current & !COMPLETE_FLAG;
                    let reduced = bare_demand.saturating_sub(emitted) | COMPLETE_FLAG;
                    match self.requested.compare_exchange_weak(
                        current,
                        reduced,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(observed) => current = observed,
                    }
                }
            }
            if self.wip.fetch_sub(missed, Ordering::AcqRel) == missed {
                return;
            }
            missed = self.wip.load(Ordering::Acquire);
        }
    }
}

impl<T: Clone + Send + Sync + 'static, E: Send + Sync + 'static> Subscription
    for TakeLastMany<T, E>
{
    fn request(&self, n: i64) {
        if !subscription::validate(n, &*self.downstream) {
            return;
        }
        self.post_complete_request(n as u64);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

struct UpstreamAdapter<T, E> {
    inner: Arc<TakeLastMany<T, E>>,
}

impl<T: Clone + Send + Sync + 'static, E: Send + Sync + 'static> Subscriber<T, E>
    for UpstreamAdapter<T, E>
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(UNBOUNDED as i64);
    }
    fn on_next(&self, item: T) {
        self.inner.push(item);
    }
    fn on_error(&self, err: FlowError<E>) {
        self.inner.buffer.lock().unwrap().clear();
        self.inner.downstream.on_error(err);
    }
    fn on_complete(&self) {
        self.inner.post_complete();
    }
}
