//! The four-signal protocol and the small set of pure helpers every operator in
//! this crate builds on.
//!
//! There is no prior analog for the protocol itself elsewhere in this codebase (a
//! channel is not a push/pull signal protocol); the trait shapes follow the Reactive
//! Streams interfaces, kept untyped over the item type the
//! same way the real `org.reactivestreams.Subscription` carries no type parameter.

use crate::error::FlowError;
use crate::fusion::FusionMode;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Demand sentinel: requesting this many (or more, saturating) means "unbounded."
///
/// Chosen as `i64::MAX` rather than `u64::MAX` so that operators which steal the high
/// bit of a `u64` demand counter for an out-of-band flag (see [`crate::take_last`])
/// never collide with a legitimate unbounded request.
pub const UNBOUNDED: u64 = i64::MAX as u64;

/// A per-subscription capability: grant demand, or withdraw interest.
///
/// Implementations must tolerate `request`/`cancel` from any thread, concurrently with
/// signal delivery and with each other.
pub trait Subscription: Send + Sync {
    fn request(&self, n: i64);
    fn cancel(&self);

    /// Optional fusion handshake. Default declines fusion; only
    /// operators that actually expose an internal queue override this.
    fn request_fusion(&self, _requested: u8) -> FusionMode {
        FusionMode::None
    }

    /// Pull the next fused value, if any. `None` signals end-of-stream in sync-fusion
    /// mode. Type-erased because this trait is not generic over the item type — the
    /// concrete type is known at the one call site that negotiated fusion.
    fn poll(&self) -> Option<Box<dyn Any + Send>> {
        None
    }

    fn is_empty(&self) -> bool {
        true
    }

    fn clear(&self) {}

    fn size(&self) -> usize {
        0
    }
}

/// A downstream consumer of signals.
///
/// `Sync` as well as `Send`: operators hold a subscriber behind a shared reference and
/// may legitimately be asked to deliver a signal from whichever thread a race resolves
/// on, even though the Reactive Streams contract itself serializes those calls.
pub trait Subscriber<T, E>: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, item: T);
    fn on_error(&self, err: FlowError<E>);
    fn on_complete(&self);
}

/// A source of signals; each `subscribe` call wires up a fresh per-subscription
/// adapter.
pub trait Publisher<T, E>: Send + Sync {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T, E>>);
}

/// A subscription that does nothing; handed to a subscriber alongside an immediate
/// terminal signal so `on_subscribe` always precedes it, as the [`error`] and
/// [`complete`] helpers below do.
pub struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: i64) {}
    fn cancel(&self) {}
}

/// Validates a `request(n)` call; reports an argument error downstream and returns
/// `false` when `n <= 0`.
pub fn validate<T, E>(n: i64, subscriber: &dyn Subscriber<T, E>) -> bool {
    if n <= 0 {
        subscriber.on_error(FlowError::invalid_request(n));
        false
    } else {
        true
    }
}

/// Delivers `on_subscribe(noop)` followed by `on_error(cause)`.
pub fn error<T, E>(subscriber: &dyn Subscriber<T, E>, cause: FlowError<E>) {
    subscriber.on_subscribe(Arc::new(NoopSubscription));
    subscriber.on_error(cause);
}

/// Delivers `on_subscribe(noop)` followed by `on_complete`.
pub fn complete<T, E>(subscriber: &dyn Subscriber<T, E>) {
    subscriber.on_subscribe(Arc::new(NoopSubscription));
    subscriber.on_complete();
}

/// Additive demand accumulation, saturating at [`UNBOUNDED`].
pub fn add_cap(current: u64, n: u64) -> u64 {
    current.saturating_add(n).min(UNBOUNDED)
}

/// Atomically adds `n` to `field`, saturating at [`UNBOUNDED`], and returns the
/// previous value. The CAS-retry-loop idiom used throughout this crate for demand
/// counters (mirrors the `stamp` CAS loops used for single-slot demand elsewhere in
/// this codebase).
pub fn request_add(field: &AtomicU64, n: u64) -> u64 {
    let mut current = field.load(Ordering::Relaxed);
    loop {
        if current == UNBOUNDED {
            return current;
        }
        let next = add_cap(current, n);
        match field.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(prev) => return prev,
            Err(observed) => current = observed,
        }
    }
}
