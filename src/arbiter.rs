//! Deferred-subscription arbiter.
//!
//! A subscriber that receives signals from some not-yet-chosen upstream, while a
//! downstream may already be requesting demand. Built on the same single-assignment
//! CAS-gate idiom used for other slots in this codebase, generalized from a one-shot
//! waker slot to a subscription slot with demand replay.

use crate::subscription::Subscription;
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

const EMPTY: u8 = 0;
const SET: u8 = 1;
const CANCELLED: u8 = 2;

/// Holds at most one upstream [`Subscription`], buffering demand requested before it
/// arrives and replaying the accumulated total the moment it does.
pub struct DeferredSubscriptionArbiter {
    state: AtomicU8,
    subscription: UnsafeCell<Option<Arc<dyn Subscription>>>,
    requested: AtomicU64,
}

// SAFETY: `subscription` is written exactly once, by whichever thread wins the
// EMPTY -> SET CAS in `set`. Every other access (`request`, `cancel`) only reads it,
// and only after observing `state == SET` via an Acquire load that synchronizes with
// the Release half of that CAS. No two threads ever write, and no read can race the
// single write.
unsafe impl Sync for DeferredSubscriptionArbiter {}

impl Default for DeferredSubscriptionArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredSubscriptionArbiter {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            subscription: UnsafeCell::new(None),
            requested: AtomicU64::new(0),
        }
    }

    /// Sets the upstream subscription. Returns `false` (and cancels `sub`) if a
    /// subscription was already set or if this arbiter was cancelled first.
    pub fn set(&self, sub: Arc<dyn Subscription>) -> bool {
        match self
            .state
            .compare_exchange(EMPTY, SET, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // SAFETY: see the impl-level safety comment; we are the sole writer.
                unsafe { *self.subscription.get() = Some(sub.clone()) };
                let r = self.requested.swap(0, Ordering::AcqRel);
                if r > 0 {
                    sub.request(r as i64);
                }
                true
            }
            Err(_) => {
                sub.cancel();
                false
            }
        }
    }

    /// Requests `n` more items, buffering until an upstream is set.
    pub fn request(&self, n: i64) {
        if n <= 0 {
            return;
        }
        if self.state.load(Ordering::Acquire) == SET {
            self.forward_request(n as u64);
            return;
        }
        crate::subscription::request_add(&self.requested, n as u64);
        // Re-check: `set` may have raced us and already drained `requested` before
        // our add landed, or may not have run yet. Either way, forwarding whatever
        // is left in `requested` once we observe SET is correct and loses nothing.
        if self.state.load(Ordering::Acquire) == SET {
            let r = self.requested.swap(0, Ordering::AcqRel);
            if r > 0 {
                self.forward_request(r);
            }
        }
    }

    fn forward_request(&self, n: u64) {
        // SAFETY: state == SET was observed, so `subscription` holds its one write.
        if let Some(sub) = unsafe { (*self.subscription.get()).as_ref() } {
            sub.request(n as i64);
        }
    }

    /// Cancels the current upstream, or marks this arbiter cancelled so that a
    /// subsequent `set` immediately cancels the subscription handed to it.
    pub fn cancel(&self) {
        let prev = self.state.swap(CANCELLED, Ordering::AcqRel);
        if prev == SET {
            // SAFETY: see the impl-level safety comment.
            if let Some(sub) = unsafe { (*self.subscription.get()).as_ref() } {
                sub.cancel();
            }
        }
    }
}
