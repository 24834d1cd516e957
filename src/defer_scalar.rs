//! Deferred-scalar helper: at-most-one emission once both a value and demand exist.
//! Reused directly by [`crate::take_last`]'s `n == 1` variant.
//!
//! Built on the same `UnsafeCell<Option<T>>` write-once/read-once discipline used for
//! single-slot handoffs elsewhere in this codebase, generalized from a sequence stamp
//! to a four-state flag.

use crate::error::FlowError;
use crate::subscription::{Subscriber, Subscription};
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const NO_REQ_NO_VAL: u8 = 0;
const NO_REQ_HAS_VAL: u8 = 1;
const HAS_REQ_NO_VAL: u8 = 2;
const HAS_REQ_HAS_VAL: u8 = 3;

/// Emits at most one value to `downstream`, once both [`Self::set`] and
/// [`Subscription::request`] have each happened at least once.
pub struct DeferredScalarSubscription<T, E> {
    downstream: Arc<dyn Subscriber<T, E>>,
    state: AtomicU8,
    value: UnsafeCell<Option<T>>,
}

// SAFETY: `value` is written at most once, by whichever call to `set` wins the
// NO_REQ_NO_VAL -> NO_REQ_HAS_VAL or HAS_REQ_NO_VAL -> HAS_REQ_HAS_VAL transition, and
// read at most once, by whichever call (to `set` or `request`) lands the transition
// into HAS_REQ_HAS_VAL. The state machine guarantees these two events never overlap:
// only the thread that performs the HAS_REQ_HAS_VAL CAS touches `value`, and it does
// so after the writer's CAS already happened-before it (both go through the same
// AcqRel-ordered atomic).
unsafe impl<T: Send, E> Sync for DeferredScalarSubscription<T, E> {}

impl<T, E> DeferredScalarSubscription<T, E> {
    pub fn new(downstream: Arc<dyn Subscriber<T, E>>) -> Self {
        Self {
            downstream,
            state: AtomicU8::new(NO_REQ_NO_VAL),
            value: UnsafeCell::new(None),
        }
    }

    /// Stores `value`, emitting immediately if demand already arrived.
    ///
    /// Callers must invoke this at most once: a single upstream-to-operator handoff,
    /// never a repeated write.
    pub fn set(&self, value: T) {
        // SAFETY: `set` is called at most once, and nothing reads `value` until a
        // CAS below lands the state machine in HAS_REQ_HAS_VAL — which can only
        // happen after this write is already visible, since both go through the
        // same AcqRel-ordered `state` atomic.
        unsafe { *self.value.get() = Some(value) };
        loop {
            match self.state.load(Ordering::Acquire) {
                NO_REQ_NO_VAL => {
                    match self.state.compare_exchange(
                        NO_REQ_NO_VAL,
                        NO_REQ_HAS_VAL,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(_) => continue, // raced with `request`; retry the read
                    }
                }
                HAS_REQ_NO_VAL => {
                    if self
                        .state
                        .compare_exchange(
                            HAS_REQ_NO_VAL,
                            HAS_REQ_HAS_VAL,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.emit();
                    }
                    return;
                }
                _ => return, // already has a value, or cancelled: no-op
            }
        }
    }

    fn emit(&self) {
        // SAFETY: only reached once, immediately after the CAS into
        // HAS_REQ_HAS_VAL that this same call performed; no other thread writes or
        // reads `value` afterwards (later loads of `state` see a terminal value and
        // take the no-op branch).
        if let Some(value) = unsafe { (*self.value.get()).take() } {
            self.downstream.on_next(value);
            self.downstream.on_complete();
        }
    }
}

impl<T, E> Subscription for DeferredScalarSubscription<T, E>
where
    T: Send,
    E: Send + Sync,
{
    fn request(&self, n: i64) {
        if n <= 0 {
            return;
        }
        loop {
            match self.state.load(Ordering::Acquire) {
                NO_REQ_NO_VAL => {
                    if self
                        .state
                        .compare_exchange(
                            NO_REQ_NO_VAL,
                            HAS_REQ_NO_VAL,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                NO_REQ_HAS_VAL => {
                    if self
                        .state
                        .compare_exchange(
                            NO_REQ_HAS_VAL,
                            HAS_REQ_HAS_VAL,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.emit();
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn cancel(&self) {
        self.state.store(HAS_REQ_HAS_VAL, Ordering::Release);
    }
}
