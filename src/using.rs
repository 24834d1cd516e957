//! `using(supplier, factory, cleanup, eager)`: scope a resource's lifetime to one
//! downstream subscription.
//!
//! Generalizes the manual teardown discipline seen elsewhere in this codebase (a
//! `Drop` impl that runs exactly once regardless of which side releases the resource
//! last) from an unconditional drop to an eager/lazy-gated cleanup callback. The
//! adapter's self-referential subscription handle follows the same `Arc::new_cyclic`
//! pattern as [`crate::arbiter::DeferredSubscriptionArbiter`].

use crate::error::{FlowError, UpstreamError, UserError};
use crate::fusion::FusionMode;
use crate::subscription::{self, Publisher, Subscriber, Subscription};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// `using(supplier, factory, cleanup, eager)`.
///
/// `supplier` produces the scoped resource `S`; `factory` derives a publisher from it
/// (or signals failure/absence); `cleanup` releases `S` exactly once. `eager` selects
/// whether cleanup runs before or after the terminal signal reaches downstream.
///
/// `cleanup` is boxed (`Arc<dyn Fn>`) rather than left as a bare generic: the adapter
/// built in [`UsingPublisher::subscribe`] must own a `'static` handle to it for the
/// lifetime of the derived subscription, which outlives the `&self` borrow a plain
/// closure-typed field would only grant for the duration of that call.
pub struct UsingPublisher<S, E, FSup, FFac> {
    supplier: FSup,
    factory: FFac,
    cleanup: Arc<dyn Fn(S) -> Result<(), E> + Send + Sync>,
    eager: bool,
}

impl<S, E, FSup, FFac> UsingPublisher<S, E, FSup, FFac> {
    pub fn new(
        supplier: FSup,
        factory: FFac,
        cleanup: impl Fn(S) -> Result<(), E> + Send + Sync + 'static,
        eager: bool,
    ) -> Self {
        Self {
            supplier,
            factory,
            cleanup: Arc::new(cleanup),
            eager,
        }
    }

    /// The factory failed or produced nothing. Runs
    /// cleanup; if cleanup also fails, the factory's cause rides along as suppressed.
    fn fail_and_cleanup<T>(&self, resource: S, downstream: Arc<dyn Subscriber<T, E>>, factory_cause: UpstreamError<E>)
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let factory_err = FlowError::Upstream(factory_cause);
        match (self.cleanup.as_ref())(resource) {
            Ok(()) => subscription::error(&*downstream, factory_err),
            Err(cleanup_cause) => {
                let cleanup_err =
                    FlowError::Upstream(UpstreamError::CleanupFailed(UserError(cleanup_cause)));
                subscription::error(&*downstream, FlowError::suppressing(cleanup_err, factory_err));
            }
        }
    }
}

impl<S, E, FSup, FFac, P, T> Publisher<T, E> for UsingPublisher<S, E, FSup, FFac>
where
    S: Send + 'static,
    E: Send + Sync + 'static,
    FSup: Fn() -> Result<S, E> + Send + Sync,
    FFac: Fn(&S) -> Result<Option<P>, E> + Send + Sync,
    P: Publisher<T, E>,
    T: Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T, E>>) {
        let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);

        let resource = match (self.supplier)() {
            Ok(resource) => resource,
            Err(cause) => {
                subscription::error(
                    &*downstream,
                    FlowError::Upstream(UpstreamError::SupplierFailed(UserError(cause))),
                );
                return;
            }
        };

        let derived = match (self.factory)(&resource) {
            Ok(Some(publisher)) => publisher,
            Ok(None) => {
                self.fail_and_cleanup(resource, downstream, UpstreamError::FactoryProducedNone);
                return;
            }
            Err(cause) => {
                self.fail_and_cleanup(
                    resource,
                    downstream,
                    UpstreamError::FactoryFailed(UserError(cause)),
                );
                return;
            }
        };

        let adapter = UsingAdapter::new(resource, self.cleanup.clone(), downstream, self.eager);
        derived.subscribe(Box::new(adapter));
    }
}

/// Wraps the derived publisher's subscription so that cancellation, the terminal
/// signal, and the fusion handshake all route through exactly-once cleanup.
struct UsingAdapter<S, E, T> {
    resource: Mutex<Option<S>>,
    cleanup: Arc<dyn Fn(S) -> Result<(), E> + Send + Sync>,
    downstream: Arc<dyn Subscriber<T, E>>,
    eager: bool,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    /// CAS gate: whichever of {cancel, on_error, on_complete, sync-fusion poll} hits
    /// this first owns cleanup (a WIP / done flag).
    done: AtomicBool,
    self_handle: Weak<Self>,
}

impl<S, E, T> UsingAdapter<S, E, T>
where
    S: Send + 'static,
    E: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn new(
        resource: S,
        cleanup: Arc<dyn Fn(S) -> Result<(), E> + Send + Sync>,
        downstream: Arc<dyn Subscriber<T, E>>,
        eager: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            resource: Mutex::new(Some(resource)),
            cleanup,
            downstream,
            eager,
            upstream: Mutex::new(None),
            done: AtomicBool::new(false),
            self_handle: weak.clone(),
        })
    }

    /// Claims the done gate; `true` means this call owns cleanup/termination.
    fn claim(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn run_cleanup(&self) -> Result<(), FlowError<E>> {
        if let Some(resource) = self.resource.lock().unwrap().take() {
            (self.cleanup.as_ref())(resource)
                .map_err(|cause| FlowError::Upstream(UpstreamError::CleanupFailed(UserError(cause))))
        } else {
            Ok(())
        }
    }
}

impl<S, E, T> Subscriber<T, E> for Arc<UsingAdapter<S, E, T>>
where
    S: Send + 'static,
    E: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self.upstream.lock().unwrap() = Some(subscription);
        let handle = self
            .self_handle
            .upgrade()
            .expect("adapter outlives its own on_subscribe call");
        self.downstream.on_subscribe(handle as Arc<dyn Subscription>);
    }

    fn on_next(&self, item: T) {
        if !self.done.load(Ordering::Acquire) {
            self.downstream.on_next(item);
        }
    }

    fn on_error(&self, err: FlowError<E>) {
        if !self.claim() {
            crate::error::drop_error(&err);
            return;
        }
        if self.eager {
            match self.run_cleanup() {
                Ok(()) => self.downstream.on_error(err),
                Err(cleanup_err) => self.downstream.on_error(FlowError::suppressing(cleanup_err, err)),
            }
        } else {
            self.downstream.on_error(err);
            if let Err(cleanup_err) = self.run_cleanup() {
                crate::error::drop_error(&cleanup_err);
            }
        }
    }

    fn on_complete(&self) {
        if !self.claim() {
            return;
        }
        if self.eager {
            match self.run_cleanup() {
                Ok(()) => self.downstream.on_complete(),
                // Eager-completion cleanup failure overrides onComplete.
                Err(cleanup_err) => self.downstream.on_error(cleanup_err),
            }
        } else {
            self.downstream.on_complete();
            if let Err(cleanup_err) = self.run_cleanup() {
                crate::error::drop_error(&cleanup_err);
            }
        }
    }
}

impl<S, E, T> Subscription for UsingAdapter<S, E, T>
where
    S: Send + 'static,
    E: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn request(&self, n: i64) {
        if let Some(sub) = self.upstream.lock().unwrap().as_ref() {
            sub.request(n);
        }
    }

    fn cancel(&self) {
        if !self.claim() {
            return;
        }
        if let Some(sub) = self.upstream.lock().unwrap().take() {
            sub.cancel();
        }
        // Cleanup errors on the cancel path cannot be reported: downstream is gone.
        if let Err(cleanup_err) = self.run_cleanup() {
            crate::error::drop_error(&cleanup_err);
        }
    }

    fn request_fusion(&self, requested: u8) -> FusionMode {
        match self.upstream.lock().unwrap().as_ref() {
            Some(sub) => sub.request_fusion(requested),
            None => FusionMode::None,
        }
    }

    fn poll(&self) -> Option<Box<dyn Any + Send>> {
        let polled = self
            .upstream
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|sub| sub.poll());
        if polled.is_none() && self.claim() {
            // Sync-fusion end-of-stream is this adapter's analog of `on_complete`.
            if let Err(cleanup_err) = self.run_cleanup() {
                crate::error::drop_error(&cleanup_err);
            }
        }
        polled
    }

    fn is_empty(&self) -> bool {
        self.upstream
            .lock()
            .unwrap()
            .as_ref()
            .map(|sub| sub.is_empty())
            .unwrap_or(true)
    }

    fn clear(&self) {
        if let Some(sub) = self.upstream.lock().unwrap().as_ref() {
            sub.clear();
        }
    }

    fn size(&self) -> usize {
        self.upstream
            .lock()
            .unwrap()
            .as_ref()
            .map(|sub| sub.size())
            .unwrap_or(0)
    }
}
