//! `amb(sources)`: race N publishers, forward only the first to signal, cancel the
//! rest.
//!
//! The winner-take-all CAS has no precedent elsewhere in this crate (nothing else races
//! multiple sources); it reuses [`crate::arbiter::DeferredSubscriptionArbiter`] for each
//! candidate's own deferred demand and `crossbeam_utils::CachePadded` for the winner
//! index, the same tool used to pad hot single-writer cursors against false sharing
//! elsewhere in this codebase.

use crate::arbiter::DeferredSubscriptionArbiter;
use crate::error::{FlowError, UpstreamError, UserError};
use crate::subscription::{self, Publisher, Subscriber, Subscription};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

const UNDECIDED: i64 = i64::MIN;
const LOST: i64 = i64::MIN + 1;

type BoxedSource<T, E> = Box<dyn Publisher<T, E>>;
/// One slot of a drained source sequence: a pulled item may itself fail (`Err`), or be
/// present but empty (`Ok(None)`, the "null source" case).
type SourceItem<T, E> = Result<Option<BoxedSource<T, E>>, E>;

enum SourceSpec<T, E> {
    Fixed(Vec<BoxedSource<T, E>>),
    /// Invoked once per subscription; constructing the iterator itself may fail, hence
    /// the outer `Result`.
    Iterable(Box<dyn Fn() -> Result<Box<dyn Iterator<Item = SourceItem<T, E>>>, E> + Send + Sync>),
}

/// Races a fixed collection of source publishers, or a lazily-produced and possibly
/// fallible sequence of them; whichever signals first wins, the rest are cancelled.
pub struct AmbPublisher<T, E> {
    sources: SourceSpec<T, E>,
}

impl<T, E> AmbPublisher<T, E> {
    pub fn new(sources: Vec<BoxedSource<T, E>>) -> Self {
        Self {
            sources: SourceSpec::Fixed(sources),
        }
    }

    /// Builds an `amb` over a source sequence that is itself produced lazily and may
    /// fail: `make_iter` runs once per subscription, and the resulting iterator is
    /// drained eagerly into an owned buffer before any source is subscribed, so a
    /// failure anywhere in the sequence — its own construction or any one pulled item —
    /// is caught and reported in exactly one place rather than surfacing mid-race.
    pub fn from_iterable<F, I>(make_iter: F) -> Self
    where
        F: Fn() -> Result<I, E> + Send + Sync + 'static,
        I: Iterator<Item = SourceItem<T, E>> + 'static,
    {
        Self {
            sources: SourceSpec::Iterable(Box::new(move || {
                make_iter().map(|it| Box::new(it) as Box<dyn Iterator<Item = SourceItem<T, E>>>)
            })),
        }
    }
}

impl<T, E> Publisher<T, E> for AmbPublisher<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T, E>>) {
        match &self.sources {
            // A `Box<dyn Publisher>` can't itself be null, so the fixed-array form
            // has no null-source case to report: the type already rules it out.
            SourceSpec::Fixed(sources) => Self::subscribe_fixed(sources, subscriber),
            SourceSpec::Iterable(make_iter) => {
                let drained = make_iter().and_then(|iter| iter.collect::<Result<Vec<_>, E>>());
                match drained {
                    Ok(sources) => Self::subscribe_drained(sources, subscriber),
                    Err(cause) => {
                        let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);
                        subscription::error(
                            &*downstream,
                            FlowError::Upstream(UpstreamError::IterableFailed(UserError(cause))),
                        );
                    }
                }
            }
        }
    }
}

impl<T, E> AmbPublisher<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Races the fixed-array form: every slot is a real source, so the subscription
    /// loop below never hits a null-source index.
    fn subscribe_fixed(sources: &[BoxedSource<T, E>], subscriber: Box<dyn Subscriber<T, E>>) {
        match sources.len() {
            0 => {
                let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);
                subscription::complete(&*downstream);
            }
            // Single-source bypasses the coordinator entirely, so demand/cancellation
            // go straight to the lone source with none of the race bookkeeping
            // observable in between.
            1 => sources[0].subscribe(subscriber),
            n => {
                let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);
                let coordinator = AmbCoordinator::new(downstream.clone(), n);
                downstream.on_subscribe(coordinator.clone() as Arc<dyn Subscription>);
                for (i, source) in sources.iter().enumerate() {
                    if coordinator.cancelled.load(Ordering::Relaxed)
                        || coordinator.winner.load(Ordering::Acquire) != UNDECIDED
                    {
                        break;
                    }
                    source.subscribe(Box::new(coordinator.candidates[i].clone()));
                }
            }
        }
    }

    /// Races a source sequence already drained from a (lazy) iterable into an owned
    /// buffer, indistinguishable from the fixed-array form except that a slot may be
    /// `None` (the iterable yielded a "null" source at that index).
    fn subscribe_drained(sources: Vec<Option<BoxedSource<T, E>>>, subscriber: Box<dyn Subscriber<T, E>>) {
        match sources.len() {
            0 => {
                let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);
                subscription::complete(&*downstream);
            }
            1 => match sources.into_iter().next().unwrap() {
                Some(source) => source.subscribe(subscriber),
                None => {
                    let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);
                    subscription::error(
                        &*downstream,
                        FlowError::Upstream(UpstreamError::NullSource { index: 0 }),
                    );
                }
            },
            n => {
                let downstream: Arc<dyn Subscriber<T, E>> = Arc::from(subscriber);
                let coordinator = AmbCoordinator::new(downstream.clone(), n);
                downstream.on_subscribe(coordinator.clone() as Arc<dyn Subscription>);
                for (i, source) in sources.into_iter().enumerate() {
                    if coordinator.cancelled.load(Ordering::Relaxed)
                        || coordinator.winner.load(Ordering::Acquire) != UNDECIDED
                    {
                        break;
                    }
                    match source {
                        Some(source) => source.subscribe(Box::new(coordinator.candidates[i].clone())),
                        // A null slot races to become the decision exactly like a real
                        // candidate's first signal would; either way the loop stops
                        // here — either this index won and reported the error below,
                        // or some other candidate already won concurrently and its own
                        // signal already reached downstream.
                        None => {
                            if coordinator.try_decide(i) {
                                coordinator.cancel_others(i);
                                downstream.on_error(FlowError::Upstream(UpstreamError::NullSource {
                                    index: i,
                                }));
                            }
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Owns the N candidate adapters and the shared winner-selection atomic.
struct AmbCoordinator<T, E> {
    winner: CachePadded<AtomicI64>,
    candidates: Vec<Arc<AmbCandidate<T, E>>>,
    downstream: Arc<dyn Subscriber<T, E>>,
    cancelled: AtomicBool,
}

impl<T, E> AmbCoordinator<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn new(downstream: Arc<dyn Subscriber<T, E>>, n: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let candidates = (0..n)
                .map(|i| Arc::new(AmbCandidate::new(weak.clone(), i)))
                .collect();
            Self {
                winner: CachePadded::new(AtomicI64::new(UNDECIDED)),
                candidates,
                downstream,
                cancelled: AtomicBool::new(false),
            }
        })
    }

    /// The CAS at the heart of winner selection: only the first
    /// candidate to call this wins.
    fn try_decide(&self, index: usize) -> bool {
        self.winner
            .compare_exchange(UNDECIDED, index as i64, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn cancel_others(&self, winner_index: usize) {
        for (i, candidate) in self.candidates.iter().enumerate() {
            if i != winner_index {
                candidate.arbiter.cancel();
            }
        }
    }
}

impl<T, E> Subscription for AmbCoordinator<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn request(&self, n: i64) {
        if !subscription::validate(n, &*self.downstream) {
            return;
        }
        let winner = self.winner.load(Ordering::Acquire);
        if winner >= 0 {
            self.candidates[winner as usize].arbiter.request(n);
        } else {
            for candidate in &self.candidates {
                candidate.arbiter.request(n);
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        let winner = self.winner.load(Ordering::Acquire);
        if winner >= 0 {
            self.candidates[winner as usize].arbiter.cancel();
            return;
        }
        // Races with `try_decide`: if we win this CAS, no candidate will ever be
        // declared the winner (the `LOST` state); if we lose it, a
        // winner was just decided and its own cancellation responsibility applies.
        let _ = self
            .winner
            .compare_exchange(UNDECIDED, LOST, Ordering::AcqRel, Ordering::Acquire);
        for candidate in &self.candidates {
            candidate.arbiter.cancel();
        }
    }
}

/// One per source: races to become the winner on its first signal, then either
/// forwards everything (it won) or is cancelled and drops all further signals.
struct AmbCandidate<T, E> {
    coordinator: Weak<AmbCoordinator<T, E>>,
    index: usize,
    arbiter: DeferredSubscriptionArbiter,
    /// Set by the same thread that won the CAS; read before every later signal so
    /// post-win deliveries bypass the CAS entirely.
    won: AtomicBool,
}

impl<T, E> AmbCandidate<T, E> {
    fn new(coordinator: Weak<AmbCoordinator<T, E>>, index: usize) -> Self {
        Self {
            coordinator,
            index,
            arbiter: DeferredSubscriptionArbiter::new(),
            won: AtomicBool::new(false),
        }
    }

    fn forward(&self, deliver: impl FnOnce(&Arc<dyn Subscriber<T, E>>))
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        if self.won.load(Ordering::Acquire) {
            if let Some(coordinator) = self.coordinator.upgrade() {
                deliver(&coordinator.downstream);
            }
            return;
        }
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        if coordinator.try_decide(self.index) {
            self.won.store(true, Ordering::Release);
            coordinator.cancel_others(self.index);
            deliver(&coordinator.downstream);
        }
        // else: lost the race; the winner has already cancelled us, so this signal
        // is a late straggler and is silently dropped.
    }
}

impl<T, E> Subscriber<T, E> for Arc<AmbCandidate<T, E>>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.arbiter.set(subscription);
    }

    fn on_next(&self, item: T) {
        self.forward(|downstream| downstream.on_next(item));
    }

    fn on_error(&self, err: FlowError<E>) {
        self.forward(|downstream| downstream.on_error(err));
    }

    fn on_complete(&self) {
        self.forward(|downstream| downstream.on_complete());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        events: Mutex<Vec<String>>,
        subscription: Mutex<Option<Arc<dyn Subscription>>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                subscription: Mutex::new(None),
            })
        }
    }

    impl Subscriber<i32, &'static str> for Arc<Recorder> {
        fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
            *self.subscription.lock().unwrap() = Some(subscription);
        }
        fn on_next(&self, item: i32) {
            self.events.lock().unwrap().push(format!("next({item})"));
        }
        fn on_error(&self, err: FlowError<&'static str>) {
            self.events.lock().unwrap().push(format!("error({err})"));
        }
        fn on_complete(&self) {
            self.events.lock().unwrap().push("complete".into());
        }
    }

    struct JustValue(i32);
    impl Publisher<i32, &'static str> for JustValue {
        fn subscribe(&self, subscriber: Box<dyn Subscriber<i32, &'static str>>) {
            let subscriber: Arc<dyn Subscriber<i32, &'static str>> = Arc::from(subscriber);
            subscriber.on_subscribe(Arc::new(subscription::NoopSubscription));
            subscriber.on_next(self.0);
            subscriber.on_complete();
        }
    }

    struct FailFast(&'static str);
    impl Publisher<i32, &'static str> for FailFast {
        fn subscribe(&self, subscriber: Box<dyn Subscriber<i32, &'static str>>) {
            let subscriber: Arc<dyn Subscriber<i32, &'static str>> = Arc::from(subscriber);
            subscriber.on_subscribe(Arc::new(subscription::NoopSubscription));
            subscriber.on_error(FlowError::Upstream(crate::error::UpstreamError::Cause(
                crate::error::UserError(self.0),
            )));
        }
    }

    struct NeverSub(Arc<AtomicBool>);
    impl Subscription for NeverSub {
        fn request(&self, _n: i64) {}
        fn cancel(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }
    struct Never {
        cancelled: Arc<AtomicBool>,
    }
    impl Publisher<i32, &'static str> for Never {
        fn subscribe(&self, subscriber: Box<dyn Subscriber<i32, &'static str>>) {
            let subscriber: Arc<dyn Subscriber<i32, &'static str>> = Arc::from(subscriber);
            subscriber.on_subscribe(Arc::new(NeverSub(self.cancelled.clone())));
        }
    }

    struct FlagOnSubscribe(Arc<AtomicBool>);
    impl Publisher<i32, &'static str> for FlagOnSubscribe {
        fn subscribe(&self, subscriber: Box<dyn Subscriber<i32, &'static str>>) {
            self.0.store(true, Ordering::SeqCst);
            let subscriber: Arc<dyn Subscriber<i32, &'static str>> = Arc::from(subscriber);
            subscriber.on_subscribe(Arc::new(subscription::NoopSubscription));
        }
    }

    struct RecordingNeverSub(Arc<AtomicI64>);
    impl Subscription for RecordingNeverSub {
        fn request(&self, n: i64) {
            self.0.fetch_add(n, Ordering::SeqCst);
        }
        fn cancel(&self) {}
    }
    struct RecordingNever {
        requested: Arc<AtomicI64>,
    }
    impl Publisher<i32, &'static str> for RecordingNever {
        fn subscribe(&self, subscriber: Box<dyn Subscriber<i32, &'static str>>) {
            let subscriber: Arc<dyn Subscriber<i32, &'static str>> = Arc::from(subscriber);
            subscriber.on_subscribe(Arc::new(RecordingNeverSub(self.requested.clone())));
        }
    }

    #[test]
    fn zero_sources_completes_immediately() {
        let publisher = AmbPublisher::<i32, &'static str>::new(vec![]);
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        assert_eq!(*rec.events.lock().unwrap(), vec!["complete".to_string()]);
    }

    #[test]
    fn single_source_is_pass_through() {
        let publisher = AmbPublisher::new(vec![
            Box::new(JustValue(42)) as Box<dyn Publisher<i32, &'static str>>
        ]);
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        assert_eq!(*rec.events.lock().unwrap(), vec!["next(42)", "complete"]);
    }

    #[test]
    fn fastest_source_wins_and_others_are_cancelled() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let publisher = AmbPublisher::new(vec![
            Box::new(Never {
                cancelled: cancelled.clone(),
            }) as Box<dyn Publisher<i32, &'static str>>,
            Box::new(JustValue(42)) as Box<dyn Publisher<i32, &'static str>>,
        ]);
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        assert_eq!(*rec.events.lock().unwrap(), vec!["next(42)", "complete"]);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn failing_source_wins_and_cancels_the_rest() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let publisher = AmbPublisher::new(vec![
            Box::new(FailFast("boom")) as Box<dyn Publisher<i32, &'static str>>,
            Box::new(Never {
                cancelled: cancelled.clone(),
            }) as Box<dyn Publisher<i32, &'static str>>,
        ]);
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error"));
        drop(events);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn decided_winner_short_circuits_remaining_subscribes() {
        let touched = Arc::new(AtomicBool::new(false));
        let publisher = AmbPublisher::new(vec![
            Box::new(JustValue(1)) as Box<dyn Publisher<i32, &'static str>>,
            Box::new(FlagOnSubscribe(touched.clone())) as Box<dyn Publisher<i32, &'static str>>,
        ]);
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[test]
    fn request_before_winner_broadcasts_to_all_candidates() {
        let r1 = Arc::new(AtomicI64::new(0));
        let r2 = Arc::new(AtomicI64::new(0));
        let publisher = AmbPublisher::new(vec![
            Box::new(RecordingNever {
                requested: r1.clone(),
            }) as Box<dyn Publisher<i32, &'static str>>,
            Box::new(RecordingNever {
                requested: r2.clone(),
            }) as Box<dyn Publisher<i32, &'static str>>,
        ]);
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        let sub = rec.subscription.lock().unwrap().clone().unwrap();
        sub.request(7);
        assert_eq!(r1.load(Ordering::SeqCst), 7);
        assert_eq!(r2.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn iterable_form_races_like_the_fixed_form() {
        let publisher = AmbPublisher::<i32, &'static str>::from_iterable(|| {
            Ok(vec![
                Ok(Some(Box::new(JustValue(7)) as Box<dyn Publisher<i32, &'static str>>)),
                Ok(Some(
                    Box::new(RecordingNever {
                        requested: Arc::new(AtomicI64::new(0)),
                    }) as Box<dyn Publisher<i32, &'static str>>,
                )),
            ]
            .into_iter())
        });
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        assert_eq!(*rec.events.lock().unwrap(), vec!["next(7)", "complete"]);
    }

    #[test]
    fn iterable_construction_failure_is_reported_once() {
        let publisher = AmbPublisher::<i32, &'static str>::from_iterable(|| {
            Err::<std::vec::IntoIter<SourceItem<i32, &'static str>>, _>("cannot build iterator")
        });
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error"));
    }

    #[test]
    fn iterable_item_failure_is_reported_before_subscribing_anything() {
        let touched = Arc::new(AtomicBool::new(false));
        let touched_clone = touched.clone();
        let publisher = AmbPublisher::<i32, &'static str>::from_iterable(move || {
            let touched = touched_clone.clone();
            Ok(vec![
                Ok(Some(
                    Box::new(FlagOnSubscribe(touched)) as Box<dyn Publisher<i32, &'static str>>
                )),
                Err("iteration blew up"),
            ]
            .into_iter())
        });
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        assert!(!touched.load(Ordering::SeqCst));
        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error"));
    }

    #[test]
    fn single_null_source_reports_null_source_error() {
        let publisher = AmbPublisher::<i32, &'static str>::from_iterable(|| {
            Ok(vec![Ok(None)].into_iter())
        });
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error"));
    }

    #[test]
    fn null_source_among_many_cancels_the_rest_and_reports_error() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_clone = cancelled.clone();
        let publisher = AmbPublisher::<i32, &'static str>::from_iterable(move || {
            let cancelled = cancelled_clone.clone();
            Ok(vec![
                Ok(Some(Box::new(Never { cancelled }) as Box<dyn Publisher<i32, &'static str>>)),
                Ok(None),
            ]
            .into_iter())
        });
        let rec = Recorder::new();
        Publisher::<i32, &'static str>::subscribe(&publisher, Box::new(rec.clone()));
        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error"));
        drop(events);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_signals_decide_exactly_one_winner() {
        for _ in 0..200 {
            let coordinator_downstream = Recorder::new();
            let coordinator = AmbCoordinator::<i32, &'static str>::new(
                coordinator_downstream.clone() as Arc<dyn Subscriber<i32, &'static str>>,
                2,
            );
            let a = coordinator.candidates[0].clone();
            let b = coordinator.candidates[1].clone();
            crossbeam_utils::thread::scope(|scope| {
                scope.spawn(|_| a.on_next(1));
                scope.spawn(|_| b.on_next(2));
            })
            .unwrap();
            let events = coordinator_downstream.events.lock().unwrap();
            assert_eq!(events.len(), 1);
        }
    }
}
