//! `flusso`: lock-free reactive-streams operators — `amb`, `take_last`, `using`, and
//! `range` — composed over a small Publisher/Subscriber/Subscription protocol.
//!
//! Every operator is demand-driven, in the Reactive Streams sense: nothing is
//! emitted downstream ahead of granted demand, cancellation is idempotent, and
//! exactly one terminal signal (`on_error` or `on_complete`) ever reaches a live
//! subscription. The library owns no thread of its own — operators run on whichever
//! thread delivers upstream signals or calls `request`/`cancel` downstream.
//!
//! ## Modules
//!
//! - [`subscription`] — the four-signal protocol and its pure helpers (`validate`,
//!   `error`, `complete`, `add_cap`).
//! - [`fusion`] — the optional synchronous/asynchronous fast-path handshake that
//!   [`using`] bridges through to whatever upstream negotiates it.
//! - [`arbiter`] — [`arbiter::DeferredSubscriptionArbiter`], a not-yet-known upstream
//!   slot that buffers demand until one arrives.
//! - [`defer_scalar`] — [`defer_scalar::DeferredScalarSubscription`], at-most-one
//!   deferred emission; reused directly by `take_last(1)`.
//! - [`range`] — [`range::RangePublisher`], a demand-pull integer generator.
//! - [`take_last`] — [`take_last::TakeLastPublisher`], ring-buffered tail capture
//!   with post-complete draining.
//! - [`using`] — [`using::UsingPublisher`], scoped resource binding around a
//!   dynamically derived publisher.
//! - [`amb`] — [`amb::AmbPublisher`], first-response selection across N sources.
//! - [`error`] — [`error::FlowError`], the crate-wide error type, and
//!   [`error::drop_error`], the unsignaled-error sink.

pub mod amb;
pub mod arbiter;
pub mod defer_scalar;
pub mod error;
pub mod fusion;
pub mod range;
pub mod subscription;
pub mod take_last;
pub mod using;
