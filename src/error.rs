//! Error types shared by every operator.
//!
//! A `thiserror` enum rather than a hand-written `Debug`/`Display` pair: the `using`
//! operator's suppressed-cause aggregation needs to combine two causes into one value,
//! which `#[error(transparent)]`/`#[source]` derive cleanly and a manual impl wouldn't.

use std::fmt;

/// A cause that failed to reach a downstream because none remained.
///
/// Handed to [`drop_error`] rather than discarded silently, so a crate consumer can
/// observe it through the `log` facade if they wire up a logger.
pub fn drop_error<E: fmt::Display>(err: &FlowError<E>) {
    log::warn!("unsignaled error dropped: {err}");
}

/// The crate-wide error type, generic over the user-supplied item/cause type `E`.
#[derive(thiserror::Error, Debug)]
pub enum FlowError<E> {
    /// `request(n)` was called with `n <= 0`.
    #[error("n > 0 required, got {n}")]
    InvalidRequest { n: i64 },

    /// A subscriber was subscribed twice to the same subscription slot.
    #[error("subscription already set")]
    ProtocolViolation,

    /// An error produced by upstream or by user-supplied factories/callbacks.
    #[error(transparent)]
    Upstream(#[from] UpstreamError<E>),

    /// A cleanup failure combined with another cause.
    ///
    /// Which cause is primary depends on the eager/lazy policy of the operator that
    /// raised it; the other is carried as `suppressed`.
    #[error("{primary}")]
    Suppressed {
        primary: Box<FlowError<E>>,
        suppressed: Box<FlowError<E>>,
    },
}

impl<E> FlowError<E> {
    /// Builds the "n > 0 required" error used by [`crate::subscription::validate`].
    pub fn invalid_request(n: i64) -> Self {
        FlowError::InvalidRequest { n }
    }

    /// Combines a primary cause with a secondary cause that must not be lost.
    pub fn suppressing(primary: FlowError<E>, suppressed: FlowError<E>) -> Self {
        FlowError::Suppressed {
            primary: Box::new(primary),
            suppressed: Box::new(suppressed),
        }
    }
}

/// A user-visible cause: either the upstream's own error value, or a resource-lifecycle
/// failure raised by an operator itself (e.g. `using`'s supplier/factory/cleanup).
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError<E> {
    #[error("upstream error")]
    Cause(#[source] UserError<E>),

    #[error("using: resource supplier failed")]
    SupplierFailed(#[source] UserError<E>),

    #[error("using: publisher factory failed")]
    FactoryFailed(#[source] UserError<E>),

    #[error("using: cleanup failed")]
    CleanupFailed(#[source] UserError<E>),

    #[error("using: factory returned no publisher")]
    FactoryProducedNone,

    #[error("amb: the source iterable failed")]
    IterableFailed(#[source] UserError<E>),

    #[error("amb: the {index}-th publisher source is null")]
    NullSource { index: usize },
}

/// Thin wrapper so `E: Display` user errors compose with `std::error::Error` without
/// requiring `E: std::error::Error` itself (user item/error types are often plain enums
/// or opaque values, not full `Error` impls).
#[derive(Debug)]
pub struct UserError<E>(pub E);

impl<E: fmt::Display> fmt::Display for UserError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for UserError<E> {}
