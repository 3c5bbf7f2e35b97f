use crate::error::Reason;
use crate::promise::{Promise, Resolution, Resolver};
use crate::queue::TaskQueue;

/// A promise together with the means to settle it.
///
/// The producer keeps the `Deferred` and hands out [`Deferred::promise`] to
/// consumers. Only the first of `resolve`, `resolve_with` or `reject` has an
/// effect; later calls are ignored.
pub struct Deferred<T> {
    promise: Promise<T>,
}

impl<T: Clone + 'static> Deferred<T> {
    pub fn new() -> Self {
        Self::new_in(&TaskQueue::current())
    }

    pub fn new_in(queue: &TaskQueue) -> Self {
        Deferred {
            promise: Promise::new_in(queue, |_| {}),
        }
    }

    /// The canceller runs on the first `cancel()` of the pending promise and
    /// decides how it settles, typically by rejecting with a
    /// [`CancellationError`](crate::CancellationError).
    pub fn with_canceller(canceller: impl FnOnce(&Resolver<T>) + 'static) -> Self {
        Self::with_canceller_in(&TaskQueue::current(), canceller)
    }

    pub fn with_canceller_in(
        queue: &TaskQueue,
        canceller: impl FnOnce(&Resolver<T>) + 'static,
    ) -> Self {
        Deferred {
            promise: Promise::with_canceller_in(queue, |_| {}, canceller),
        }
    }

    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    /// A write handle that outlives this `Deferred`.
    pub fn resolver(&self) -> Resolver<T> {
        self.promise.resolver()
    }

    pub fn resolve(&self, value: T) {
        self.resolver().resolve(value);
    }

    /// Settle with anything a promise accepts, adopting promises and thenables.
    pub fn resolve_with(&self, resolution: impl Into<Resolution<T>>) {
        self.promise.resolve_with(resolution.into());
    }

    pub fn reject(&self, reason: impl Into<Reason>) {
        self.promise.resolve_with(Resolution::Rejected(reason.into()));
    }
}

impl<T: Clone + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}
