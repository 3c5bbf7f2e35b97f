//! Bridges for promises implemented elsewhere.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{NotSupported, Reason, TimeoutError};
use crate::executor::{poll_until, Host};
use crate::promise::{Canceller, Promise, Resolver};
use crate::queue::TaskQueue;

/// A foreign promise that accepts continuations.
///
/// `resolve` turns any implementor into a [`Promise`] that follows it. If the
/// foreign promise can be cancelled, report it through `is_cancellable` and the
/// adopting promise will forward cancellation to it.
pub trait Thenable<T> {
    fn then(&self, on_fulfilled: Box<dyn FnOnce(T)>, on_rejected: Box<dyn FnOnce(Reason)>);

    fn is_cancellable(&self) -> bool {
        false
    }

    fn cancel(&self) {}
}

pub(crate) fn adopt<T: Clone + 'static>(queue: &TaskQueue, foreign: Rc<dyn Thenable<T>>) -> Promise<T> {
    let canceller: Option<Canceller<T>> = if foreign.is_cancellable() {
        let target = foreign.clone();
        Some(Box::new(move |_: &Resolver<T>| target.cancel()))
    } else {
        None
    };
    Promise::create(queue, canceller, move |resolver| {
        let on_rejected = resolver.clone();
        foreign.then(
            Box::new(move |value: T| resolver.resolve(value)),
            Box::new(move |reason: Reason| on_rejected.reject(reason)),
        );
    })
}

/// A foreign promise that can only say whether it has settled.
pub trait SettledFlag {
    fn is_settled(&self) -> bool;
}

impl SettledFlag for Rc<Cell<bool>> {
    fn is_settled(&self) -> bool {
        self.get()
    }
}

/// Reduced adapter for a [`SettledFlag`] implementation.
///
/// It supports waiting and the resolved check only; every continuation and
/// cancellation operation fails with [`NotSupported`].
#[derive(Debug, Clone)]
pub struct FlagPromise<F> {
    flag: F,
}

impl<F: SettledFlag> FlagPromise<F> {
    /// Polling interval used while waiting on the flag.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(flag: F) -> Self {
        FlagPromise { flag }
    }

    pub fn is_resolved(&self) -> bool {
        self.flag.is_settled()
    }

    /// Yield to `host` until the flag is set, or until `timeout` elapses.
    pub fn wait<H: Host + ?Sized>(
        &self,
        host: &mut H,
        timeout: Option<Duration>,
    ) -> Result<(), TimeoutError> {
        poll_until(host, timeout, Self::POLL_INTERVAL, || self.flag.is_settled().then_some(()))
    }

    pub fn then<T, U>(
        &self,
        _on_fulfilled: impl FnOnce(T),
        _on_rejected: impl FnOnce(Reason),
    ) -> Result<Promise<U>, NotSupported> {
        Err(NotSupported { operation: "then" })
    }

    pub fn catch<T>(&self, _on_rejected: impl FnOnce(Reason)) -> Result<Promise<T>, NotSupported> {
        Err(NotSupported { operation: "catch" })
    }

    pub fn finally<T>(&self, _on_settled: impl FnOnce()) -> Result<Promise<T>, NotSupported> {
        Err(NotSupported { operation: "finally" })
    }

    pub fn cancel(&self) -> Result<(), NotSupported> {
        Err(NotSupported { operation: "cancel" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::AsCancellable;
    use crate::promise::Resolution;
    use std::cell::RefCell;

    /// Thenable that settles when told to, recording cancellation.
    struct Manual {
        fulfill: RefCell<Option<Box<dyn FnOnce(i32)>>>,
        cancelled: Cell<bool>,
    }

    impl Manual {
        fn new() -> Rc<Self> {
            Rc::new(Manual {
                fulfill: RefCell::new(None),
                cancelled: Cell::new(false),
            })
        }

        fn fire(&self, value: i32) {
            if let Some(fulfill) = self.fulfill.borrow_mut().take() {
                fulfill(value);
            }
        }
    }

    impl Thenable<i32> for Manual {
        fn then(&self, on_fulfilled: Box<dyn FnOnce(i32)>, _on_rejected: Box<dyn FnOnce(Reason)>) {
            *self.fulfill.borrow_mut() = Some(on_fulfilled);
        }

        fn is_cancellable(&self) -> bool {
            true
        }

        fn cancel(&self) {
            self.cancelled.set(true);
        }
    }

    #[test]
    fn adopted_thenable_settles_the_promise() {
        let queue = TaskQueue::new();
        let manual = Manual::new();
        let promise = adopt(&queue, manual.clone() as Rc<dyn Thenable<i32>>);
        assert!(promise.is_pending());
        manual.fire(5);
        assert_eq!(promise.peek().unwrap().unwrap(), 5);
    }

    #[test]
    fn cancel_is_forwarded_to_the_thenable() {
        let queue = TaskQueue::new();
        let manual = Manual::new();
        let promise = adopt(&queue, manual.clone() as Rc<dyn Thenable<i32>>);
        promise.cancel();
        assert!(manual.cancelled.get());
    }

    #[test]
    fn cancellable_thenable_exposes_capability() {
        let manual = Manual::new();
        let resolution: Resolution<i32> = Resolution::Thenable(manual.clone() as Rc<dyn Thenable<i32>>);
        let handle = resolution.as_cancellable().unwrap();
        handle.cancel();
        assert!(manual.cancelled.get());
    }

    #[test]
    fn flag_promise_rejects_continuations() {
        let flag = Rc::new(Cell::new(false));
        let adapter = FlagPromise::new(flag.clone());
        assert!(!adapter.is_resolved());
        flag.set(true);
        assert!(adapter.is_resolved());

        assert_eq!(
            adapter.then::<i32, i32>(|_| {}, |_| {}).unwrap_err(),
            NotSupported { operation: "then" }
        );
        assert!(adapter.catch::<i32>(|_| {}).is_err());
        assert!(adapter.finally::<i32>(|| {}).is_err());
        assert_eq!(adapter.cancel(), Err(NotSupported { operation: "cancel" }));
    }

    #[test]
    fn flag_promise_waits_for_the_flag() {
        struct SetOnYield(Rc<Cell<bool>>);

        impl Host for SetOnYield {
            fn yield_until(&mut self, _deadline: std::time::Instant) {
                self.0.set(true);
            }
        }

        let flag = Rc::new(Cell::new(false));
        let adapter = FlagPromise::new(flag.clone());
        assert!(adapter.wait(&mut SetOnYield(flag), None).is_ok());
        assert!(adapter.is_resolved());

        struct Idle;

        impl Host for Idle {
            fn yield_until(&mut self, deadline: std::time::Instant) {
                std::thread::sleep(deadline.saturating_duration_since(std::time::Instant::now()));
            }
        }

        let never = FlagPromise::new(Rc::new(Cell::new(false)));
        let error = never.wait(&mut Idle, Some(Duration::from_millis(15))).unwrap_err();
        assert_eq!(error.after, Duration::from_millis(15));
    }
}
