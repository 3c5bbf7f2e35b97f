//! The promise state machine.
//!
//! A [`Promise`] is a cheap handle to shared state that is either pending or
//! settled (fulfilled with a value, rejected with a [`Reason`]). Settling
//! happens at most once. Continuations registered with `then` and friends are
//! never run inline: once the promise is settled they are pushed onto the
//! promise's [`TaskQueue`] and run when the event loop drains it.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use log::{debug, trace};

use crate::error::{ChainingCycle, Reason};
use crate::filter::ErrorFilter;
use crate::helpers::{catch_panic, is_promise_type};
use crate::queue::TaskQueue;
use crate::thenable::{self, Thenable};

pub(crate) type Settled<T> = Result<T, Reason>;
type Reaction<T> = Box<dyn FnOnce(Settled<T>)>;
pub(crate) type Canceller<T> = Box<dyn FnOnce(&Resolver<T>)>;

/// Anything a promise can be resolved with.
///
/// Handlers hand one of these back to their derived promise: a plain value
/// fulfills it, a promise or thenable is adopted (never nested), and
/// `Rejected` rejects it.
pub enum Resolution<T> {
    Value(T),
    Promise(Promise<T>),
    Thenable(Rc<dyn Thenable<T>>),
    Rejected(Reason),
}

impl<T> Resolution<T> {
    pub fn reject(reason: impl Into<Reason>) -> Self {
        Resolution::Rejected(reason.into())
    }
}

impl<T> From<T> for Resolution<T> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T> From<Promise<T>> for Resolution<T> {
    fn from(promise: Promise<T>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T> From<Rc<dyn Thenable<T>>> for Resolution<T> {
    fn from(thenable: Rc<dyn Thenable<T>>) -> Self {
        Resolution::Thenable(thenable)
    }
}

impl<T, E: Into<Reason>> From<Result<T, E>> for Resolution<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Resolution::Value(value),
            Err(reason) => Resolution::Rejected(reason.into()),
        }
    }
}

impl<T> fmt::Debug for Resolution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(_) => f.write_str("Value(..)"),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
            Resolution::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
        }
    }
}

enum State<T> {
    Pending(Pending<T>),
    Fulfilled(T),
    Rejected(Reason),
}

struct Pending<T> {
    reactions: Vec<Reaction<T>>,
    canceller: Option<Canceller<T>>,
    /// Set by the first resolution; later resolutions are ignored even while
    /// an adopted promise keeps this one pending.
    locked: bool,
    /// Derived promises that have not yet asked for cancellation.
    dependents: usize,
    /// Withdraws this promise's interest from the promise it adopted.
    following: Option<Box<dyn FnOnce()>>,
}

impl<T> Pending<T> {
    fn new(canceller: Option<Canceller<T>>) -> Self {
        Pending {
            reactions: Vec::new(),
            canceller,
            locked: false,
            dependents: 0,
            following: None,
        }
    }
}

struct Inner<T> {
    state: State<T>,
    queue: TaskQueue,
}

/// Eventual result of an asynchronous operation.
pub struct Promise<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Promise<T> {
    fn state_name(&self) -> &'static str {
        match self.inner.borrow().state {
            State::Pending(_) => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending(_))
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.borrow().state, State::Rejected(_))
    }

    /// The queue continuations of this promise are scheduled on.
    pub fn queue(&self) -> TaskQueue {
        self.inner.borrow().queue.clone()
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// Create a pending promise and hand its resolver to `executor` right away.
    ///
    /// A panicking executor rejects the promise.
    pub fn new(executor: impl FnOnce(Resolver<T>)) -> Self {
        Self::create(&TaskQueue::current(), None, executor)
    }

    pub fn new_in(queue: &TaskQueue, executor: impl FnOnce(Resolver<T>)) -> Self {
        Self::create(queue, None, executor)
    }

    /// Like [`Promise::new`], with a canceller invoked by the first
    /// [`Promise::cancel`] while the promise is pending.
    pub fn with_canceller(
        executor: impl FnOnce(Resolver<T>),
        canceller: impl FnOnce(&Resolver<T>) + 'static,
    ) -> Self {
        Self::create(&TaskQueue::current(), Some(Box::new(canceller)), executor)
    }

    pub fn with_canceller_in(
        queue: &TaskQueue,
        executor: impl FnOnce(Resolver<T>),
        canceller: impl FnOnce(&Resolver<T>) + 'static,
    ) -> Self {
        Self::create(queue, Some(Box::new(canceller)), executor)
    }

    /// An already fulfilled promise.
    ///
    /// # Panics
    ///
    /// If `T` is itself a promise type. Use [`crate::resolve`] to adopt
    /// another promise's state instead.
    pub fn fulfilled(value: T) -> Self {
        Self::fulfilled_in(&TaskQueue::current(), value)
    }

    pub fn fulfilled_in(queue: &TaskQueue, value: T) -> Self {
        assert_not_promise::<T>();
        Self::from_state(queue, State::Fulfilled(value))
    }

    /// An already rejected promise.
    pub fn rejected(reason: impl Into<Reason>) -> Self {
        Self::rejected_in(&TaskQueue::current(), reason)
    }

    pub fn rejected_in(queue: &TaskQueue, reason: impl Into<Reason>) -> Self {
        Self::from_state(queue, State::Rejected(reason.into()))
    }

    fn from_state(queue: &TaskQueue, state: State<T>) -> Self {
        Promise {
            inner: Rc::new(RefCell::new(Inner {
                state,
                queue: queue.clone(),
            })),
        }
    }

    pub(crate) fn create(
        queue: &TaskQueue,
        canceller: Option<Canceller<T>>,
        executor: impl FnOnce(Resolver<T>),
    ) -> Self {
        let promise = Self::from_state(queue, State::Pending(Pending::new(canceller)));
        let resolver = promise.resolver();
        let on_panic = resolver.clone();
        if let Err(panic) = catch_panic("promise executor", move || executor(resolver)) {
            on_panic.reject(panic);
        }
        promise
    }

    pub(crate) fn resolver(&self) -> Resolver<T> {
        Resolver {
            promise: self.clone(),
        }
    }

    /// The settled outcome, if any.
    pub fn peek(&self) -> Option<Settled<T>> {
        match &self.inner.borrow().state {
            State::Pending(_) => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Register both handlers. The derived promise follows whichever runs.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Resolution<U> + 'static,
        R: FnOnce(Reason) -> Resolution<U> + 'static,
    {
        self.chain(move |settled| match settled {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        })
    }

    /// Register a fulfillment handler; a rejection passes through untouched.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Resolution<U> + 'static,
    {
        self.chain(move |settled| match settled {
            Ok(value) => on_fulfilled(value),
            Err(reason) => Resolution::Rejected(reason),
        })
    }

    /// Register a rejection handler without any type filtering.
    pub fn or_else<F>(&self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(Reason) -> Resolution<T> + 'static,
    {
        self.chain(move |settled| match settled {
            Ok(value) => Resolution::Value(value),
            Err(reason) => on_rejected(reason),
        })
    }

    /// Handle any rejection.
    pub fn catch<F>(&self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(Reason) -> Resolution<T> + 'static,
    {
        self.catch_where(ErrorFilter::any(), on_rejected)
    }

    /// Handle rejections whose reason is an `E`; any other rejection passes
    /// through unchanged.
    pub fn catch_as<E, F>(&self, on_rejected: F) -> Promise<T>
    where
        E: std::error::Error + 'static,
        F: FnOnce(&E) -> Resolution<T> + 'static,
    {
        self.chain(move |settled| match settled {
            Ok(value) => Resolution::Value(value),
            Err(reason) => match reason.downcast_ref::<E>() {
                Some(error) => on_rejected(error),
                None => Resolution::Rejected(reason.clone()),
            },
        })
    }

    /// Handle rejections accepted by `filter`; any other rejection passes
    /// through unchanged.
    pub fn catch_where<F>(&self, filter: ErrorFilter, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(Reason) -> Resolution<T> + 'static,
    {
        self.chain(move |settled| match settled {
            Ok(value) => Resolution::Value(value),
            Err(reason) if filter.matches(&reason) => on_rejected(reason),
            Err(reason) => Resolution::Rejected(reason),
        })
    }

    /// Run `on_settled` whatever the outcome, then pass the outcome on.
    ///
    /// If the callback fails, or returns a promise that rejects, that failure
    /// replaces the original outcome.
    pub fn finally<F, R>(&self, on_settled: F) -> Promise<T>
    where
        F: FnOnce() -> R + 'static,
        R: Into<Resolution<()>>,
    {
        let queue = self.queue();
        self.chain(move |settled| {
            let cleanup: Resolution<()> = on_settled().into();
            let after = crate::combinator::resolve_in(&queue, cleanup);
            Resolution::Promise(after.and_then(move |()| match settled {
                Ok(value) => Resolution::Value(value),
                Err(reason) => Resolution::Rejected(reason),
            }))
        })
    }

    /// Terminal subscription: no derived promise is created.
    ///
    /// A panicking handler is logged and otherwise ignored.
    pub fn done<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(Reason) + 'static,
    {
        self.subscribe(move |settled| {
            let _ = catch_panic("done handler", move || match settled {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            });
        });
    }

    /// Request cancellation.
    ///
    /// Runs the canceller at most once, and only while pending. The canceller
    /// decides whether and how the promise settles. A promise that adopted
    /// another pending promise also withdraws its interest from it, which
    /// cancels that promise once none of its dependents is interested.
    pub fn cancel(&self) {
        let (canceller, following) = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.state {
                State::Pending(pending) => (pending.canceller.take(), pending.following.take()),
                _ => return,
            }
        };
        if let Some(canceller) = canceller {
            debug!("cancelling pending promise");
            let resolver = self.resolver();
            let on_panic = resolver.clone();
            if let Err(panic) = catch_panic("canceller", move || canceller(&resolver)) {
                on_panic.reject(panic);
            }
        }
        if let Some(following) = following {
            following();
        }
    }

    fn chain<U>(&self, handler: impl FnOnce(Settled<T>) -> Resolution<U> + 'static) -> Promise<U>
    where
        U: Clone + 'static,
    {
        let queue = self.queue();
        let canceller: Option<Canceller<U>> = if self.add_dependent() {
            let parent = self.clone();
            Some(Box::new(move |_: &Resolver<U>| parent.release_dependent()))
        } else {
            None
        };
        let derived = Promise::from_state(&queue, State::Pending(Pending::new(canceller)));
        let target = derived.resolver();
        self.subscribe(move |settled| {
            let resolution = match catch_panic("promise handler", move || handler(settled)) {
                Ok(resolution) => resolution,
                Err(panic) => Resolution::reject(panic),
            };
            target.resolve_with(resolution);
        });
        derived
    }

    fn subscribe(&self, reaction: impl FnOnce(Settled<T>) + 'static) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let settled = match &mut inner.state {
            State::Pending(pending) => {
                pending.reactions.push(Box::new(reaction));
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(reason) => Err(reason.clone()),
        };
        trace!("scheduling handler of a settled promise");
        inner.queue.enqueue(move || reaction(settled));
    }

    /// Count a new derived promise that may later vote for cancellation.
    /// Returns false when this promise cannot be cancelled any more.
    fn add_dependent(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.state {
            State::Pending(pending) if pending.canceller.is_some() || pending.following.is_some() => {
                pending.dependents += 1;
                true
            }
            _ => false,
        }
    }

    fn release_dependent(&self) {
        let cancel = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.state {
                State::Pending(pending) => {
                    pending.dependents = pending.dependents.saturating_sub(1);
                    pending.dependents == 0
                }
                _ => false,
            }
        };
        if cancel {
            self.cancel();
        }
    }

    /// First resolution wins; everything after it is ignored.
    pub(crate) fn resolve_with(&self, resolution: Resolution<T>) {
        if let Resolution::Value(_) = resolution {
            assert_not_promise::<T>();
        }
        {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.state {
                State::Pending(pending) if !pending.locked => pending.locked = true,
                _ => {
                    trace!("ignoring resolution of an already resolved promise");
                    return;
                }
            }
        }
        match resolution {
            Resolution::Value(value) => self.settle(Ok(value)),
            Resolution::Rejected(reason) => self.settle(Err(reason)),
            Resolution::Promise(source) => self.follow(source),
            Resolution::Thenable(foreign) => self.follow(thenable::adopt(&self.queue(), foreign)),
        }
    }

    fn follow(&self, source: Promise<T>) {
        if self.ptr_eq(&source) {
            self.settle(Err(ChainingCycle.into()));
            return;
        }
        if source.add_dependent() {
            let upstream = source.clone();
            let mut inner = self.inner.borrow_mut();
            if let State::Pending(pending) = &mut inner.state {
                pending.following = Some(Box::new(move || upstream.release_dependent()));
            }
        }
        let target = self.clone();
        source.subscribe(move |settled| target.settle(settled));
    }

    fn settle(&self, settled: Settled<T>) {
        let (pending, queue) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending(_)) {
                trace!("ignoring settlement of an already settled promise");
                return;
            }
            let next = match &settled {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            match mem::replace(&mut inner.state, next) {
                State::Pending(pending) => (pending, inner.queue.clone()),
                _ => return,
            }
        };
        trace!(
            "promise {} with {} queued handler(s)",
            if settled.is_ok() { "fulfilled" } else { "rejected" },
            pending.reactions.len()
        );
        for reaction in pending.reactions {
            let settled = settled.clone();
            queue.enqueue(move || reaction(settled));
        }
    }
}

fn assert_not_promise<T>() {
    assert!(
        !is_promise_type::<T>(),
        "a promise cannot be fulfilled with another promise; use resolve() to adopt its state"
    );
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state_name())
            .finish()
    }
}

/// Write handle of a promise, given to executors and cancellers.
///
/// Only the first call to any of its methods (across all clones) has an
/// effect.
pub struct Resolver<T> {
    promise: Promise<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver {
            promise: self.promise.clone(),
        }
    }
}

impl<T: Clone + 'static> Resolver<T> {
    /// # Panics
    ///
    /// If `T` is itself a promise type; use [`Resolver::resolve_with`].
    pub fn resolve(&self, value: T) {
        self.promise.resolve_with(Resolution::Value(value));
    }

    pub fn resolve_with(&self, resolution: impl Into<Resolution<T>>) {
        self.promise.resolve_with(resolution.into());
    }

    pub fn reject(&self, reason: impl Into<Reason>) {
        self.promise.resolve_with(Resolution::Rejected(reason.into()));
    }

    pub fn is_settled(&self) -> bool {
        self.promise.is_settled()
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .finish()
    }
}
