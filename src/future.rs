//! Interop with `std::future::Future`, in both directions.

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{ready, Context, Poll, Waker};

use pin_project::pin_project;

use crate::error::Reason;
use crate::promise::{Promise, Resolver};

/// Future that completes when a promise settles.
///
/// Created with `promise.into_future()`, or implicitly by `promise.await`.
/// Wake-ups are delivered through the promise's task queue, so whatever polls
/// this future must also keep draining that queue.
pub struct PromiseFuture<T> {
    promise: Promise<T>,
    waker: Rc<RefCell<Option<Waker>>>,
    subscribed: bool,
}

impl<T: Clone + 'static> Future for PromiseFuture<T> {
    type Output = Result<T, Reason>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(settled) = this.promise.peek() {
            return Poll::Ready(settled);
        }

        *this.waker.borrow_mut() = Some(cx.waker().clone());
        if !this.subscribed {
            this.subscribed = true;
            let on_fulfilled = this.waker.clone();
            let on_rejected = this.waker.clone();
            this.promise.done(move |_| wake(&on_fulfilled), move |_| wake(&on_rejected));
        }
        Poll::Pending
    }
}

fn wake(slot: &RefCell<Option<Waker>>) {
    if let Some(waker) = slot.borrow_mut().take() {
        waker.wake();
    }
}

impl<T: Clone + 'static> IntoFuture for Promise<T> {
    type Output = Result<T, Reason>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> PromiseFuture<T> {
        PromiseFuture {
            promise: self,
            waker: Rc::new(RefCell::new(None)),
            subscribed: false,
        }
    }
}

/// Runs a future and settles a promise with its output.
#[pin_project]
pub struct Settle<Fut, T> {
    #[pin]
    inner: Fut,
    resolver: Option<Resolver<T>>,
}

impl<Fut, T> Settle<Fut, T> {
    pub fn new(inner: Fut, resolver: Resolver<T>) -> Self {
        Settle {
            inner,
            resolver: Some(resolver),
        }
    }
}

impl<Fut, T> Future for Settle<Fut, T>
where
    Fut: Future<Output = Result<T, Reason>>,
    T: Clone + 'static,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        let settled = ready!(this.inner.poll(cx));
        if let Some(resolver) = this.resolver.take() {
            match settled {
                Ok(value) => resolver.resolve(value),
                Err(reason) => resolver.reject(reason),
            }
        }
        Poll::Ready(())
    }
}
