//! Driving promises to completion: the host trait, a blocking waiter, and a
//! single-threaded event loop built on `futures`' local executor.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::thread;
use std::time::{Duration, Instant};

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{abortable, poll_fn, Aborted};
use futures::task::LocalSpawnExt;
use futures::FutureExt;
use log::debug;

use crate::deferred::Deferred;
use crate::error::{CancellationError, Reason, TimeoutError, WaitError};
use crate::future::Settle;
use crate::promise::Promise;
use crate::queue::TaskQueue;

/// The cooperative scheduler a blocking wait yields to.
pub trait Host {
    /// Let pending work run, returning no later than `deadline`.
    fn yield_until(&mut self, deadline: Instant);
}

/// Yield to `host` every `interval` until `ready` produces a value, giving up
/// once `timeout` has elapsed. `None` waits forever.
pub(crate) fn poll_until<H, R>(
    host: &mut H,
    timeout: Option<Duration>,
    interval: Duration,
    mut ready: impl FnMut() -> Option<R>,
) -> Result<R, TimeoutError>
where
    H: Host + ?Sized,
{
    let started = Instant::now();
    loop {
        if let Some(value) = ready() {
            return Ok(value);
        }
        let now = Instant::now();
        let mut deadline = now + interval;
        if let Some(timeout) = timeout {
            if now.duration_since(started) >= timeout {
                debug!("gave up waiting after {:?}", timeout);
                return Err(TimeoutError { after: timeout });
            }
            deadline = deadline.min(started + timeout);
        }
        host.yield_until(deadline);
    }
}

/// Blocks the caller until a promise settles, by yielding to a [`Host`].
#[derive(Debug, Clone)]
pub struct PromiseWaiter<T> {
    promise: Promise<T>,
    timeout: Option<Duration>,
}

impl<T: Clone + 'static> PromiseWaiter<T> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(promise: Promise<T>) -> Self {
        PromiseWaiter {
            promise,
            timeout: Some(Self::DEFAULT_TIMEOUT),
        }
    }

    /// `None` disables the timeout.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.promise.is_settled()
    }

    pub fn wait<H: Host + ?Sized>(&self, host: &mut H) -> Result<T, WaitError> {
        let settled = poll_until(host, self.timeout, Self::POLL_INTERVAL, || self.promise.peek())?;
        settled.map_err(WaitError::Rejected)
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// Block until settled, giving up after
    /// [`PromiseWaiter::DEFAULT_TIMEOUT`].
    pub fn wait<H: Host + ?Sized>(&self, host: &mut H) -> Result<T, WaitError> {
        PromiseWaiter::new(self.clone()).wait(host)
    }

    pub fn wait_timeout<H: Host + ?Sized>(
        &self,
        host: &mut H,
        timeout: Option<Duration>,
    ) -> Result<T, WaitError> {
        PromiseWaiter::new(self.clone()).timeout(timeout).wait(host)
    }
}

/// Single-threaded event loop.
///
/// Each turn drains the [`TaskQueue`] and then runs the spawned futures until
/// none can make progress, repeating while either side produced new work.
pub struct EventLoop {
    pool: LocalPool,
    queue: TaskQueue,
}

impl EventLoop {
    /// An event loop over the calling thread's task queue.
    pub fn new() -> Self {
        Self::with_queue(TaskQueue::current())
    }

    pub fn with_queue(queue: TaskQueue) -> Self {
        EventLoop {
            pool: LocalPool::new(),
            queue,
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn spawner(&self) -> LocalSpawner {
        self.pool.spawner()
    }

    /// Run queued tasks and spawned futures until both are idle. Returns how
    /// many queued tasks ran.
    pub fn run_until_stalled(&mut self) -> usize {
        let mut ran = 0;
        loop {
            ran += self.queue.run_until_idle();
            self.pool.run_until_stalled();
            if self.queue.is_empty() {
                return ran;
            }
        }
    }

    /// Drive the loop until `promise` settles.
    ///
    /// Parks the thread while nothing is runnable, so a promise that can
    /// never settle blocks forever; use [`Promise::wait_timeout`] to bound it.
    pub fn block_on<T: Clone + 'static>(&mut self, promise: &Promise<T>) -> Result<T, Reason> {
        let queue = self.queue.clone();
        let mut settled = promise.clone().into_future();
        self.pool.run_until(poll_fn(move |cx| {
            queue.notify_on_enqueue(cx.waker());
            queue.run_until_idle();
            Pin::new(&mut settled).poll(cx)
        }))
    }

    /// Run `future` on this loop and expose its outcome as a promise.
    ///
    /// Cancelling the promise aborts the future and rejects with a
    /// [`CancellationError`].
    pub fn spawn_promise<T, Fut>(&self, future: Fut) -> Promise<T>
    where
        T: Clone + 'static,
        Fut: Future<Output = Result<T, Reason>> + 'static,
    {
        let (future, handle) = abortable(future);
        let deferred = Deferred::with_canceller_in(&self.queue, move |resolver| {
            handle.abort();
            resolver.reject(CancellationError::default());
        });
        let future = future.map(|outcome| match outcome {
            Ok(settled) => settled,
            Err(Aborted) => Err(Reason::from(CancellationError::default())),
        });
        if let Err(error) = self.spawner().spawn_local(Settle::new(future, deferred.resolver())) {
            deferred.reject(error);
        }
        deferred.promise()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for EventLoop {
    fn yield_until(&mut self, deadline: Instant) {
        if self.run_until_stalled() > 0 {
            return;
        }
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }
}
