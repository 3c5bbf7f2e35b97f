//! Cancellation fan-out for aggregate promises.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::promise::{Promise, Resolution};
use crate::thenable::Thenable;

/// Something that can be asked to stop.
pub trait Cancellable {
    fn cancel(&self);
}

impl<T: Clone + 'static> Cancellable for Promise<T> {
    fn cancel(&self) {
        Promise::cancel(self)
    }
}

/// Exposes a cancel capability if the value has one.
pub trait AsCancellable {
    fn as_cancellable(&self) -> Option<Rc<dyn Cancellable>>;
}

impl<C: Cancellable + Clone + 'static> AsCancellable for C {
    fn as_cancellable(&self) -> Option<Rc<dyn Cancellable>> {
        Some(Rc::new(self.clone()))
    }
}

impl<T: Clone + 'static> AsCancellable for Resolution<T> {
    fn as_cancellable(&self) -> Option<Rc<dyn Cancellable>> {
        match self {
            Resolution::Promise(promise) => promise.as_cancellable(),
            Resolution::Thenable(foreign) if foreign.is_cancellable() => {
                Some(Rc::new(ForeignCanceller(foreign.clone())))
            }
            Resolution::Thenable(_) | Resolution::Value(_) | Resolution::Rejected(_) => None,
        }
    }
}

struct ForeignCanceller<T>(Rc<dyn Thenable<T>>);

impl<T> Cancellable for ForeignCanceller<T> {
    fn cancel(&self) {
        self.0.cancel()
    }
}

#[derive(Default)]
struct Entries {
    started: bool,
    draining: bool,
    items: VecDeque<Rc<dyn Cancellable>>,
}

/// Children registered while an aggregate promise is being set up.
///
/// Installed as the aggregate's canceller. Cancelling it cancels every
/// recorded child in enqueue order, exactly once. Children enqueued after the
/// queue was cancelled are cancelled as soon as they are enqueued.
#[derive(Clone, Default)]
pub struct CancellationQueue {
    entries: Rc<RefCell<Entries>>,
}

impl CancellationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `item` if it can be cancelled. Returns whether it was recorded.
    pub fn enqueue(&self, item: &impl AsCancellable) -> bool {
        let Some(cancellable) = item.as_cancellable() else {
            return false;
        };
        let drain = {
            let mut entries = self.entries.borrow_mut();
            entries.items.push_back(cancellable);
            entries.started && !entries.draining
        };
        if drain {
            self.drain();
        }
        true
    }

    pub fn cancel(&self) {
        {
            let mut entries = self.entries.borrow_mut();
            if entries.started {
                return;
            }
            entries.started = true;
        }
        debug!("cancelling {} queued child operation(s)", self.len());
        self.drain();
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().items.is_empty()
    }

    fn drain(&self) {
        self.entries.borrow_mut().draining = true;
        loop {
            // a child's canceller may enqueue into this very queue
            let next = self.entries.borrow_mut().items.pop_front();
            match next {
                Some(item) => item.cancel(),
                None => break,
            }
        }
        self.entries.borrow_mut().draining = false;
    }
}

impl Cancellable for CancellationQueue {
    fn cancel(&self) {
        CancellationQueue::cancel(self)
    }
}

impl fmt::Debug for CancellationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.borrow();
        f.debug_struct("CancellationQueue")
            .field("started", &entries.started)
            .field("len", &entries.items.len())
            .finish()
    }
}
