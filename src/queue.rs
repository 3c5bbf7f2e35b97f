//! FIFO of continuation callbacks waiting for the next event loop tick.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::task::Waker;

use log::trace;

type Task = Box<dyn FnOnce()>;

#[derive(Default)]
struct Tasks {
    pending: VecDeque<Task>,
    // event loop to notify when work arrives
    waker: Option<Waker>,
}

/// Deferred-task queue shared by every promise created against it.
///
/// Handlers are never run at the point where they become runnable: they are
/// pushed here and only execute when the owner of the loop calls
/// [`TaskQueue::run_until_idle`]. Each thread has a lazily created default
/// queue ([`TaskQueue::current`]); tests can build their own and inject it.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<Tasks>>,
}

thread_local! {
    static CURRENT: TaskQueue = TaskQueue::new();
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(TaskQueue::clone)
    }

    pub fn enqueue(&self, task: impl FnOnce() + 'static) {
        let waker = {
            let mut tasks = self.tasks.borrow_mut();
            tasks.pending.push_back(Box::new(task));
            tasks.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Wake `waker` the next time a task is enqueued.
    pub fn notify_on_enqueue(&self, waker: &Waker) {
        self.tasks.borrow_mut().waker = Some(waker.clone());
    }

    /// Run tasks until the queue is empty, including tasks enqueued by the
    /// tasks themselves. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        // the borrow must be released before the task runs: tasks enqueue more tasks
        while let Some(task) = self.pop() {
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!("task queue drained after {} task(s)", ran);
        }
        ran
    }

    /// Run at most one task. Returns whether one ran.
    pub fn run_one(&self) -> bool {
        match self.pop() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().pending.is_empty()
    }

    pub fn same_queue(&self, other: &TaskQueue) -> bool {
        Rc::ptr_eq(&self.tasks, &other.tasks)
    }

    fn pop(&self) -> Option<Task> {
        self.tasks.borrow_mut().pending.pop_front()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn runs_in_fifo_order() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            queue.enqueue(move || log.borrow_mut().push(i));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn tasks_enqueued_while_draining_run_in_same_drain() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let inner_queue = queue.clone();
            let log = log.clone();
            queue.enqueue(move || {
                log.borrow_mut().push("outer");
                let log = log.clone();
                inner_queue.enqueue(move || log.borrow_mut().push("inner"));
            });
        }
        assert_eq!(queue.run_until_idle(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn enqueue_wakes_registered_waker_once() {
        use futures::task::{waker, ArcWake};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Counter(AtomicUsize);
        impl ArcWake for Counter {
            fn wake_by_ref(arc_self: &Arc<Self>) {
                arc_self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let queue = TaskQueue::new();
        queue.notify_on_enqueue(&waker(counter.clone()));
        queue.enqueue(|| {});
        queue.enqueue(|| {});
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_one_runs_a_single_task() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..2 {
            let log = log.clone();
            queue.enqueue(move || log.borrow_mut().push(i));
        }
        assert!(queue.run_one());
        assert_eq!(*log.borrow(), vec![0]);
        assert_eq!(queue.len(), 1);
        assert!(queue.run_one());
        assert!(!queue.run_one());
    }

    #[test]
    fn current_is_shared_per_thread() {
        assert!(TaskQueue::current().same_queue(&TaskQueue::current()));
        assert!(!TaskQueue::current().same_queue(&TaskQueue::new()));
    }
}
