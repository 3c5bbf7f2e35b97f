//! Free functions that build promises, alone or from many inputs.
//!
//! Every aggregate registers its inputs in a [`CancellationQueue`] that serves
//! as the aggregate's canceller, so cancelling the result reaches every input
//! that can be cancelled.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::cancellation::CancellationQueue;
use crate::error::{CompositeError, LengthError, Reason};
use crate::promise::{Promise, Resolution};
use crate::queue::TaskQueue;
use crate::thenable;

/// Normalize anything promise-like into a [`Promise`].
///
/// A promise is returned as is, a thenable is adopted, a value becomes a
/// fulfilled promise and `Resolution::Rejected` a rejected one.
pub fn resolve<T: Clone + 'static>(item: impl Into<Resolution<T>>) -> Promise<T> {
    resolve_in(&TaskQueue::current(), item.into())
}

pub(crate) fn resolve_in<T: Clone + 'static>(queue: &TaskQueue, item: Resolution<T>) -> Promise<T> {
    match item {
        Resolution::Promise(promise) => promise,
        Resolution::Value(value) => Promise::fulfilled_in(queue, value),
        Resolution::Rejected(reason) => Promise::rejected_in(queue, reason),
        Resolution::Thenable(foreign) => thenable::adopt(queue, foreign),
    }
}

pub fn fulfilled<T: Clone + 'static>(value: T) -> Promise<T> {
    Promise::fulfilled(value)
}

pub fn reject<T: Clone + 'static>(reason: impl Into<Reason>) -> Promise<T> {
    Promise::rejected(reason)
}

/// A promise that never settles.
pub fn pending<T: Clone + 'static>() -> Promise<T> {
    Promise::new(|_| {})
}

fn collect<T, I: Into<Resolution<T>>>(items: impl IntoIterator<Item = I>) -> Vec<Resolution<T>> {
    items.into_iter().map(Into::into).collect()
}

/// Fulfills with every input's value, in input order, once all fulfill.
/// Rejects with the first rejection.
pub fn all<T, I>(items: impl IntoIterator<Item = I>) -> Promise<Vec<T>>
where
    T: Clone + 'static,
    I: Into<Resolution<T>>,
{
    map(items, Resolution::Value)
}

/// Settles like the first input to settle. An empty input never settles.
pub fn race<T, I>(items: impl IntoIterator<Item = I>) -> Promise<T>
where
    T: Clone + 'static,
    I: Into<Resolution<T>>,
{
    let items = collect(items);
    let queue = TaskQueue::current();
    if items.is_empty() {
        return Promise::new_in(&queue, |_| {});
    }

    let cancellation = CancellationQueue::new();
    let canceller = cancellation.clone();
    let scope = queue.clone();
    Promise::with_canceller_in(
        &queue,
        move |resolver| {
            for item in items {
                cancellation.enqueue(&item);
                let on_fulfilled = resolver.clone();
                let on_rejected = resolver.clone();
                resolve_in(&scope, item).done(
                    move |value| on_fulfilled.resolve(value),
                    move |reason| on_rejected.reject(reason),
                );
            }
        },
        move |_| canceller.cancel(),
    )
}

/// Fulfills with the first input to fulfill.
///
/// Rejects with a [`CompositeError`] holding every reason, in input order,
/// once all inputs reject, and with a [`LengthError`] for an empty input.
pub fn any<T, I>(items: impl IntoIterator<Item = I>) -> Promise<T>
where
    T: Clone + 'static,
    I: Into<Resolution<T>>,
{
    let items = collect(items);
    let queue = TaskQueue::current();
    if items.is_empty() {
        return Promise::rejected_in(&queue, LengthError { len: 0 });
    }

    let cancellation = CancellationQueue::new();
    let canceller = cancellation.clone();
    let scope = queue.clone();
    Promise::with_canceller_in(
        &queue,
        move |resolver| {
            let total = items.len();
            let reasons: Rc<RefCell<Vec<Option<Reason>>>> = Rc::new(RefCell::new(vec![None; total]));
            let remaining = Rc::new(Cell::new(total));
            for (index, item) in items.into_iter().enumerate() {
                cancellation.enqueue(&item);
                let on_fulfilled = resolver.clone();
                let on_rejected = resolver.clone();
                let reasons = reasons.clone();
                let remaining = remaining.clone();
                resolve_in(&scope, item).done(
                    move |value| on_fulfilled.resolve(value),
                    move |reason| {
                        reasons.borrow_mut()[index] = Some(reason);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let reasons = reasons.borrow_mut().drain(..).flatten().collect();
                            on_rejected.reject(CompositeError::new(reasons, "All promises rejected."));
                        }
                    },
                );
            }
        },
        move |_| canceller.cancel(),
    )
}

/// Apply `map_fn` to every input's value as soon as it is available.
///
/// Fulfills with the mapped values in input order. Rejects with the first
/// rejection, whether it comes from an input or from `map_fn`.
pub fn map<T, U, I, F>(items: impl IntoIterator<Item = I>, map_fn: F) -> Promise<Vec<U>>
where
    T: Clone + 'static,
    U: Clone + 'static,
    I: Into<Resolution<T>>,
    F: Fn(T) -> Resolution<U> + 'static,
{
    let items = collect(items);
    let queue = TaskQueue::current();
    if items.is_empty() {
        return Promise::fulfilled_in(&queue, Vec::new());
    }

    let cancellation = CancellationQueue::new();
    let canceller = cancellation.clone();
    let scope = queue.clone();
    let map_fn = Rc::new(map_fn);
    Promise::with_canceller_in(
        &queue,
        move |resolver| {
            let total = items.len();
            let slots: Rc<RefCell<Vec<Option<U>>>> = Rc::new(RefCell::new(vec![None; total]));
            let remaining = Rc::new(Cell::new(total));
            for (index, item) in items.into_iter().enumerate() {
                cancellation.enqueue(&item);
                let map_fn = map_fn.clone();
                let on_fulfilled = resolver.clone();
                let on_rejected = resolver.clone();
                let slots = slots.clone();
                let remaining = remaining.clone();
                resolve_in(&scope, item)
                    .and_then(move |value| (*map_fn)(value))
                    .done(
                        move |mapped| {
                            slots.borrow_mut()[index] = Some(mapped);
                            remaining.set(remaining.get() - 1);
                            if remaining.get() == 0 {
                                let values = slots.borrow_mut().drain(..).flatten().collect();
                                on_fulfilled.resolve(values);
                            }
                        },
                        move |reason| on_rejected.reject(reason),
                    );
            }
        },
        move |_| canceller.cancel(),
    )
}

/// Fold the inputs left to right.
///
/// `reduce_fn(accumulator, value, index, total)` runs for one input at a time,
/// each call waiting for the previous one. `initial` may itself be a promise;
/// with no inputs the result settles like `initial`.
pub fn reduce<T, A, I, F>(
    items: impl IntoIterator<Item = I>,
    reduce_fn: F,
    initial: impl Into<Resolution<A>>,
) -> Promise<A>
where
    T: Clone + 'static,
    A: Clone + 'static,
    I: Into<Resolution<T>>,
    F: Fn(A, T, usize, usize) -> Resolution<A> + 'static,
{
    let items = collect(items);
    let initial = initial.into();
    let queue = TaskQueue::current();

    let cancellation = CancellationQueue::new();
    let canceller = cancellation.clone();
    let scope = queue.clone();
    let reduce_fn = Rc::new(reduce_fn);
    Promise::with_canceller_in(
        &queue,
        move |resolver| {
            let total = items.len();
            cancellation.enqueue(&initial);
            let mut folded = resolve_in(&scope, initial);
            for (index, item) in items.into_iter().enumerate() {
                cancellation.enqueue(&item);
                let reduce_fn = reduce_fn.clone();
                let scope = scope.clone();
                folded = folded.and_then(move |accumulator| {
                    Resolution::Promise(
                        resolve_in(&scope, item)
                            .and_then(move |value| (*reduce_fn)(accumulator, value, index, total)),
                    )
                });
            }
            let on_rejected = resolver.clone();
            folded.done(
                move |value| resolver.resolve(value),
                move |reason| on_rejected.reject(reason),
            );
        },
        move |_| canceller.cancel(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Deferred;
    use crate::error::CancellationError;
    use crate::promise::Settled;

    fn drain<T: Clone + 'static>(promise: &Promise<T>) -> Option<Settled<T>> {
        TaskQueue::current().run_until_idle();
        promise.peek()
    }

    fn counting_deferred(count: &Rc<Cell<usize>>) -> Deferred<i32> {
        let count = count.clone();
        Deferred::with_canceller(move |resolver| {
            count.set(count.get() + 1);
            resolver.reject(CancellationError::default());
        })
    }

    #[test]
    fn resolve_returns_promises_unchanged() {
        let promise = Promise::fulfilled(1);
        let same: Promise<i32> = resolve(promise.clone());
        assert!(same.ptr_eq(&promise));
    }

    #[test]
    fn resolve_wraps_values_and_rejections() {
        assert_eq!(resolve(4).peek().unwrap().unwrap(), 4);
        let rejected: Promise<i32> = resolve(Resolution::reject(CancellationError::default()));
        assert!(rejected.is_rejected());
    }

    #[test]
    fn all_keeps_input_order() {
        let late = Deferred::new();
        let promise: Promise<Vec<i32>> = all(vec![
            Resolution::Promise(late.promise()),
            Resolution::Value(2),
            Resolution::Promise(Promise::fulfilled(3)),
        ]);
        TaskQueue::current().run_until_idle();
        assert!(promise.is_pending());
        late.resolve(1);
        assert_eq!(drain(&promise).unwrap().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn all_of_nothing_is_empty() {
        let promise: Promise<Vec<i32>> = all(Vec::<i32>::new());
        assert_eq!(promise.peek().unwrap().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn all_rejects_with_first_rejection() {
        let first = Deferred::<i32>::new();
        let second = Deferred::<i32>::new();
        let promise: Promise<Vec<i32>> = all(vec![first.promise(), second.promise()]);
        second.reject(CancellationError("second".into()));
        first.reject(CancellationError("first".into()));
        assert_eq!(drain(&promise).unwrap().unwrap_err().to_string(), "second");
    }

    #[test]
    fn race_of_nothing_stays_pending() {
        let promise: Promise<i32> = race(Vec::<i32>::new());
        TaskQueue::current().run_until_idle();
        assert!(promise.is_pending());
    }

    #[test]
    fn race_follows_first_settled() {
        let slow = Deferred::new();
        let fast = Deferred::new();
        let promise: Promise<&str> = race(vec![slow.promise(), fast.promise()]);
        fast.resolve("fast");
        slow.resolve("slow");
        assert_eq!(drain(&promise).unwrap().unwrap(), "fast");
    }

    #[test]
    fn any_of_nothing_is_a_length_error() {
        let promise: Promise<i32> = any(Vec::<i32>::new());
        let reason = promise.peek().unwrap().unwrap_err();
        assert_eq!(reason.downcast_ref::<LengthError>(), Some(&LengthError { len: 0 }));
    }

    #[test]
    fn any_skips_rejections() {
        let promise: Promise<&str> = any(vec![
            Resolution::reject(CancellationError::default()),
            Resolution::Value("x"),
        ]);
        assert_eq!(drain(&promise).unwrap().unwrap(), "x");
    }

    #[test]
    fn any_collects_reasons_in_input_order() {
        let first = Deferred::<i32>::new();
        let second = Deferred::<i32>::new();
        let promise: Promise<i32> = any(vec![first.promise(), second.promise()]);
        second.reject(CancellationError("b".into()));
        first.reject(CancellationError("a".into()));

        let reason = drain(&promise).unwrap().unwrap_err();
        let composite = reason.downcast_ref::<CompositeError>().unwrap();
        assert_eq!(composite.to_string(), "All promises rejected.");
        let messages: Vec<String> = composite.reasons().iter().map(|r| r.to_string()).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[test]
    fn map_applies_function_in_input_order() {
        let promise = map(vec![1, 2, 3], |value: i32| Resolution::Value(value * 10));
        assert_eq!(drain(&promise).unwrap().unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn map_function_may_return_promises() {
        let promise = map(vec![1, 2], |value: i32| Resolution::Promise(Promise::fulfilled(value + 1)));
        assert_eq!(drain(&promise).unwrap().unwrap(), vec![2, 3]);
    }

    #[test]
    fn map_rejects_when_function_fails() {
        let promise = map(vec![1, 2], |value: i32| {
            if value == 2 {
                Resolution::reject(CancellationError("two".into()))
            } else {
                Resolution::Value(value)
            }
        });
        assert_eq!(drain(&promise).unwrap().unwrap_err().to_string(), "two");
    }

    #[test]
    fn reduce_folds_in_order() {
        let promise = reduce(
            vec![1, 2, 3],
            |acc: Vec<(i32, usize, usize)>, value: i32, index, total| {
                let mut acc = acc;
                acc.push((value, index, total));
                Resolution::Value(acc)
            },
            Vec::new(),
        );
        assert_eq!(
            drain(&promise).unwrap().unwrap(),
            vec![(1, 0, 3), (2, 1, 3), (3, 2, 3)]
        );
    }

    #[test]
    fn reduce_of_nothing_is_the_initial_value() {
        let promise = reduce(Vec::<i32>::new(), |acc: i32, value: i32, _, _| Resolution::Value(acc + value), 7);
        assert_eq!(drain(&promise).unwrap().unwrap(), 7);
    }

    #[test]
    fn reduce_waits_for_promised_initial_value() {
        let initial = Deferred::new();
        let promise = reduce(
            vec![1, 2],
            |acc: i32, value: i32, _, _| Resolution::Value(acc + value),
            initial.promise(),
        );
        TaskQueue::current().run_until_idle();
        assert!(promise.is_pending());
        initial.resolve(10);
        assert_eq!(drain(&promise).unwrap().unwrap(), 13);
    }

    #[test]
    fn reduce_stops_at_failing_step() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let promise = reduce(
            vec![1, 2, 3],
            move |acc: i32, value: i32, _, _| {
                counter.set(counter.get() + 1);
                if value == 2 {
                    Resolution::reject(CancellationError("step".into()))
                } else {
                    Resolution::Value(acc + value)
                }
            },
            0,
        );
        assert_eq!(drain(&promise).unwrap().unwrap_err().to_string(), "step");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn cancelling_aggregates_cancels_pending_inputs_once() {
        let count = Rc::new(Cell::new(0));
        let first = counting_deferred(&count);
        let second = counting_deferred(&count);
        let done = Promise::fulfilled(3);

        let aggregates: Vec<Promise<i32>> = vec![
            race(vec![first.promise(), done.clone()]),
            any(vec![second.promise(), done.clone()]),
        ];
        for aggregate in &aggregates {
            aggregate.cancel();
            aggregate.cancel();
        }
        assert_eq!(count.get(), 2);
        assert_eq!(done.peek().unwrap().unwrap(), 3);
    }

    #[test]
    fn cancelling_reduce_reaches_items_and_initial_value() {
        let count = Rc::new(Cell::new(0));
        let item = counting_deferred(&count);
        let initial = counting_deferred(&count);

        let folded = reduce(
            vec![item.promise()],
            |acc: i32, value: i32, _, _| Resolution::Value(acc + value),
            initial.promise(),
        );
        folded.cancel();
        folded.cancel();
        assert_eq!(count.get(), 2);
        assert!(drain(&folded).unwrap().unwrap_err().is::<CancellationError>());
    }

    #[test]
    fn cancelling_all_and_map_reaches_inputs() {
        let count = Rc::new(Cell::new(0));
        let first = counting_deferred(&count);
        let second = counting_deferred(&count);

        let everything: Promise<Vec<i32>> = all(vec![first.promise()]);
        let mapped = map(vec![second.promise()], |value: i32| Resolution::Value(value));
        everything.cancel();
        mapped.cancel();
        assert_eq!(count.get(), 2);
        assert!(drain(&everything).unwrap().is_err());
        assert!(drain(&mapped).unwrap().is_err());
    }
}
