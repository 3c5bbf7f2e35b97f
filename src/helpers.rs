use std::any::{type_name, Any};
use std::panic::{self, AssertUnwindSafe};

use log::warn;

use crate::error::PanicError;

/// Run a user callback, turning a panic into a [`PanicError`].
///
/// Callbacks only ever run with no promise state borrowed, so unwinding out
/// of one cannot leave shared state half-updated.
pub(crate) fn catch_panic<R>(what: &str, f: impl FnOnce() -> R) -> Result<R, PanicError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        warn!("{} panicked: {}", what, message);
        PanicError { message }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Whether `T` is `Promise<_>`.
///
/// Stable Rust has no way to ask this of an unconstrained `T`, so the check
/// compares `type_name` output. That output is not guaranteed stable across
/// compiler versions; if it changes shape the check degrades to `false` and
/// promise values are stored like any other value.
pub(crate) fn is_promise_type<T>() -> bool {
    let own = type_name::<crate::promise::Promise<()>>();
    let base = own.split('<').next().unwrap_or(own);
    type_name::<T>()
        .strip_prefix(base)
        .map_or(false, |rest| rest.starts_with('<'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Promise;

    #[test]
    fn detects_promise_types() {
        assert!(is_promise_type::<Promise<i32>>());
        assert!(is_promise_type::<Promise<Vec<String>>>());
        assert!(!is_promise_type::<i32>());
        assert!(!is_promise_type::<Vec<Promise<i32>>>());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = catch_panic("test", || panic!("boom {}", 1)).unwrap_err();
        assert_eq!(err.message, "boom 1");
        let err = catch_panic("test", || std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(err.message, "non-string panic payload");
        assert_eq!(catch_panic("test", || 3).unwrap(), 3);
    }
}
