use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

/// Why a promise was rejected.
///
/// A shared handle to any `std::error::Error`. Cloning is cheap and every
/// clone points at the same error, so handlers can check identity with
/// [`Reason::ptr_eq`] or recover the concrete type with
/// [`Reason::downcast_ref`].
#[derive(Clone)]
pub struct Reason(Rc<dyn StdError + 'static>);

impl Reason {
    pub fn new<E: StdError + 'static>(error: E) -> Self {
        Reason(Rc::new(error))
    }

    /// Whether the wrapped error is of concrete type `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.0.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    pub fn as_error(&self) -> &(dyn StdError + 'static) {
        &*self.0
    }

    /// Whether both handles wrap the very same error value.
    pub fn ptr_eq(&self, other: &Reason) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<E: StdError + 'static> From<E> for Reason {
    fn from(error: E) -> Self {
        Reason::new(error)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

/// `any` was handed an empty input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Input array must contain at least 1 item but contains only {len} item{}.", plural(.len))]
pub struct LengthError {
    pub len: usize,
}

fn plural(len: &usize) -> &'static str {
    if *len == 1 {
        ""
    } else {
        "s"
    }
}

/// Every input of `any` rejected. Reasons are kept in input order.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CompositeError {
    message: String,
    reasons: Vec<Reason>,
}

impl CompositeError {
    pub fn new(reasons: Vec<Reason>, message: impl Into<String>) -> Self {
        CompositeError {
            message: message.into(),
            reasons,
        }
    }

    pub fn reasons(&self) -> &[Reason] {
        &self.reasons
    }
}

/// Conventional rejection reason for cancelled operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CancellationError(pub String);

impl Default for CancellationError {
    fn default() -> Self {
        CancellationError("operation was cancelled".to_string())
    }
}

/// A waiter gave up before the promise settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise did not settle within {after:?}")]
pub struct TimeoutError {
    pub after: Duration,
}

/// A handler, executor or canceller panicked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("callback panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

/// A promise was resolved with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot resolve a promise with itself")]
pub struct ChainingCycle;

/// The operation is not available on a flag-only foreign promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation}() is not supported by this promise adapter")]
pub struct NotSupported {
    pub operation: &'static str,
}

/// A type constraint whose shape the rejection filter cannot evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintError {
    #[error("groups of union or intersection types are not supported: {0}")]
    NestedGroup(String),
}

/// Failure of a blocking wait.
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    #[error("promise rejected: {0}")]
    Rejected(Reason),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl WaitError {
    pub fn reason(&self) -> Option<&Reason> {
        match self {
            WaitError::Rejected(reason) => Some(reason),
            WaitError::Timeout(_) => None,
        }
    }
}
