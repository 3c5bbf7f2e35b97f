#![doc = include_str!("../README.md")]

pub mod cancellation;
pub mod combinator;
pub mod deferred;
pub mod error;
pub mod executor;
pub mod filter;
pub mod future;
pub(crate) mod helpers;
pub mod promise;
pub mod queue;
pub mod thenable;

pub use cancellation::{AsCancellable, Cancellable, CancellationQueue};
pub use combinator::{all, any, fulfilled, map, pending, race, reduce, reject, resolve};
pub use deferred::Deferred;
pub use error::{
    CancellationError, ChainingCycle, CompositeError, ConstraintError, LengthError, NotSupported,
    PanicError, Reason, TimeoutError, WaitError,
};
pub use executor::{EventLoop, Host, PromiseWaiter};
pub use filter::{Constraint, ErrorFilter, TypeTag};
pub use future::PromiseFuture;
pub use promise::{Promise, Resolution, Resolver};
pub use queue::TaskQueue;
pub use thenable::{FlagPromise, SettledFlag, Thenable};
