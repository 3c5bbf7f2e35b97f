//! Typed rejection handling.
//!
//! Rust handlers cannot be inspected for the error type they expect, so a
//! rejection handler that only applies to some reasons carries an explicit
//! descriptor: a [`Constraint`] built from [`TypeTag`]s, resolved once into an
//! [`ErrorFilter`] that is checked against each rejection reason.

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;

use crate::error::{ConstraintError, Reason};

/// A named error type a handler accepts.
#[derive(Clone, Copy)]
pub struct TypeTag {
    name: &'static str,
    matcher: fn(&Reason) -> bool,
}

impl TypeTag {
    /// Matches reasons whose concrete type is `E`.
    pub fn of<E: StdError + 'static>() -> Self {
        TypeTag {
            name: type_name::<E>(),
            matcher: Reason::is::<E>,
        }
    }

    /// Matches reasons accepted by `matcher`, e.g. every error type that
    /// shares some capability.
    pub const fn new(name: &'static str, matcher: fn(&Reason) -> bool) -> Self {
        TypeTag { name, matcher }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn matches(&self, reason: &Reason) -> bool {
        (self.matcher)(reason)
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The declared error type of a rejection handler.
#[derive(Clone, Debug)]
pub enum Constraint {
    /// No constraint: every reason matches.
    Any,
    Named(TypeTag),
    /// Matches if any member matches.
    Union(Vec<Constraint>),
    /// Matches only if every member matches.
    Intersection(Vec<Constraint>),
}

impl Constraint {
    pub fn of<E: StdError + 'static>() -> Self {
        Constraint::Named(TypeTag::of::<E>())
    }

    /// Reduce the constraint to a flat filter over named types.
    ///
    /// Groups may only contain named types; a group inside a group (or `Any`
    /// inside a group) cannot be evaluated and is rejected.
    pub fn resolve(&self) -> Result<ErrorFilter, ConstraintError> {
        match self {
            Constraint::Any => Ok(ErrorFilter::any()),
            Constraint::Named(tag) => Ok(ErrorFilter::from(*tag)),
            Constraint::Union(members) => Ok(ErrorFilter {
                mode: Mode::Union,
                tags: named(members)?,
            }),
            Constraint::Intersection(members) => Ok(ErrorFilter {
                mode: Mode::Intersection,
                tags: named(members)?,
            }),
        }
    }
}

fn named(members: &[Constraint]) -> Result<Vec<TypeTag>, ConstraintError> {
    members
        .iter()
        .map(|member| match member {
            Constraint::Named(tag) => Ok(*tag),
            other => Err(ConstraintError::NestedGroup(format!("{:?}", other))),
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Union,
    Intersection,
}

/// A resolved [`Constraint`].
#[derive(Clone, Debug)]
pub struct ErrorFilter {
    mode: Mode,
    tags: Vec<TypeTag>,
}

impl ErrorFilter {
    /// Accepts every reason.
    pub fn any() -> Self {
        ErrorFilter {
            mode: Mode::Union,
            tags: Vec::new(),
        }
    }

    pub fn of<E: StdError + 'static>() -> Self {
        ErrorFilter::from(TypeTag::of::<E>())
    }

    pub fn matches(&self, reason: &Reason) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        match self.mode {
            Mode::Union => self.tags.iter().any(|tag| tag.matches(reason)),
            Mode::Intersection => self.tags.iter().all(|tag| tag.matches(reason)),
        }
    }
}

impl From<TypeTag> for ErrorFilter {
    fn from(tag: TypeTag) -> Self {
        ErrorFilter {
            mode: Mode::Union,
            tags: vec![tag],
        }
    }
}
