//! Module containing error definitions for the evaluation process.

use crate::error_parsing::ParseError;
use crate::token::Span;
use crate::{StaticVec, INT};
use std::fmt;
use thiserror::Error;

/// Evaluation result.
pub type EvalResult = Result<crate::dynamic::Value, Box<EvalError>>;

/// The kind of an evaluation error.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Lexer or parser failure surfaced during module load.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// A value was rejected at a typed slot, binding, annotation or operator.
    #[error("expected value of type `{expected}`, but got type `{actual}`")]
    TypeMismatch {
        /// The rendered expected type.
        expected: String,
        /// The actual value's type name.
        actual: String,
    },
    /// A type constraint expression evaluated to false.
    #[error("type constraint `{constraint}` violated by value `{value}`")]
    ConstraintViolated {
        /// Source form of the constraint.
        constraint: String,
        /// Rendered offending value.
        value: String,
    },
    /// Read of a property that is not defined anywhere in the chain.
    #[error("cannot find property `{name}`")]
    MissingProperty {
        /// The property name.
        name: String,
    },
    /// Read of an entry key that is not defined anywhere in the chain.
    #[error("cannot find entry `{key}`")]
    MissingEntry {
        /// The rendered key.
        key: String,
    },
    /// Unqualified name that resolves to nothing.
    #[error("cannot resolve name `{name}`")]
    UnresolvedName {
        /// The name.
        name: String,
    },
    /// The same key was defined twice in one object literal.
    #[error("duplicate definition of member `{key}`")]
    DuplicateDefinition {
        /// The rendered key.
        key: String,
    },
    /// Amendment of a `const` or `fixed` slot.
    #[error("cannot amend `{modifier}` property `{name}`")]
    ModifierViolation {
        /// `const` or `fixed`.
        modifier: &'static str,
        /// The property name.
        name: String,
    },
    /// Amendment of a listing index outside `[0, length)`.
    #[error("element index {index} is out of range 0..{length}")]
    ListingIndexOutOfRange {
        /// The offending index.
        index: INT,
        /// The listing length.
        length: usize,
    },
    /// A typed object was amended with a property its class does not declare.
    #[error("class `{class}` does not declare property `{name}`")]
    NoSuchTypedProperty {
        /// The class name.
        class: String,
        /// The property name.
        name: String,
    },
    /// A listing or mapping literal declared a property other than `default`
    /// or a `local`.
    #[error("a {variant} cannot contain property `{name}`")]
    PropertyNotAllowed {
        /// The parent variant name.
        variant: &'static str,
        /// The property name.
        name: String,
    },
    /// A member kind that the parent variant forbids, e.g. an element in a
    /// mapping.
    #[error("a {variant} cannot contain {kind}")]
    MemberKindNotAllowed {
        /// The parent variant name.
        variant: &'static str,
        /// Description of the rejected member kind.
        kind: &'static str,
    },
    /// Amendment of a function or method with extra parameters.
    #[error("cannot amend function `{name}` with additional parameters")]
    FunctionAmendParams {
        /// The function name.
        name: String,
    },
    /// Spread of an incompatible source into a parent.
    #[error("cannot spread value of type `{source_type}` into {parent}")]
    SpreadRejected {
        /// The parent variant name.
        parent: &'static str,
        /// The source type name.
        source_type: String,
    },
    /// Spread of `null` without the `...?` form.
    #[error("cannot spread `null`")]
    SpreadNull,
    /// `for` over a value that is not iterable.
    #[error("cannot iterate over value of type `{type_name}`")]
    CannotIterate {
        /// The value's type name.
        type_name: String,
    },
    /// Re-entrant evaluation of a member: a circular reference.
    #[error("circular reference")]
    CircularReference,
    /// Subscript out of bounds on a list or listing.
    #[error("index {index} is out of bounds (length {length})")]
    IndexOutOfBounds {
        /// The offending index.
        index: INT,
        /// The container length.
        length: usize,
    },
    /// Map or mapping subscript with an absent key.
    #[error("cannot find key `{key}`")]
    KeyNotFound {
        /// The rendered key.
        key: String,
    },
    /// `!!` applied to `null`.
    #[error("expected a non-null value")]
    NonNullAsserted,
    /// A value that is not a function was called.
    #[error("cannot call value of type `{type_name}`")]
    NotCallable {
        /// The value's type name.
        type_name: String,
    },
    /// A function was called with the wrong number of arguments.
    #[error("expected {expected} argument(s), but got {actual}")]
    WrongArity {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },
    /// Arithmetic failure: overflow, division by zero.
    #[error("{0}")]
    Arithmetic(String),
    /// An operator was applied to operands it does not accept.
    #[error("operator `{op}` cannot be applied to `{lhs}` and `{rhs}`")]
    InvalidOperands {
        /// Operator source form.
        op: &'static str,
        /// Left operand type.
        lhs: String,
        /// Right operand type.
        rhs: String,
    },
    /// A `throw(...)` expression.
    #[error("{0}")]
    Thrown(String),
    /// A module URI was rejected by the security policy.
    #[error("module `{uri}` is not allowed by the security policy")]
    ModuleNotAllowed {
        /// The offending URI.
        uri: String,
    },
    /// A module could not be resolved.
    #[error("cannot find module `{uri}`")]
    ModuleNotFound {
        /// The offending URI.
        uri: String,
    },
    /// A resource read failed.
    #[error("cannot read resource `{uri}`: {message}")]
    ResourceError {
        /// The resource URI.
        uri: String,
        /// Underlying failure.
        message: String,
    },
    /// An `output.files` path spec is invalid.
    #[error("invalid output path `{path}`: {reason}")]
    InvalidOutputPath {
        /// The offending path spec.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Two output path specs resolve to the same file.
    #[error("output path `{path}` is produced more than once")]
    OutputPathConflict {
        /// The conflicting path.
        path: String,
    },
    /// Evaluation exceeded the configured operation budget.
    #[error("too many operations")]
    TooManyOperations,
    /// Evaluation nesting exceeded the configured call depth.
    #[error("call stack overflow")]
    StackOverflow,
}

/// One synthetic stack frame inserted for error provenance: which generator
/// body, amendment or typed slot the error travelled through.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Human-readable call target, e.g. a member name or `for` header.
    pub target: String,
    /// Header span of the frame's definition site.
    pub span: Span,
}

/// A structured evaluation error: primary span, message kind, optional
/// hints, and the inserted stack frames collected while propagating.
#[derive(Debug, Clone)]
pub struct EvalError {
    kind: ErrorKind,
    span: Span,
    hints: StaticVec<String>,
    trace: Vec<StackFrame>,
}

impl EvalError {
    /// Create a new error at a span.
    #[inline]
    #[must_use]
    pub fn new(kind: ErrorKind, span: Span) -> Box<Self> {
        Box::new(Self {
            kind,
            span,
            hints: StaticVec::new(),
            trace: Vec::new(),
        })
    }

    /// The error kind.
    #[inline(always)]
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
    /// The primary span.
    #[inline(always)]
    #[must_use]
    pub fn span(&self) -> Span {
        self.span
    }
    /// The hints attached to this error.
    #[inline(always)]
    #[must_use]
    pub fn hints(&self) -> &[String] {
        &self.hints
    }
    /// The inserted stack frames, innermost first.
    #[inline(always)]
    #[must_use]
    pub fn trace(&self) -> &[StackFrame] {
        &self.trace
    }

    /// Attach a hint.
    #[inline]
    #[must_use]
    pub fn with_hint(mut self: Box<Self>, hint: impl Into<String>) -> Box<Self> {
        self.hints.push(hint.into());
        self
    }
    /// Insert a stack frame while propagating outwards.
    #[inline]
    #[must_use]
    pub fn with_frame(mut self: Box<Self>, target: impl Into<String>, span: Span) -> Box<Self> {
        self.trace.push(StackFrame {
            target: target.into(),
            span,
        });
        self
    }
    /// Fill in the span if the error has none yet.
    #[inline]
    #[must_use]
    pub fn at(mut self: Box<Self>, span: Span) -> Box<Self> {
        if self.span.is_none() {
            self.span = span;
        }
        self
    }

    /// Can a union-type check recover from this error by trying the next
    /// alternative? Only type mismatches and constraint violations are
    /// recoverable; resource limits and genuine runtime failures are not.
    #[inline]
    #[must_use]
    pub fn is_type_recoverable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::TypeMismatch { .. } | ErrorKind::ConstraintViolated { .. }
        )
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)?;
        if !self.span.is_none() {
            write!(f, " ({})", self.span)?;
        }
        for hint in self.hints.iter() {
            write!(f, "\nhint: {}", hint)?;
        }
        for frame in &self.trace {
            write!(f, "\nat {} ({})", frame.target, frame.span)?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {}

impl From<ParseError> for Box<EvalError> {
    #[inline]
    fn from(err: ParseError) -> Self {
        EvalError::new(ErrorKind::Syntax(err.kind().to_string()), err.span())
    }
}
