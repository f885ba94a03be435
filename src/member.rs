//! Module defining value-lazy member records.
//!
//! A [`Member`] is built once per module load from the AST and shared across
//! amendment chains; its body is evaluated on demand and memoized per
//! receiver by the object runtime.

use crate::ast::{Expr, ObjBody, Param};
use crate::dynamic::Value;
use crate::token::Span;
use crate::typecheck::TypeNode;
use crate::{Identifier, Shared, StaticVec};
use std::fmt;

/// Bit-flags holding a member's modifiers.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct Modifiers(u8);

impl Modifiers {
    /// No modifiers.
    pub const NONE: Self = Self(0);
    /// `abstract`
    pub const ABSTRACT: Self = Self(0b0000_0001);
    /// `open`
    pub const OPEN: Self = Self(0b0000_0010);
    /// `local`
    pub const LOCAL: Self = Self(0b0000_0100);
    /// `hidden`
    pub const HIDDEN: Self = Self(0b0000_1000);
    /// `fixed`
    pub const FIXED: Self = Self(0b0001_0000);
    /// `const`
    pub const CONST: Self = Self(0b0010_0000);
    /// `external`
    pub const EXTERNAL: Self = Self(0b0100_0000);

    /// Does this set contain all the flags in `other`?
    #[inline(always)]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
    /// Add the flags in `other`.
    #[inline(always)]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
    /// Is the set empty?
    #[inline(always)]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Self;

    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (flag, name) in [
            (Self::ABSTRACT, "abstract"),
            (Self::OPEN, "open"),
            (Self::LOCAL, "local"),
            (Self::HIDDEN, "hidden"),
            (Self::FIXED, "fixed"),
            (Self::CONST, "const"),
            (Self::EXTERNAL, "external"),
        ] {
            if self.contains(flag) {
                list.entry(&name);
            }
        }
        list.finish()
    }
}

/// What kind of member a record is.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MemberKind {
    /// A named property.
    Property,
    /// A method.
    Method,
    /// A keyed entry.
    Entry,
    /// An indexed element.
    Element,
    /// A `local` binding.
    Local,
    /// A member synthesized by the runtime, e.g. from a spread.
    Synthetic,
}

/// The compiled body of a member.
#[derive(Debug, Clone)]
pub enum MemberBody {
    /// An expression, evaluated with the reading receiver as `this`.
    Expr(Shared<Expr>),
    /// An object body: `name { ... }` amends the inherited value.
    Object(Shared<ObjBody>),
    /// A pre-evaluated constant value.
    Const(Value),
    /// A typed property declared without a value; reading it without an
    /// assignment along the chain is a missing-property error.
    Undefined,
}

/// A value-lazy member record.
#[derive(Debug, Clone)]
pub struct Member {
    /// The member kind.
    pub kind: MemberKind,
    /// Name for properties, methods and locals; entries and elements are
    /// keyed by the owning object instead.
    pub name: Option<Identifier>,
    /// Modifier flags.
    pub modifiers: Modifiers,
    /// Span of the header (name, key or `function` signature).
    pub header_span: Span,
    /// Span of the body.
    pub body_span: Span,
    /// Annotation expressions attached to the declaration.
    pub annotations: StaticVec<Expr>,
    /// Declared type, enforced on every read.
    pub ty: Option<Shared<TypeNode>>,
    /// Parameters, for methods.
    pub params: StaticVec<Param>,
    /// The compiled body.
    pub body: MemberBody,
    /// Number of frame slots captured at the definition point. Non-zero for
    /// members defined under `for` generators or inside lambdas: their
    /// bodies restore that many slots before running.
    pub frame_depth: u16,
    /// Doc-comment text.
    pub doc: Option<String>,
}

impl Member {
    /// Create a member record with no modifiers, type or parameters.
    #[must_use]
    pub fn new(kind: MemberKind, name: Option<Identifier>, body: MemberBody, span: Span) -> Self {
        Self {
            kind,
            name,
            modifiers: Modifiers::NONE,
            header_span: span,
            body_span: span,
            annotations: StaticVec::new(),
            ty: None,
            params: StaticVec::new(),
            body,
            frame_depth: 0,
            doc: None,
        }
    }

    /// A synthetic member holding a constant value, used when spreading
    /// already-evaluated collections into an object.
    #[must_use]
    pub fn synthetic(value: Value, span: Span) -> Shared<Self> {
        Shared::new(Self::new(
            MemberKind::Synthetic,
            None,
            MemberBody::Const(value),
            span,
        ))
    }

    /// Is this member `local`?
    #[inline(always)]
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.kind == MemberKind::Local || self.modifiers.contains(Modifiers::LOCAL)
    }
    /// Is this member `hidden`?
    #[inline(always)]
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.modifiers.contains(Modifiers::HIDDEN)
    }
    /// Is this member `const`?
    #[inline(always)]
    #[must_use]
    pub fn is_const(&self) -> bool {
        self.modifiers.contains(Modifiers::CONST)
    }
    /// Is this member `fixed`?
    #[inline(always)]
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.modifiers.contains(Modifiers::FIXED)
    }

    /// The member's name, or a placeholder for unnamed members.
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<member>")
    }
}
