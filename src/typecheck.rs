//! Module defining runtime type nodes.
//!
//! A [`TypeNode`] both checks and, where the language allows it, coerces a
//! value: an `Int` is accepted and widened wherever a `Float` is expected.

use crate::ast::{Expr, Ident};
use crate::dynamic::Value;
use crate::engine::EvalCtx;
use crate::error::{ErrorKind, EvalError};
use crate::immutable_string::ImmutableString;
use crate::object::ObjVariant;
use crate::scope::Frame;
use crate::token::Span;
use crate::{Shared, StaticVec};
use std::fmt;

/// A constraint expression attached to a `Constrained` type, with its source
/// form for diagnostics.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// The compiled constraint expression; evaluated with the checked value
    /// bound to `this`.
    pub expr: Shared<Expr>,
    /// The constraint's source text.
    pub text: ImmutableString,
    /// Source location.
    pub span: Span,
}

/// A runtime type.
#[derive(Debug, Clone)]
pub enum TypeNode {
    /// `unknown` - accepts anything.
    Unknown,
    /// `nothing` - rejects everything.
    Nothing,
    /// `module` - accepts only the defining module object.
    ModuleTy,
    /// A string-constant type, e.g. `"json"`.
    StringConstant(ImmutableString),
    /// A declared type: a built-in or class name with optional arguments.
    Declared {
        /// The type name.
        name: Ident,
        /// Type arguments, e.g. the `Int` in `List<Int>`.
        args: StaticVec<Shared<TypeNode>>,
    },
    /// `T?` - accepts `null` or `T`.
    Nullable(Shared<TypeNode>),
    /// `T(expr, ...)` - `T` plus boolean constraints over `this`.
    Constrained {
        /// The base type.
        base: Shared<TypeNode>,
        /// The constraints, all of which must hold.
        constraints: StaticVec<Constraint>,
    },
    /// `A|B|...` - alternatives tried in order.
    Union(StaticVec<Shared<TypeNode>>),
    /// `(A, B) -> R` - a function type.
    Function {
        /// Parameter types.
        params: StaticVec<Shared<TypeNode>>,
        /// Return type.
        ret: Shared<TypeNode>,
    },
}

impl fmt::Display for TypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Nothing => f.write_str("nothing"),
            Self::ModuleTy => f.write_str("module"),
            Self::StringConstant(s) => write!(f, "\"{}\"", s),
            Self::Declared { name, args } => {
                f.write_str(name.as_str())?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        fmt::Display::fmt(arg, f)?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
            Self::Nullable(inner) => write!(f, "{}?", inner),
            Self::Constrained { base, constraints } => {
                fmt::Display::fmt(base, f)?;
                f.write_str("(")?;
                for (i, c) in constraints.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&c.text)?;
                }
                f.write_str(")")
            }
            Self::Union(alts) => {
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    fmt::Display::fmt(alt, f)?;
                }
                Ok(())
            }
            Self::Function { params, ret } => {
                f.write_str("(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt::Display::fmt(p, f)?;
                }
                write!(f, ") -> {}", ret)
            }
        }
    }
}

impl TypeNode {
    /// Shorthand for a declared type with no arguments.
    #[must_use]
    pub fn declared(name: impl Into<crate::Identifier>, span: Span) -> Self {
        Self::Declared {
            name: Ident::new(name, span),
            args: StaticVec::new(),
        }
    }

    fn mismatch(&self, value: &Value, span: Span) -> Box<EvalError> {
        EvalError::new(
            ErrorKind::TypeMismatch {
                expected: self.to_string(),
                actual: value.type_name().to_string(),
            },
            span,
        )
    }

    /// Check `value` against this type, returning the (possibly coerced)
    /// value on success.
    ///
    /// `span` is the location blamed on mismatch, normally the value
    /// expression's span.
    pub fn check(
        &self,
        value: Value,
        ctx: &mut EvalCtx<'_>,
        span: Span,
    ) -> Result<Value, Box<EvalError>> {
        match self {
            Self::Unknown => Ok(value),
            Self::Nothing => Err(self.mismatch(&value, span)),
            Self::ModuleTy => match &value {
                Value::Object(obj) if Shared::ptr_eq(obj, ctx.module()) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            Self::StringConstant(expected) => match &value {
                Value::Str(s) if s == expected => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            Self::Declared { name, args } => self.check_declared(name, args, value, ctx, span),
            Self::Nullable(inner) => {
                if value.is_null() {
                    Ok(value)
                } else {
                    inner.check(value, ctx, span)
                }
            }
            Self::Constrained { base, constraints } => {
                let value = base.check(value, ctx, span)?;
                for constraint in constraints.iter() {
                    let holds = ctx.eval_constraint(&constraint.expr, &value)?;
                    if !holds {
                        return Err(EvalError::new(
                            ErrorKind::ConstraintViolated {
                                constraint: constraint.text.to_string(),
                                value: value.to_string(),
                            },
                            span,
                        )
                        .with_frame("type constraint", constraint.span));
                    }
                }
                Ok(value)
            }
            Self::Union(alts) => {
                for alt in alts.iter() {
                    match alt.check(value.clone(), ctx, span) {
                        Ok(ok) => return Ok(ok),
                        Err(err) if err.is_type_recoverable() => continue,
                        Err(err) => return Err(err),
                    }
                }
                Err(self.mismatch(&value, span))
            }
            Self::Function { params, ret: _ } => match &value {
                Value::Func(func) if func.arity == params.len() => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
        }
    }

    fn check_declared(
        &self,
        name: &Ident,
        args: &[Shared<TypeNode>],
        value: Value,
        ctx: &mut EvalCtx<'_>,
        span: Span,
    ) -> Result<Value, Box<EvalError>> {
        match name.as_str() {
            "Any" => Ok(value),
            "Null" => match value {
                Value::Null => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            "Boolean" => match value {
                Value::Bool(_) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            "Int" => match value {
                Value::Int(_) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            "Float" => match value {
                Value::Float(_) => Ok(value),
                // Ints widen to floats.
                Value::Int(n) => Ok(Value::Float((n as crate::FLOAT).into())),
                _ => Err(self.mismatch(&value, span)),
            },
            "Number" => match value {
                Value::Int(_) | Value::Float(_) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            "String" => match value {
                Value::Str(_) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            "IntSeq" => match value {
                Value::IntSeq(_) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            "Bytes" => match value {
                Value::Bytes(_) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            "Function" => match value {
                Value::Func(_) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
            "List" | "Set" => {
                let ok = matches!(
                    (&value, name.as_str()),
                    (Value::List(_), "List") | (Value::Set(_), "Set")
                );
                if !ok {
                    return Err(self.mismatch(&value, span));
                }
                if let Some(elem_ty) = args.first() {
                    let items = match &value {
                        Value::List(items) | Value::Set(items) => items.clone(),
                        _ => unreachable!("matched above"),
                    };
                    for item in items.iter() {
                        elem_ty.check(item.clone(), ctx, span)?;
                    }
                }
                Ok(value)
            }
            "Map" => match &value {
                Value::Map(map) => {
                    if args.len() == 2 {
                        let map = map.clone();
                        for (k, v) in map.iter() {
                            args[0].check(k.value().clone(), ctx, span)?;
                            args[1].check(v.clone(), ctx, span)?;
                        }
                    }
                    Ok(value)
                }
                _ => Err(self.mismatch(&value, span)),
            },
            "Dynamic" | "Listing" | "Mapping" | "Typed" | "Module" => match &value {
                Value::Object(obj) => {
                    let ok = match (name.as_str(), obj.variant()) {
                        ("Dynamic", ObjVariant::Dynamic) => true,
                        ("Listing", ObjVariant::Listing) => true,
                        ("Mapping", ObjVariant::Mapping) => true,
                        ("Typed", ObjVariant::Typed(_)) => true,
                        ("Module", ObjVariant::Module) => true,
                        _ => false,
                    };
                    if !ok {
                        return Err(self.mismatch(&value, span));
                    }
                    if let Some(elem_ty) = args.first() {
                        self.check_object_members(obj, elem_ty, args.get(1), ctx, span)?;
                    }
                    Ok(value)
                }
                _ => Err(self.mismatch(&value, span)),
            },
            // A class name: resolve through the module's class registry and
            // walk the value's class ancestry.
            class_name => match &value {
                Value::Object(obj) if ctx.object_is_class_instance(obj, class_name) => Ok(value),
                _ => Err(self.mismatch(&value, span)),
            },
        }
    }

    /// Check element/entry types of a listing or mapping by forcing and
    /// checking every member value.
    fn check_object_members(
        &self,
        obj: &Shared<crate::object::Obj>,
        first_ty: &Shared<TypeNode>,
        second_ty: Option<&Shared<TypeNode>>,
        ctx: &mut EvalCtx<'_>,
        span: Span,
    ) -> Result<(), Box<EvalError>> {
        let keys = obj.visible_keys();
        for key in keys {
            let value = ctx.read_member(obj, &key, span)?;
            match (obj.variant(), second_ty) {
                // Mapping<K, V> checks the key with the first argument.
                (ObjVariant::Mapping, Some(value_ty)) => {
                    first_ty.check(key.to_value(), ctx, span)?;
                    value_ty.check(value, ctx, span)?;
                }
                _ => {
                    first_ty.check(value, ctx, span)?;
                }
            }
        }
        Ok(())
    }

    /// Check `value` and write it into `slot` of `frame`.
    ///
    /// Used for `for`-bindings and call parameters. On failure the error
    /// gains an inserted stack frame naming the binding.
    pub fn check_and_bind(
        &self,
        frame: &mut Frame,
        slot: u16,
        name: &str,
        value: Value,
        ctx: &mut EvalCtx<'_>,
        span: Span,
    ) -> Result<(), Box<EvalError>> {
        match self.check(value, ctx, span) {
            Ok(value) => {
                frame.push_at(slot, value);
                Ok(())
            }
            Err(err) => Err(err.with_frame(format!("binding of `{}`", name), span)),
        }
    }
}
