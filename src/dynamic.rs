//! Dynamic value types for the evaluation engine.

use crate::ast::FnLiteral;
use crate::error::EvalResult;
use crate::immutable_string::ImmutableString;
use crate::object::Obj;
use crate::scope::Frame;
use crate::token::Span;
use crate::{Identifier, Shared, FLOAT, INT};
use num_traits::Zero;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Insertion-ordered map used for `Map` values and mapping entries.
pub type ValueMap = indexmap::IndexMap<Key, Value, ahash::RandomState>;

/// A type that wraps a floating-point number and implements [`Hash`].
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub struct FloatWrapper(FLOAT);

impl Hash for FloatWrapper {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ne_bytes().hash(state);
    }
}

impl From<FLOAT> for FloatWrapper {
    #[inline(always)]
    fn from(value: FLOAT) -> Self {
        Self(value)
    }
}

impl std::ops::Deref for FloatWrapper {
    type Target = FLOAT;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for FloatWrapper {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abs = self.0.abs();
        if abs != 0.0 && (abs > Self::MAX_NATURAL_FLOAT_FOR_DISPLAY || abs < Self::MIN_NATURAL_FLOAT_FOR_DISPLAY)
        {
            write!(f, "{:e}", self.0)
        } else {
            fmt::Display::fmt(&self.0, f)?;
            if abs.fract().is_zero() && self.0.is_finite() {
                f.write_str(".0")?;
            }
            Ok(())
        }
    }
}

impl FloatWrapper {
    /// Maximum float for natural display before switching to scientific notation.
    pub const MAX_NATURAL_FLOAT_FOR_DISPLAY: FLOAT = 10_000_000_000_000.0;
    /// Minimum float for natural display before switching to scientific notation.
    pub const MIN_NATURAL_FLOAT_FOR_DISPLAY: FLOAT = 0.000_000_000_000_1;

    /// Create a new [`FloatWrapper`].
    #[inline(always)]
    #[must_use]
    pub const fn new(value: FLOAT) -> Self {
        Self(value)
    }
    /// The wrapped value.
    #[inline(always)]
    #[must_use]
    pub const fn get(self) -> FLOAT {
        self.0
    }
}

/// An arithmetic sequence of integers: `start`, `start + step`, ... up to and
/// including `end` when the step lands on it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct IntSeq {
    /// First value.
    pub start: INT,
    /// Inclusive bound.
    pub end: INT,
    /// Step, never zero. May be negative.
    pub step: INT,
}

impl IntSeq {
    /// Number of values in the sequence. A step pointing away from `end`
    /// yields an empty sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.step > 0 && self.start <= self.end {
            ((self.end - self.start) / self.step + 1) as usize
        } else if self.step < 0 && self.start >= self.end {
            ((self.start - self.end) / (-self.step) + 1) as usize
        } else {
            0
        }
    }
    /// Is the sequence empty?
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The `i`-th value.
    #[inline(always)]
    #[must_use]
    pub fn get(&self, i: usize) -> INT {
        self.start + (i as INT) * self.step
    }
    /// Iterate the values in order.
    pub fn iter(&self) -> impl Iterator<Item = INT> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// How a function value is implemented.
#[derive(Clone)]
pub enum FuncImpl {
    /// A function literal from source, with its captured frame and
    /// definition-site receiver/owner for late-bound `this`.
    Script {
        /// The compiled literal.
        ast: Shared<FnLiteral>,
        /// Snapshot of the defining frame, restored on call.
        captured: Frame,
        /// `this` at the definition site.
        receiver: Option<Shared<Obj>>,
        /// Owner object at the definition site.
        owner: Option<Shared<Obj>>,
    },
    /// A built-in function.
    Native(fn(&crate::engine::Engine, &[Value], Span) -> EvalResult),
}

/// A function value: a lambda, a method pulled off an object, or a built-in.
pub struct FuncValue {
    /// Function name for diagnostics; anonymous lambdas have none.
    pub name: Option<Identifier>,
    /// Declared parameter count.
    pub arity: usize,
    /// Implementation.
    pub imp: FuncImpl,
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Function({}/{})", name, self.arity),
            None => write!(f, "Function(<anonymous>/{})", self.arity),
        }
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// `null`
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(INT),
    /// A float.
    Float(FloatWrapper),
    /// A string.
    Str(ImmutableString),
    /// An immutable list.
    List(Shared<Vec<Value>>),
    /// An immutable set with insertion order.
    Set(Shared<Vec<Value>>),
    /// An immutable insertion-ordered map.
    Map(Shared<ValueMap>),
    /// An integer sequence.
    IntSeq(IntSeq),
    /// A byte string.
    Bytes(Shared<Vec<u8>>),
    /// An object: dynamic, listing, mapping, typed or prototype.
    Object(Shared<Obj>),
    /// A function value.
    Func(Shared<FuncValue>),
}

impl Default for Value {
    #[inline(always)]
    fn default() -> Self {
        Self::Null
    }
}

impl Value {
    /// Name of the value's type, for diagnostics and `is` checks on
    /// built-in types.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Boolean",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Str(_) => "String",
            Self::List(_) => "List",
            Self::Set(_) => "Set",
            Self::Map(_) => "Map",
            Self::IntSeq(_) => "IntSeq",
            Self::Bytes(_) => "Bytes",
            Self::Object(obj) => obj.variant_name(),
            Self::Func(_) => "Function",
        }
    }

    /// Is this `null`?
    #[inline(always)]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The boolean payload, if this is a boolean.
    #[inline(always)]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
    /// The integer payload, if this is an integer.
    #[inline(always)]
    #[must_use]
    pub const fn as_int(&self) -> Option<INT> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
    /// The numeric payload widened to float, if this is a number.
    #[inline(always)]
    #[must_use]
    pub fn as_float(&self) -> Option<FLOAT> {
        match self {
            Self::Int(n) => Some(*n as FLOAT),
            Self::Float(f) => Some(f.get()),
            _ => None,
        }
    }
    /// The string payload, if this is a string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
    /// The object payload, if this is an object.
    #[inline]
    #[must_use]
    pub fn as_object(&self) -> Option<&Shared<Obj>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Value equality. Primitives, lists, sets, maps, sequences and byte
    /// strings compare structurally; objects and functions compare by
    /// identity. Numbers compare across `Int`/`Float`.
    #[must_use]
    pub fn value_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.get() == b.get(),
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                (*a as FLOAT) == b.get()
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Set(a), Self::Set(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.value_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map_or(false, |w| v.value_eq(w)))
            }
            (Self::IntSeq(a), Self::IntSeq(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Shared::ptr_eq(a, b),
            (Self::Func(a), Self::Func(b)) => Shared::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => fmt::Display::fmt(b, f),
            Self::Int(n) => fmt::Display::fmt(n, f),
            Self::Float(x) => fmt::Display::fmt(x, f),
            Self::Str(s) => fmt::Display::fmt(s, f),
            Self::List(items) => {
                f.write_str("List(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt::Display::fmt(item, f)?;
                }
                f.write_str(")")
            }
            Self::Set(items) => {
                f.write_str("Set(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt::Display::fmt(item, f)?;
                }
                f.write_str(")")
            }
            Self::Map(map) => {
                f.write_str("Map(")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}, {}", k.0, v)?;
                }
                f.write_str(")")
            }
            Self::IntSeq(seq) => write!(f, "IntSeq({}, {}, {})", seq.start, seq.end, seq.step),
            Self::Bytes(bytes) => write!(f, "Bytes(<{} bytes>)", bytes.len()),
            Self::Object(obj) => write!(f, "{}", obj),
            Self::Func(func) => write!(f, "{:?}", func),
        }
    }
}

impl From<bool> for Value {
    #[inline(always)]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
impl From<INT> for Value {
    #[inline(always)]
    fn from(value: INT) -> Self {
        Self::Int(value)
    }
}
impl From<FLOAT> for Value {
    #[inline(always)]
    fn from(value: FLOAT) -> Self {
        Self::Float(value.into())
    }
}
impl From<&str> for Value {
    #[inline(always)]
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}
impl From<String> for Value {
    #[inline(always)]
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}
impl From<ImmutableString> for Value {
    #[inline(always)]
    fn from(value: ImmutableString) -> Self {
        Self::Str(value)
    }
}
impl From<Vec<Value>> for Value {
    #[inline(always)]
    fn from(value: Vec<Value>) -> Self {
        Self::List(value.into())
    }
}
impl From<ValueMap> for Value {
    #[inline(always)]
    fn from(value: ValueMap) -> Self {
        Self::Map(value.into())
    }
}

/// A [`Value`] usable as a map or member key: hashable and comparable.
///
/// Objects and functions hash by identity; aggregates hash structurally.
#[derive(Debug, Clone)]
pub struct Key(pub Value);

impl Key {
    /// The wrapped value.
    #[inline(always)]
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for Key {
    #[inline(always)]
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl PartialEq for Key {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.0.value_eq(&other.0)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Null => 0_u8.hash(state),
            Value::Bool(b) => {
                1_u8.hash(state);
                b.hash(state);
            }
            // Numbers hash through float bits so that `1` and `1.0` collide,
            // matching `value_eq`.
            Value::Int(n) => {
                2_u8.hash(state);
                (*n as FLOAT).to_bits().hash(state);
            }
            Value::Float(x) => {
                2_u8.hash(state);
                x.get().to_bits().hash(state);
            }
            Value::Str(s) => {
                3_u8.hash(state);
                s.as_str().hash(state);
            }
            Value::List(items) | Value::Set(items) => {
                4_u8.hash(state);
                items.len().hash(state);
                for item in items.iter() {
                    Key(item.clone()).hash(state);
                }
            }
            Value::Map(map) => {
                5_u8.hash(state);
                map.len().hash(state);
            }
            Value::IntSeq(seq) => {
                6_u8.hash(state);
                seq.hash(state);
            }
            Value::Bytes(bytes) => {
                7_u8.hash(state);
                bytes.hash(state);
            }
            Value::Object(obj) => {
                8_u8.hash(state);
                (Shared::as_ptr(obj) as usize).hash(state);
            }
            Value::Func(func) => {
                9_u8.hash(state);
                (Shared::as_ptr(func) as usize).hash(state);
            }
        }
    }
}

impl fmt::Display for Key {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Conversion from a [`Value`] into a host type, used by the typed
/// evaluation API.
pub trait FromValue: Sized {
    /// Attempt the conversion, returning the original value on mismatch.
    fn from_value(value: Value) -> Result<Self, Value>;
}

impl FromValue for Value {
    #[inline(always)]
    fn from_value(value: Value) -> Result<Self, Value> {
        Ok(value)
    }
}

impl FromValue for bool {
    #[inline]
    fn from_value(value: Value) -> Result<Self, Value> {
        value.as_bool().ok_or(value)
    }
}

impl FromValue for INT {
    #[inline]
    fn from_value(value: Value) -> Result<Self, Value> {
        value.as_int().ok_or(value)
    }
}

impl FromValue for FLOAT {
    #[inline]
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Float(x) => Ok(x.get()),
            Value::Int(n) => Ok(n as FLOAT),
            other => Err(other),
        }
    }
}

impl FromValue for String {
    #[inline]
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Str(s) => Ok(s.as_str().to_string()),
            other => Err(other),
        }
    }
}

impl FromValue for ImmutableString {
    #[inline]
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(other),
        }
    }
}
