//! # Pkl - embedded configuration language for Rust
//!
//! An evaluation engine for a configuration language built around typed
//! objects, amendment and lazy members: object literals amend their parents,
//! members evaluate on demand with late-bound `this` and `super`, and object
//! bodies may contain `for`/`when` generators, spreads and member
//! predicates.
//!
//! # A Quick Example
//!
//! ```no_run
//! use pkl::{Engine, EvalError, INT};
//!
//! fn main() -> Result<(), Box<EvalError>> {
//!     let engine = Engine::new();
//!
//!     let module = engine.load_module_str(
//!         "example",
//!         r#"
//!         base = new Listing { 1; 2 }
//!         doubled = (base) { for (n in List(3, 4)) { n * 10 } }
//!         "#,
//!     )?;
//!
//!     assert_eq!(
//!         engine.eval_expression_in(&module, "doubled[3]")?.as_int(),
//!         Some(40)
//!     );
//!     Ok(())
//! }
//! ```

// Internal modules

mod ast;
mod dynamic;
mod engine;
mod error;
mod error_parsing;
mod generate;
mod immutable_string;
mod member;
mod module;
mod object;
mod output;
mod parse;
mod scope;
mod stdlib;
mod test_runner;
mod token;
mod typecheck;

/// The system integer type. It is defined as [`i64`].
pub type INT = i64;

/// The system floating-point type. It is defined as [`f64`].
pub type FLOAT = f64;

pub use ast::{
    BinaryOp, CallExpr, ClassDecl, Expr, ExtendsOrAmends, FnLiteral, Ident, ImportDecl, LetExpr,
    MemberNode, ModuleAst, ModuleDecl, NewExpr, ObjBody, Param, ReadMode, StringSegment,
    TypeAliasDecl,
};
pub use dynamic::{FloatWrapper, FromValue, FuncImpl, FuncValue, IntSeq, Key, Value, ValueMap};
pub use engine::{Engine, EvalCtx};
pub use error::{ErrorKind, EvalError, EvalResult, StackFrame};
pub use error_parsing::{LexError, ParseError, ParseErrorKind};
pub use immutable_string::ImmutableString;
pub use member::{Member, MemberBody, MemberKind, Modifiers};
pub use module::{
    AllowAllPolicy, FileModuleResolver, ModuleResolver, SchemePolicy, SecurityPolicy,
    StaticModuleResolver, MODULE_SCHEMES,
};
pub use object::{
    CacheSlot, ClassDef, MemberKey, MemberTable, ModuleInfo, Obj, ObjVariant, ObjectData,
    PredicateRec,
};
pub use output::{
    Renderer, TextRenderer, EXIT_ERROR, EXIT_FORMAT_VIOLATIONS, EXIT_OK,
    EXIT_TESTS_WROTE_EXAMPLES,
};
pub use parse::{parse_expression_source, parse_module_source};
pub use scope::Frame;
pub use test_runner::{
    junit_suites, AssertResult, ExampleOutcome, ExampleResult, FactResult, TestReport,
};
pub use token::{Lexer, Span, SpannedToken, Token};
pub use typecheck::{Constraint, TypeNode};

/// An identifier. [`SmartString`](https://crates.io/crates/smartstring) is
/// used because most identifiers are ASCII and short, so they can be stored
/// inline.
pub(crate) type Identifier = SmartString;

pub(crate) type SmartString = smartstring::SmartString<smartstring::Compact>;

/// Alias to [`Rc`][std::rc::Rc]: evaluation of a module graph is
/// single-threaded, so values share structure without atomics.
pub type Shared<T> = std::rc::Rc<T>;

/// Alias to [`smallvec::SmallVec<[T; 4]>`](https://crates.io/crates/smallvec):
/// a [`Vec`] backed by a small, inline, fixed-size array when there are <= 4
/// items stored. Used for the many short lists the evaluator keeps - call
/// arguments, string segments, hints.
pub(crate) type StaticVec<T> = smallvec::SmallVec<[T; 4]>;
