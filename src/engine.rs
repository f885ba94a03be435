//! Module defining the evaluation [`Engine`] and the expression evaluator.

use crate::ast::{BinaryOp, Expr, MemberNode, ModuleAst, Param, ReadMode, StringSegment};
use crate::dynamic::{FromValue, FuncImpl, FuncValue, Key, Value, ValueMap};
use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::member::{Member, MemberBody, MemberKind};
use crate::module::{AllowAllPolicy, ModuleResolver, SecurityPolicy, StaticModuleResolver};
use crate::object::{
    BuildHasher, CacheSlot, ClassDef, MemberKey, ModuleInfo, Obj, ObjVariant, ObjectData,
};
use crate::output::{Renderer, TextRenderer};
use crate::parse::{parse_expression_source, parse_module_source};
use crate::scope::Frame;
use crate::token::Span;
use crate::{Identifier, Shared, StaticVec, FLOAT, INT};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Default maximum call/member nesting depth.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// The configuration-language evaluation engine.
///
/// An `Engine` owns the module resolver, security policy, renderer and
/// resource limits; module evaluation itself is per-call state.
pub struct Engine {
    max_call_depth: usize,
    max_operations: u64,
    resolver: Box<dyn ModuleResolver>,
    policy: Box<dyn SecurityPolicy>,
    renderer: Box<dyn Renderer>,
    /// Base-module globals: value constructors and prototypes.
    globals: HashMap<Identifier, Value, BuildHasher>,
    /// Prototypes for the built-in object variants.
    proto_dynamic: Shared<Obj>,
    proto_listing: Shared<Obj>,
    proto_mapping: Shared<Obj>,
    /// Loaded modules keyed by URI.
    module_cache: RefCell<HashMap<String, Shared<Obj>, BuildHasher>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create a new [`Engine`] with the standard value constructors
    /// registered and an empty static module resolver.
    #[must_use]
    pub fn new() -> Self {
        let mut engine = Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_operations: 0,
            resolver: Box::new(StaticModuleResolver::new()),
            policy: Box::new(AllowAllPolicy),
            renderer: Box::new(TextRenderer),
            globals: HashMap::default(),
            proto_dynamic: Obj::prototype(ObjVariant::Dynamic),
            proto_listing: Obj::prototype(ObjVariant::Listing),
            proto_mapping: Obj::prototype(ObjVariant::Mapping),
            module_cache: RefCell::new(HashMap::default()),
        };
        crate::stdlib::register(&mut engine);
        engine
    }

    /// Set the maximum member/call nesting depth.
    pub fn set_max_call_depth(&mut self, depth: usize) -> &mut Self {
        self.max_call_depth = depth;
        self
    }
    /// Set the maximum number of evaluation operations (0 = unlimited).
    pub fn set_max_operations(&mut self, ops: u64) -> &mut Self {
        self.max_operations = ops;
        self
    }
    /// Set the module resolver.
    pub fn set_module_resolver(&mut self, resolver: impl ModuleResolver + 'static) -> &mut Self {
        self.resolver = Box::new(resolver);
        self
    }
    /// Set the security policy.
    pub fn set_security_policy(&mut self, policy: impl SecurityPolicy + 'static) -> &mut Self {
        self.policy = Box::new(policy);
        self
    }
    /// Set the output renderer.
    pub fn set_renderer(&mut self, renderer: impl Renderer + 'static) -> &mut Self {
        self.renderer = Box::new(renderer);
        self
    }
    /// The active renderer.
    #[inline(always)]
    #[must_use]
    pub(crate) fn renderer(&self) -> &dyn Renderer {
        &*self.renderer
    }

    /// Register a global value under a name in the base scope.
    pub fn register_global(&mut self, name: impl Into<Identifier>, value: Value) -> &mut Self {
        self.globals.insert(name.into(), value);
        self
    }
    /// Register a native function in the base scope.
    pub fn register_fn(
        &mut self,
        name: &str,
        arity: usize,
        f: fn(&Engine, &[Value], Span) -> EvalResult,
    ) -> &mut Self {
        let func = FuncValue {
            name: Some(name.into()),
            arity,
            imp: FuncImpl::Native(f),
        };
        self.globals
            .insert(name.into(), Value::Func(Shared::new(func)));
        self
    }

    /// The prototype for a built-in variant.
    #[must_use]
    pub(crate) fn proto(&self, variant: &ObjVariant) -> Shared<Obj> {
        match variant {
            ObjVariant::Listing => self.proto_listing.clone(),
            ObjVariant::Mapping => self.proto_mapping.clone(),
            _ => self.proto_dynamic.clone(),
        }
    }

    /// Pre-seed the module cache, e.g. with synthetic standard-library
    /// modules.
    pub(crate) fn cache_module(&self, uri: &str, module: Shared<Obj>) {
        self.module_cache
            .borrow_mut()
            .insert(uri.to_string(), module);
    }

    // ------------------------------------------------------------------
    // Public evaluation API
    // ------------------------------------------------------------------

    /// Parse a module without evaluating it.
    pub fn compile(&self, source: &str) -> Result<ModuleAst, crate::error_parsing::ParseError> {
        parse_module_source(source)
    }

    /// Load a module from source text under a given name.
    pub fn load_module_str(&self, name: &str, source: &str) -> Result<Shared<Obj>, Box<EvalError>> {
        tracing::debug!(module = name, "loading module from source");
        let ast = parse_module_source(source)?;
        self.instantiate_module(&ast, name, None, source)
    }

    /// Load a module through the resolver and security policy.
    pub fn load_module(&self, uri: &str) -> Result<Shared<Obj>, Box<EvalError>> {
        if let Some(cached) = self.module_cache.borrow().get(uri) {
            return Ok(cached.clone());
        }
        if !self.policy.allows_module(uri) {
            return Err(EvalError::new(
                ErrorKind::ModuleNotAllowed {
                    uri: uri.to_string(),
                },
                Span::NONE,
            ));
        }
        tracing::debug!(uri, "resolving module");
        let source = self.resolver.resolve_module(uri).map_err(|message| {
            EvalError::new(
                ErrorKind::ModuleNotFound {
                    uri: uri.to_string(),
                },
                Span::NONE,
            )
            .with_hint(message)
        })?;
        let ast = parse_module_source(&source)?;
        let module = self.instantiate_module(&ast, uri, Some(uri.to_string()), &source)?;
        self.cache_module(uri, module.clone());
        Ok(module)
    }

    /// Load every module a glob pattern matches, as a map of URI to module
    /// object. Matching is delegated to the resolver; each match still goes
    /// through the security policy.
    pub fn load_module_glob(&self, pattern: &str) -> Result<ValueMap, Box<EvalError>> {
        let mut modules = ValueMap::default();
        for uri in self.resolver.glob_modules(pattern) {
            let module = self.load_module(&uri)?;
            modules.insert(Key(Value::Str(uri.into())), Value::Object(module));
        }
        Ok(modules)
    }

    /// Evaluate an expression against a module.
    pub fn eval_expression_in(&self, module: &Shared<Obj>, source: &str) -> EvalResult {
        let expr = parse_expression_source(source)?;
        let mut ctx = EvalCtx::new_root(self, module.clone());
        ctx.eval_expr(&expr)
    }

    /// Evaluate an expression against an empty module and convert the result.
    pub fn eval_expression<T: FromValue>(&self, source: &str) -> Result<T, Box<EvalError>> {
        let module = self.load_module_str("repl", "")?;
        let value = self.eval_expression_in(&module, source)?;
        T::from_value(value).map_err(|value| {
            EvalError::new(
                ErrorKind::TypeMismatch {
                    expected: std::any::type_name::<T>().to_string(),
                    actual: value.type_name().to_string(),
                },
                Span::NONE,
            )
        })
    }

    /// Read a property of a module or object by name, evaluating it.
    pub fn read_property(&self, obj: &Shared<Obj>, name: &str) -> EvalResult {
        let module = obj.clone();
        let mut ctx = EvalCtx::new_root(self, module);
        ctx.read_member(obj, &MemberKey::Name(name.into()), Span::NONE)
    }

    // ------------------------------------------------------------------
    // Module instantiation
    // ------------------------------------------------------------------

    fn instantiate_module(
        &self,
        ast: &ModuleAst,
        fallback_name: &str,
        uri: Option<String>,
        source: &str,
    ) -> Result<Shared<Obj>, Box<EvalError>> {
        let mut info = ModuleInfo::default();
        info.name = ast
            .name()
            .map(Identifier::from)
            .unwrap_or_else(|| fallback_name.into());
        info.uri = uri;
        info.source = source.to_string();

        // Imports load first; they are visible to everything below. A glob
        // import binds a map of URI to module under its alias.
        for import in ast.imports.iter() {
            let value = if import.glob {
                Value::Map(Shared::new(self.load_module_glob(&import.uri)?))
            } else {
                Value::Object(self.load_module(&import.uri)?)
            };
            info.imports.insert(import.alias.name.clone(), value);
        }

        // Classes: resolve ancestry within this module, then build the
        // definition records and their prototypes.
        for class in &ast.classes {
            let parent = match &class.parent {
                Some(parent_name) => {
                    let found = info.classes.get(parent_name.name.as_str()).cloned();
                    match found {
                        Some(parent) => Some(parent),
                        None => {
                            return Err(EvalError::new(
                                ErrorKind::UnresolvedName {
                                    name: parent_name.as_str().to_string(),
                                },
                                parent_name.span,
                            ))
                        }
                    }
                }
                None => None,
            };
            let mut members = indexmap::IndexMap::default();
            for member in &class.members {
                let name = member.name.clone().unwrap_or_else(|| "<member>".into());
                members.insert(name, member.clone());
            }
            let def = Shared::new(ClassDef {
                name: class.name.name.clone(),
                parent,
                is_open: class.is_open,
                is_abstract: class.is_abstract,
                members,
                span: class.span,
            });
            info.classes.insert(class.name.name.clone(), def);
        }

        for alias in &ast.aliases {
            info.aliases.insert(alias.name.name.clone(), alias.ty.clone());
        }

        // An `amends`/`extends` clause makes the parent module this
        // module's amendment parent.
        let parent = match ast.decl.as_ref().and_then(|d| d.clause.as_ref()) {
            Some(crate::ast::ExtendsOrAmends::Amends(uri, _))
            | Some(crate::ast::ExtendsOrAmends::Extends(uri, _)) => Some(self.load_module(uri)?),
            None => None,
        };

        // The module body holds only properties, methods and locals, so no
        // generator node needs eager evaluation here.
        let mut data = ObjectData::default();
        for node in &ast.body.members {
            let (key, member) = match node {
                MemberNode::Property(m) | MemberNode::Method(m) | MemberNode::Local(m) => (
                    MemberKey::Name(m.name.clone().unwrap_or_else(|| "<member>".into())),
                    m.clone(),
                ),
                other => {
                    return Err(EvalError::new(
                        ErrorKind::MemberKindNotAllowed {
                            variant: "Module",
                            kind: "this member kind",
                        },
                        other.span(),
                    ))
                }
            };
            if data.members.insert(key.clone(), member).is_some() {
                return Err(EvalError::new(
                    ErrorKind::DuplicateDefinition {
                        key: key.to_string(),
                    },
                    node.span(),
                ));
            }
        }

        Ok(Obj::module(data, info, parent))
    }
}

/// Walk the lexical chain to the enclosing module object.
fn module_of(obj: &Shared<Obj>) -> Option<Shared<Obj>> {
    let mut cursor = obj.clone();
    loop {
        if cursor.module_info().is_some() {
            return Some(cursor);
        }
        let next = cursor.lexical().cloned()?;
        cursor = next;
    }
}

/// The per-evaluation context: receiver, owner, frame and limits.
pub struct EvalCtx<'e> {
    engine: &'e Engine,
    module: Shared<Obj>,
    receiver: Shared<Obj>,
    owner: Shared<Obj>,
    /// The live frame of parameters, `let`- and `for`-bindings.
    pub(crate) frame: Frame,
    /// When set, `this` evaluates to this value instead of the receiver;
    /// used for type constraints and member predicates.
    this_override: Option<Value>,
    depth: usize,
    ops: Shared<Cell<u64>>,
}

impl<'e> EvalCtx<'e> {
    /// A root context over a module object.
    #[must_use]
    pub fn new_root(engine: &'e Engine, module: Shared<Obj>) -> Self {
        Self {
            engine,
            receiver: module.clone(),
            owner: module.clone(),
            module,
            frame: Frame::new(),
            this_override: None,
            depth: 0,
            ops: Shared::new(Cell::new(0)),
        }
    }

    /// A nested context for evaluating a member body.
    fn child(&self, receiver: Shared<Obj>, owner: Shared<Obj>, frame: Frame) -> EvalCtx<'e> {
        let module = module_of(&owner).unwrap_or_else(|| self.module.clone());
        EvalCtx {
            engine: self.engine,
            module,
            receiver,
            owner,
            frame,
            this_override: None,
            depth: self.depth + 1,
            ops: self.ops.clone(),
        }
    }

    /// The engine this context evaluates under.
    #[inline(always)]
    #[must_use]
    pub fn engine(&self) -> &'e Engine {
        self.engine
    }
    /// The enclosing module object.
    #[inline(always)]
    #[must_use]
    pub fn module(&self) -> &Shared<Obj> {
        &self.module
    }
    /// The current receiver (`this`).
    #[inline(always)]
    #[must_use]
    pub fn receiver(&self) -> &Shared<Obj> {
        &self.receiver
    }
    /// The current owner.
    #[inline(always)]
    #[must_use]
    pub fn owner(&self) -> &Shared<Obj> {
        &self.owner
    }

    fn guard(&mut self, span: Span) -> Result<(), Box<EvalError>> {
        if self.depth > self.engine.max_call_depth {
            return Err(EvalError::new(ErrorKind::StackOverflow, span));
        }
        let max = self.engine.max_operations;
        if max > 0 {
            let ops = self.ops.get() + 1;
            self.ops.set(ops);
            if ops > max {
                return Err(EvalError::new(ErrorKind::TooManyOperations, span));
            }
        }
        Ok(())
    }

    /// Does the value's class ancestry include `class_name`?
    #[must_use]
    pub fn object_is_class_instance(&self, obj: &Shared<Obj>, class_name: &str) -> bool {
        obj.class().map_or(false, |c| c.is_subclass_of(class_name))
    }

    /// Evaluate a type-constraint expression with `this` bound to `value`.
    pub fn eval_constraint(
        &mut self,
        expr: &Expr,
        value: &Value,
    ) -> Result<bool, Box<EvalError>> {
        let saved = self.this_override.replace(value.clone());
        let result = self.eval_expr(expr);
        self.this_override = saved;
        match result? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::new(
                ErrorKind::TypeMismatch {
                    expected: "Boolean".to_string(),
                    actual: other.type_name().to_string(),
                },
                expr.span(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Member reads
    // ------------------------------------------------------------------

    /// Read a member of `receiver` by key, memoizing per `(receiver, key)`
    /// and detecting re-entrant evaluation.
    pub fn read_member(
        &mut self,
        receiver: &Shared<Obj>,
        key: &MemberKey,
        span: Span,
    ) -> EvalResult {
        match receiver.cache_get(key) {
            Some(CacheSlot::Done(value)) => return Ok(value),
            Some(CacheSlot::InProgress) => {
                return Err(EvalError::new(ErrorKind::CircularReference, span))
            }
            None => (),
        }

        receiver.cache_begin(key);
        let result = self.read_member_uncached(receiver, key, span);
        match result {
            Ok(value) => {
                receiver.cache_done(key, value.clone());
                Ok(value)
            }
            Err(err) => {
                receiver.cache_cancel(key);
                Err(err)
            }
        }
    }

    fn read_member_uncached(
        &mut self,
        receiver: &Shared<Obj>,
        key: &MemberKey,
        span: Span,
    ) -> EvalResult {
        let mut value = match Obj::lookup(receiver, key) {
            Some((owner, member)) => self
                .eval_member_in(receiver, &owner, key, &member)
                .map_err(|err| {
                    err.with_frame(
                        format!("member `{}`", key),
                        member.header_span,
                    )
                })?,
            None => self.read_default(receiver, key, span)?,
        };

        // Typed records enforce the class-declared property type on every
        // read, including reads of overriding amendments.
        if let (ObjVariant::Typed(class), MemberKey::Name(name)) =
            (receiver.variant().clone(), key)
        {
            if let Some(declared) = class.find_member(name) {
                if let Some(ty) = declared.ty.clone() {
                    value = ty.check(value, self, span).map_err(|err| {
                        err.with_frame(
                            format!("declared property `{}`", name),
                            declared.header_span,
                        )
                    })?;
                }
            }
        }

        // Member predicates: deferred amendments applied to element and
        // entry values, rootmost object first.
        if matches!(key, MemberKey::Index(_) | MemberKey::Key(_)) {
            for obj in Obj::chain(receiver) {
                for rec in obj.own_predicates() {
                    let saved_frame = std::mem::replace(&mut self.frame, rec.frame.clone());
                    let matched = self.eval_constraint(&rec.pred, &value);
                    let matched = match matched {
                        Ok(m) => m,
                        Err(err) => {
                            self.frame = saved_frame;
                            return Err(
                                err.with_frame("member predicate", rec.member.header_span)
                            );
                        }
                    };
                    if matched {
                        let applied =
                            self.apply_member_over(&rec.member, value.clone(), receiver, &obj);
                        value = match applied {
                            Ok(v) => v,
                            Err(err) => {
                                self.frame = saved_frame;
                                return Err(
                                    err.with_frame("member predicate", rec.member.header_span)
                                );
                            }
                        };
                    }
                    self.frame = saved_frame;
                }
            }
        }

        Ok(value)
    }

    /// No member found: fall back to the chain's `default` function.
    fn read_default(
        &mut self,
        receiver: &Shared<Obj>,
        key: &MemberKey,
        span: Span,
    ) -> EvalResult {
        if let Some((owner, member)) = Obj::default_member(receiver) {
            let default = self.eval_member_in(receiver, &owner, &MemberKey::Name("default".into()), &member)?;
            return match default {
                Value::Func(func) => self.call_func(&func, &[key.to_value()], span),
                other => Ok(other),
            };
        }
        Err(match key {
            MemberKey::Name(name) => EvalError::new(
                ErrorKind::MissingProperty {
                    name: name.to_string(),
                },
                span,
            ),
            _ => EvalError::new(
                ErrorKind::MissingEntry {
                    key: key.to_string(),
                },
                span,
            ),
        })
    }

    /// Evaluate a member's body with late-bound `this`, without touching the
    /// cache. `owner` is the defining object.
    fn eval_member_in(
        &mut self,
        receiver: &Shared<Obj>,
        owner: &Shared<Obj>,
        key: &MemberKey,
        member: &Shared<Member>,
    ) -> EvalResult {
        self.guard(member.header_span)?;

        // Methods read as bound function values.
        if member.kind == MemberKind::Method {
            return Ok(self.bind_method(receiver, owner, member));
        }

        match &member.body {
            MemberBody::Const(value) => Ok(value.clone()),
            MemberBody::Undefined => Err(EvalError::new(
                ErrorKind::MissingProperty {
                    name: member.display_name().to_string(),
                },
                member.header_span,
            )),
            MemberBody::Expr(expr) => {
                let frame = owner.stored_frame(key).unwrap_or_default();
                let mut child = self.child(receiver.clone(), owner.clone(), frame);
                let value = child.eval_expr(expr)?;
                match &member.ty {
                    Some(ty) => ty.check(value, &mut child, expr.span()),
                    None => Ok(value),
                }
            }
            MemberBody::Object(body) => {
                // `name { ... }` amends the inherited value, or starts from
                // scratch when nothing is inherited.
                let inherited = self.read_super_value(receiver, owner, key, member)?;
                let frame = owner.stored_frame(key).unwrap_or_default();
                let mut child = self.child(receiver.clone(), owner.clone(), frame);
                let value =
                    crate::generate::instantiate(&mut child, inherited, body, member.header_span)?;
                match &member.ty {
                    Some(ty) => ty.check(value, &mut child, member.header_span),
                    None => Ok(value),
                }
            }
        }
    }

    /// The value a `{ ... }`-bodied member amends: the nearest definition
    /// above `owner`, or a fresh empty parent when there is none.
    fn read_super_value(
        &mut self,
        receiver: &Shared<Obj>,
        owner: &Shared<Obj>,
        key: &MemberKey,
        member: &Shared<Member>,
    ) -> EvalResult {
        match Obj::lookup_super(owner, key) {
            Some((super_owner, super_member)) => {
                self.eval_member_in(receiver, &super_owner, key, &super_member)
            }
            None => {
                // Typed properties with a declared object type start from
                // that variant's prototype; everything else from Dynamic.
                let proto = match member.ty.as_deref() {
                    Some(crate::typecheck::TypeNode::Declared { name, .. }) => {
                        match name.as_str() {
                            "Listing" => self.engine.proto(&ObjVariant::Listing),
                            "Mapping" => self.engine.proto(&ObjVariant::Mapping),
                            _ => self.engine.proto(&ObjVariant::Dynamic),
                        }
                    }
                    _ => self.engine.proto(&ObjVariant::Dynamic),
                };
                Ok(Value::Object(proto))
            }
        }
    }

    /// Apply an amendment member over an existing value: an expression body
    /// replaces it, an object body amends it.
    pub(crate) fn apply_member_over(
        &mut self,
        member: &Shared<Member>,
        current: Value,
        receiver: &Shared<Obj>,
        owner: &Shared<Obj>,
    ) -> EvalResult {
        match &member.body {
            MemberBody::Expr(expr) => {
                let saved = self.this_override.replace(current);
                let mut child = self.child(receiver.clone(), owner.clone(), self.frame.clone());
                child.this_override = self.this_override.clone();
                let result = child.eval_expr(expr);
                self.this_override = saved;
                result
            }
            MemberBody::Object(body) => {
                crate::generate::instantiate(self, current, body, member.header_span)
            }
            MemberBody::Const(value) => Ok(value.clone()),
            MemberBody::Undefined => Ok(current),
        }
    }

    /// Package a method member as a bound function value.
    fn bind_method(
        &self,
        receiver: &Shared<Obj>,
        owner: &Shared<Obj>,
        member: &Shared<Member>,
    ) -> Value {
        let body = match &member.body {
            MemberBody::Expr(expr) => expr.clone(),
            // Methods always carry expression bodies.
            _ => Shared::new(Expr::Null(member.body_span)),
        };
        let literal = crate::ast::FnLiteral {
            params: member.params.clone(),
            frame_depth: member.frame_depth,
            body: (*body).clone(),
        };
        Value::Func(Shared::new(FuncValue {
            name: member.name.clone(),
            arity: member.params.len(),
            imp: FuncImpl::Script {
                ast: Shared::new(literal),
                captured: owner
                    .stored_frame(&MemberKey::Name(
                        member.name.clone().unwrap_or_else(|| "<member>".into()),
                    ))
                    .unwrap_or_default(),
                receiver: Some(receiver.clone()),
                owner: Some(owner.clone()),
            },
        }))
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Call a function value.
    pub fn call_func(
        &mut self,
        func: &Shared<FuncValue>,
        args: &[Value],
        span: Span,
    ) -> EvalResult {
        self.guard(span)?;
        // Native functions may be variadic and validate their own arguments.
        if !matches!(func.imp, FuncImpl::Native(_)) && func.arity != args.len() {
            return Err(EvalError::new(
                ErrorKind::WrongArity {
                    expected: func.arity,
                    actual: args.len(),
                },
                span,
            )
            .with_frame(
                format!(
                    "call to `{}`",
                    func.name.as_deref().unwrap_or("<anonymous>")
                ),
                span,
            ));
        }
        match &func.imp {
            FuncImpl::Native(f) => f(self.engine, args, span),
            FuncImpl::Script {
                ast,
                captured,
                receiver,
                owner,
            } => {
                let mut frame = captured.clone();
                let receiver = receiver.clone().unwrap_or_else(|| self.receiver.clone());
                let owner = owner.clone().unwrap_or_else(|| self.owner.clone());
                let mut child = self.child(receiver, owner, Frame::new());
                for (param, arg) in ast.params.iter().zip(args.iter()) {
                    self.bind_param(&mut child, &mut frame, param, arg.clone(), span)?;
                }
                child.frame = frame;
                child.eval_expr(&ast.body)
            }
        }
    }

    fn bind_param(
        &mut self,
        child: &mut EvalCtx<'e>,
        frame: &mut Frame,
        param: &Param,
        arg: Value,
        span: Span,
    ) -> Result<(), Box<EvalError>> {
        match &param.ty {
            Some(ty) => ty.check_and_bind(frame, param.slot, param.name.as_str(), arg, child, span),
            None => {
                frame.push_at(param.slot, arg);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expression evaluation
    // ------------------------------------------------------------------

    /// Evaluate an expression.
    pub fn eval_expr(&mut self, expr: &Expr) -> EvalResult {
        self.guard(expr.span())?;
        match expr {
            Expr::Null(_) => Ok(Value::Null),
            Expr::BoolConstant(b, _) => Ok(Value::Bool(*b)),
            Expr::IntConstant(n, _) => Ok(Value::Int(*n)),
            Expr::FloatConstant(f, _) => Ok(Value::Float(*f)),
            Expr::StringConstant(s, _) => Ok(Value::Str(s.clone())),
            Expr::InterpolatedString(segments, _) => self.eval_interpolated(segments),
            Expr::This(_) => Ok(match &self.this_override {
                Some(value) => value.clone(),
                None => Value::Object(self.receiver.clone()),
            }),
            Expr::Outer(_) => {
                let outer = self
                    .owner
                    .lexical()
                    .cloned()
                    .unwrap_or_else(|| self.module.clone());
                Ok(Value::Object(outer))
            }
            Expr::ModuleRef(_) => Ok(Value::Object(self.module.clone())),
            Expr::Ident(ident) => self.resolve_ident(ident.as_str(), ident.span),
            Expr::Slot(slot, ident) => match self.frame.get(*slot) {
                Some(value) => Ok(value.clone()),
                None => Err(EvalError::new(
                    ErrorKind::UnresolvedName {
                        name: ident.as_str().to_string(),
                    },
                    ident.span,
                )),
            },
            Expr::Paren(inner, _) => self.eval_expr(inner),
            Expr::Dot(parts, null_safe, span) => {
                let (lhs_expr, name) = (&parts.0, &parts.1);
                let lhs = self.eval_expr(lhs_expr)?;
                if lhs.is_null() && *null_safe {
                    return Ok(Value::Null);
                }
                self.read_property_of(lhs, name.as_str(), *span)
            }
            Expr::Index(parts, span) => {
                let target = self.eval_expr(&parts.0)?;
                let index = self.eval_expr(&parts.1)?;
                self.read_index_of(target, index, *span)
            }
            Expr::SuperDot(name, span) => {
                let key = MemberKey::Name(name.name.clone());
                self.read_super_member(&key, *span)
            }
            Expr::SuperIndex(key_expr, span) => {
                let key_value = self.eval_expr(key_expr)?;
                let key = MemberKey::from_value(key_value);
                self.read_super_member(&key, *span)
            }
            Expr::NonNull(inner, span) => {
                let value = self.eval_expr(inner)?;
                if value.is_null() {
                    Err(EvalError::new(ErrorKind::NonNullAsserted, *span))
                } else {
                    Ok(value)
                }
            }
            Expr::Neg(inner, span) => {
                let value = self.eval_expr(inner)?;
                match value {
                    Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(|| {
                        EvalError::new(
                            ErrorKind::Arithmetic("integer overflow in negation".to_string()),
                            *span,
                        )
                    }),
                    Value::Float(f) => Ok(Value::Float((-f.get()).into())),
                    other => Err(EvalError::new(
                        ErrorKind::InvalidOperands {
                            op: "-",
                            lhs: other.type_name().to_string(),
                            rhs: String::new(),
                        },
                        *span,
                    )),
                }
            }
            Expr::Not(inner, span) => {
                let value = self.eval_expr(inner)?;
                match value {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(EvalError::new(
                        ErrorKind::TypeMismatch {
                            expected: "Boolean".to_string(),
                            actual: other.type_name().to_string(),
                        },
                        *span,
                    )),
                }
            }
            Expr::Binary(op, parts, span) => self.eval_binary(*op, &parts.0, &parts.1, *span),
            Expr::If(parts, _) => {
                let cond = self.eval_expr(&parts.0)?;
                match cond {
                    Value::Bool(true) => self.eval_expr(&parts.1),
                    Value::Bool(false) => self.eval_expr(&parts.2),
                    other => Err(EvalError::new(
                        ErrorKind::TypeMismatch {
                            expected: "Boolean".to_string(),
                            actual: other.type_name().to_string(),
                        },
                        parts.0.span(),
                    )),
                }
            }
            Expr::Let(binding, _) => {
                let value = self.eval_expr(&binding.value)?;
                match &binding.ty {
                    Some(ty) => {
                        let checked = ty.check(value, self, binding.value.span())?;
                        self.frame.push_at(binding.slot, checked);
                    }
                    None => self.frame.push_at(binding.slot, value),
                }
                let result = self.eval_expr(&binding.body);
                self.frame.truncate(binding.slot);
                result
            }
            Expr::Lambda(literal, _) => Ok(Value::Func(Shared::new(FuncValue {
                name: None,
                arity: literal.params.len(),
                imp: FuncImpl::Script {
                    ast: Shared::new((**literal).clone()),
                    captured: self.frame.snapshot(literal.frame_depth),
                    receiver: Some(self.receiver.clone()),
                    owner: Some(self.owner.clone()),
                },
            }))),
            Expr::Call(call, span) => self.eval_call(call, *span),
            Expr::New(new_expr, span) => {
                let parent = self.new_parent(new_expr.ty.as_deref(), *span)?;
                crate::generate::instantiate(self, parent, &new_expr.body, *span)
            }
            Expr::Amend(parts, span) => {
                let parent = self.eval_expr(&parts.0)?;
                if let Value::Func(func) = &parent {
                    return Err(EvalError::new(
                        ErrorKind::FunctionAmendParams {
                            name: func
                                .name
                                .as_deref()
                                .unwrap_or("<anonymous>")
                                .to_string(),
                        },
                        *span,
                    ));
                }
                crate::generate::instantiate(self, parent, &parts.1, *span)
            }
            Expr::Is(parts, span) => {
                let value = self.eval_expr(&parts.0)?;
                match parts.1.check(value, self, *span) {
                    Ok(_) => Ok(Value::Bool(true)),
                    Err(err) if err.is_type_recoverable() => Ok(Value::Bool(false)),
                    Err(err) => Err(err),
                }
            }
            Expr::As(parts, span) => {
                let value = self.eval_expr(&parts.0)?;
                parts.1.check(value, self, *span)
            }
            Expr::Throw(inner, span) => {
                let value = self.eval_expr(inner)?;
                Err(EvalError::new(ErrorKind::Thrown(value.to_string()), *span))
            }
            Expr::Trace(inner, span) => {
                let value = self.eval_expr(inner)?;
                let source = *span;
                tracing::debug!(value = %value, span = %source, "trace");
                Ok(value)
            }
            Expr::ImportValue(uri, glob, span) => {
                if *glob {
                    let modules = self
                        .engine
                        .load_module_glob(uri)
                        .map_err(|err| err.at(*span))?;
                    return Ok(Value::Map(Shared::new(modules)));
                }
                let module = self
                    .engine
                    .load_module(uri)
                    .map_err(|err| err.at(*span))?;
                Ok(Value::Object(module))
            }
            Expr::ReadValue(uri_expr, mode, span) => self.eval_read(uri_expr, *mode, *span),
        }
    }

    fn eval_interpolated(
        &mut self,
        segments: &StaticVec<StringSegment>,
    ) -> EvalResult {
        let mut out = String::new();
        for segment in segments.iter() {
            match segment {
                StringSegment::Literal(text) => out.push_str(text),
                StringSegment::Interpolated(expr) => {
                    let value = self.eval_expr(expr)?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(Value::Str(out.into()))
    }

    /// Unqualified name resolution: receiver chain, lexically enclosing
    /// objects, module imports/classes, then base-module globals.
    fn resolve_ident(&mut self, name: &str, span: Span) -> EvalResult {
        let key = MemberKey::Name(name.into());

        if Obj::lookup(&self.receiver, &key).is_some() {
            let receiver = self.receiver.clone();
            return self.read_member(&receiver, &key, span);
        }

        let mut cursor = self.owner.lexical().cloned();
        while let Some(obj) = cursor {
            if Obj::lookup(&obj, &key).is_some() {
                return self.read_member(&obj, &key, span);
            }
            cursor = obj.lexical().cloned();
        }

        let module = self.module.clone();
        if !Shared::ptr_eq(&module, &self.receiver) && Obj::lookup(&module, &key).is_some() {
            return self.read_member(&module, &key, span);
        }
        if let Some(info) = module.module_info() {
            if let Some(value) = info.imports.get(name) {
                return Ok(value.clone());
            }
        }

        if let Some(value) = self.engine.globals.get(name) {
            return Ok(value.clone());
        }

        Err(EvalError::new(
            ErrorKind::UnresolvedName {
                name: name.to_string(),
            },
            span,
        ))
    }

    fn read_super_member(&mut self, key: &MemberKey, span: Span) -> EvalResult {
        let receiver = self.receiver.clone();
        match Obj::lookup_super(&self.owner.clone(), key) {
            Some((owner, member)) => self
                .eval_member_in(&receiver, &owner, key, &member)
                .map_err(|err| err.with_frame(format!("super member `{}`", key), span)),
            None => Err(EvalError::new(
                match key {
                    MemberKey::Name(name) => ErrorKind::MissingProperty {
                        name: name.to_string(),
                    },
                    _ => ErrorKind::MissingEntry {
                        key: key.to_string(),
                    },
                },
                span,
            )),
        }
    }

    /// `.name` on an arbitrary value.
    fn read_property_of(&mut self, value: Value, name: &str, span: Span) -> EvalResult {
        match &value {
            Value::Object(obj) => {
                let obj = obj.clone();
                let key = MemberKey::Name(name.into());
                if Obj::lookup(&obj, &key).is_none() {
                    // Built-in object properties shadow the `default`
                    // fallback but never a defined member.
                    match (name, obj.variant()) {
                        ("length", ObjVariant::Dynamic)
                        | ("length", ObjVariant::Listing) => {
                            return Ok(Value::Int(obj.length() as INT))
                        }
                        ("isEmpty", ObjVariant::Dynamic)
                        | ("isEmpty", ObjVariant::Listing) => {
                            return Ok(Value::Bool(obj.length() == 0))
                        }
                        ("isEmpty", ObjVariant::Mapping) => {
                            return Ok(Value::Bool(obj.visible_keys().is_empty()))
                        }
                        ("length", ObjVariant::Mapping) => {
                            return Ok(Value::Int(obj.visible_keys().len() as INT))
                        }
                        _ => (),
                    }
                }
                self.read_member(&obj, &key, span)
            }
            _ => crate::stdlib::builtin_property(&value, name).ok_or_else(|| {
                EvalError::new(
                    ErrorKind::MissingProperty {
                        name: name.to_string(),
                    },
                    span,
                )
            }),
        }
    }

    /// `[key]` on an arbitrary value.
    fn read_index_of(&mut self, target: Value, index: Value, span: Span) -> EvalResult {
        match &target {
            Value::Object(obj) => {
                let obj = obj.clone();
                self.read_member(&obj, &MemberKey::from_value(index), span)
            }
            Value::List(items) | Value::Set(items) => match index {
                Value::Int(i) if i >= 0 && (i as usize) < items.len() => {
                    Ok(items[i as usize].clone())
                }
                Value::Int(i) => Err(EvalError::new(
                    ErrorKind::IndexOutOfBounds {
                        index: i,
                        length: items.len(),
                    },
                    span,
                )),
                other => Err(EvalError::new(
                    ErrorKind::TypeMismatch {
                        expected: "Int".to_string(),
                        actual: other.type_name().to_string(),
                    },
                    span,
                )),
            },
            Value::Map(map) => {
                let key = Key(index);
                map.get(&key).cloned().ok_or_else(|| {
                    EvalError::new(
                        ErrorKind::KeyNotFound {
                            key: key.to_string(),
                        },
                        span,
                    )
                })
            }
            Value::Bytes(bytes) => match index {
                Value::Int(i) if i >= 0 && (i as usize) < bytes.len() => {
                    Ok(Value::Int(bytes[i as usize] as INT))
                }
                Value::Int(i) => Err(EvalError::new(
                    ErrorKind::IndexOutOfBounds {
                        index: i,
                        length: bytes.len(),
                    },
                    span,
                )),
                other => Err(EvalError::new(
                    ErrorKind::TypeMismatch {
                        expected: "Int".to_string(),
                        actual: other.type_name().to_string(),
                    },
                    span,
                )),
            },
            other => Err(EvalError::new(
                ErrorKind::TypeMismatch {
                    expected: "an indexable value".to_string(),
                    actual: other.type_name().to_string(),
                },
                span,
            )),
        }
    }

    fn eval_call(&mut self, call: &crate::ast::CallExpr, span: Span) -> EvalResult {
        // Method-style calls dispatch through the receiver.
        if let Expr::Dot(parts, null_safe, _) = &call.target {
            let lhs = self.eval_expr(&parts.0)?;
            if lhs.is_null() && *null_safe {
                return Ok(Value::Null);
            }
            let mut args = Vec::with_capacity(call.args.len());
            for arg in call.args.iter() {
                args.push(self.eval_expr(arg)?);
            }
            return self.call_method_of(lhs, parts.1.as_str(), &args, span);
        }
        if let Expr::SuperDot(name, _) = &call.target {
            let key = MemberKey::Name(name.name.clone());
            let func = self.read_super_member(&key, span)?;
            let mut args = Vec::with_capacity(call.args.len());
            for arg in call.args.iter() {
                args.push(self.eval_expr(arg)?);
            }
            return match func {
                Value::Func(func) => self.call_func(&func, &args, span),
                other => Err(EvalError::new(
                    ErrorKind::NotCallable {
                        type_name: other.type_name().to_string(),
                    },
                    span,
                )),
            };
        }

        let target = self.eval_expr(&call.target)?;
        let mut args = Vec::with_capacity(call.args.len());
        for arg in call.args.iter() {
            args.push(self.eval_expr(arg)?);
        }
        match target {
            Value::Func(func) => self.call_func(&func, &args, span),
            other => Err(EvalError::new(
                ErrorKind::NotCallable {
                    type_name: other.type_name().to_string(),
                },
                span,
            )),
        }
    }

    /// Call `name(args)` on a value: an object method, a function-valued
    /// property, or a built-in method of a primitive.
    pub(crate) fn call_method_of(
        &mut self,
        target: Value,
        name: &str,
        args: &[Value],
        span: Span,
    ) -> EvalResult {
        if let Value::Object(obj) = &target {
            let obj = obj.clone();
            let key = MemberKey::Name(name.into());
            if Obj::lookup(&obj, &key).is_some() {
                let func = self.read_member(&obj, &key, span)?;
                return match func {
                    Value::Func(func) => self.call_func(&func, args, span),
                    other => Err(EvalError::new(
                        ErrorKind::NotCallable {
                            type_name: other.type_name().to_string(),
                        },
                        span,
                    )),
                };
            }
        }
        crate::stdlib::builtin_method(self, &target, name, args, span)
    }

    fn new_parent(
        &mut self,
        ty: Option<&crate::typecheck::TypeNode>,
        span: Span,
    ) -> EvalResult {
        use crate::typecheck::TypeNode;
        let proto = match ty {
            None => self.engine.proto(&ObjVariant::Dynamic),
            Some(TypeNode::Declared { name, .. }) => match name.as_str() {
                "Dynamic" => self.engine.proto(&ObjVariant::Dynamic),
                "Listing" => self.engine.proto(&ObjVariant::Listing),
                "Mapping" => self.engine.proto(&ObjVariant::Mapping),
                class_name => {
                    let module = self.module.clone();
                    let class = module
                        .module_info()
                        .and_then(|info| info.classes.get(class_name).cloned());
                    match class {
                        Some(class) => {
                            if class.is_abstract {
                                return Err(EvalError::new(
                                    ErrorKind::TypeMismatch {
                                        expected: "an instantiable class".to_string(),
                                        actual: format!("abstract class `{}`", class_name),
                                    },
                                    span,
                                ));
                            }
                            self.class_prototype(&class)
                        }
                        None => {
                            return Err(EvalError::new(
                                ErrorKind::UnresolvedName {
                                    name: class_name.to_string(),
                                },
                                name.span,
                            ))
                        }
                    }
                }
            },
            Some(other) => {
                return Err(EvalError::new(
                    ErrorKind::TypeMismatch {
                        expected: "an object type".to_string(),
                        actual: other.to_string(),
                    },
                    span,
                ))
            }
        };
        Ok(Value::Object(proto))
    }

    /// Build (or reuse) the prototype object of a class: its declared
    /// members over the parent class's prototype.
    fn class_prototype(&self, class: &Shared<ClassDef>) -> Shared<Obj> {
        let mut data = ObjectData::default();
        for (name, member) in &class.members {
            data.members
                .insert(MemberKey::Name(name.clone()), member.clone());
        }
        let parent = class.parent.as_ref().map(|p| self.class_prototype(p));
        let obj = Obj::from_data(
            ObjVariant::Typed(class.clone()),
            data,
            parent,
            Some(self.module.clone()),
        );
        obj
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, span: Span) -> EvalResult {
        // Short-circuiting operators first.
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let l = self.eval_expr(lhs)?;
                let l = l.as_bool().ok_or_else(|| {
                    EvalError::new(
                        ErrorKind::TypeMismatch {
                            expected: "Boolean".to_string(),
                            actual: l.type_name().to_string(),
                        },
                        lhs.span(),
                    )
                })?;
                if (op == BinaryOp::And && !l) || (op == BinaryOp::Or && l) {
                    return Ok(Value::Bool(l));
                }
                let r = self.eval_expr(rhs)?;
                return r.as_bool().map(Value::Bool).ok_or_else(|| {
                    EvalError::new(
                        ErrorKind::TypeMismatch {
                            expected: "Boolean".to_string(),
                            actual: r.type_name().to_string(),
                        },
                        rhs.span(),
                    )
                });
            }
            BinaryOp::NullCoalesce => {
                let l = self.eval_expr(lhs)?;
                return if l.is_null() { self.eval_expr(rhs) } else { Ok(l) };
            }
            BinaryOp::Pipe => {
                let l = self.eval_expr(lhs)?;
                let f = self.eval_expr(rhs)?;
                return match f {
                    Value::Func(func) => self.call_func(&func, &[l], span),
                    other => Err(EvalError::new(
                        ErrorKind::NotCallable {
                            type_name: other.type_name().to_string(),
                        },
                        rhs.span(),
                    )),
                };
            }
            _ => (),
        }

        let l = self.eval_expr(lhs)?;
        let r = self.eval_expr(rhs)?;

        match op {
            BinaryOp::Equals => return Ok(Value::Bool(l.value_eq(&r))),
            BinaryOp::NotEquals => return Ok(Value::Bool(!l.value_eq(&r))),
            _ => (),
        }

        let type_error = || {
            EvalError::new(
                ErrorKind::InvalidOperands {
                    op: op.syntax(),
                    lhs: l.type_name().to_string(),
                    rhs: r.type_name().to_string(),
                },
                span,
            )
        };
        let arith_error = |message: &str| {
            EvalError::new(ErrorKind::Arithmetic(message.to_string()), span)
        };

        match op {
            BinaryOp::Add => match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => a
                    .checked_add(*b)
                    .map(Value::Int)
                    .ok_or_else(|| arith_error("integer overflow in addition")),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(&*a + b.as_str())),
                (Value::List(a), Value::List(b)) => {
                    let mut out = a.as_ref().clone();
                    out.extend(b.iter().cloned());
                    Ok(Value::List(out.into()))
                }
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => Ok(Value::Float((a + b).into())),
                    _ => Err(type_error()),
                },
            },
            BinaryOp::Subtract => match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => a
                    .checked_sub(*b)
                    .map(Value::Int)
                    .ok_or_else(|| arith_error("integer overflow in subtraction")),
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => Ok(Value::Float((a - b).into())),
                    _ => Err(type_error()),
                },
            },
            BinaryOp::Multiply => match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => a
                    .checked_mul(*b)
                    .map(Value::Int)
                    .ok_or_else(|| arith_error("integer overflow in multiplication")),
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => Ok(Value::Float((a * b).into())),
                    _ => Err(type_error()),
                },
            },
            // `/` always produces a float; `~/` is truncating integer division.
            BinaryOp::Divide => match (l.as_float(), r.as_float()) {
                (Some(a), Some(b)) => {
                    if b == 0.0 {
                        Err(arith_error("division by zero"))
                    } else {
                        Ok(Value::Float((a / b).into()))
                    }
                }
                _ => Err(type_error()),
            },
            BinaryOp::IntDivide => match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => {
                    if *b == 0 {
                        Err(arith_error("division by zero"))
                    } else {
                        a.checked_div(*b)
                            .map(Value::Int)
                            .ok_or_else(|| arith_error("integer overflow in division"))
                    }
                }
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => {
                        if b == 0.0 {
                            Err(arith_error("division by zero"))
                        } else {
                            Ok(Value::Float((a / b).trunc().into()))
                        }
                    }
                    _ => Err(type_error()),
                },
            },
            BinaryOp::Modulo => match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => {
                    if *b == 0 {
                        Err(arith_error("division by zero"))
                    } else {
                        Ok(Value::Int(a.rem_euclid(*b)))
                    }
                }
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => Ok(Value::Float((a % b).into())),
                    _ => Err(type_error()),
                },
            },
            BinaryOp::Pow => match (&l, &r) {
                (Value::Int(a), Value::Int(b)) if *b >= 0 && *b <= u32::MAX as INT => a
                    .checked_pow(*b as u32)
                    .map(Value::Int)
                    .ok_or_else(|| arith_error("integer overflow in exponentiation")),
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => Ok(Value::Float(a.powf(b).into())),
                    _ => Err(type_error()),
                },
            },
            BinaryOp::LessThan
            | BinaryOp::LessThanEquals
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanEquals => {
                let ordering = match (&l, &r) {
                    (Value::Str(a), Value::Str(b)) => a.as_str().partial_cmp(b.as_str()),
                    _ => match (l.as_float(), r.as_float()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => None,
                    },
                };
                let ordering = ordering.ok_or_else(type_error)?;
                Ok(Value::Bool(match op {
                    BinaryOp::LessThan => ordering == std::cmp::Ordering::Less,
                    BinaryOp::LessThanEquals => ordering != std::cmp::Ordering::Greater,
                    BinaryOp::GreaterThan => ordering == std::cmp::Ordering::Greater,
                    _ => ordering != std::cmp::Ordering::Less,
                }))
            }
            _ => Err(type_error()),
        }
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    fn eval_read(&mut self, uri_expr: &Expr, mode: ReadMode, span: Span) -> EvalResult {
        let uri_value = self.eval_expr(uri_expr)?;
        let uri = match uri_value.as_str() {
            Some(uri) => uri.to_string(),
            None => {
                return Err(EvalError::new(
                    ErrorKind::TypeMismatch {
                        expected: "String".to_string(),
                        actual: uri_value.type_name().to_string(),
                    },
                    uri_expr.span(),
                ))
            }
        };
        if !self.engine.policy.allows_resource(&uri) {
            return Err(EvalError::new(
                ErrorKind::ModuleNotAllowed { uri },
                span,
            ));
        }
        match mode {
            ReadMode::Required => match self.engine.resolver.read_resource(&uri) {
                Ok(text) => Ok(Value::Str(text.into())),
                Err(message) => Err(EvalError::new(
                    ErrorKind::ResourceError { uri, message },
                    span,
                )),
            },
            ReadMode::OrNull => match self.engine.resolver.read_resource(&uri) {
                Ok(text) => Ok(Value::Str(text.into())),
                Err(_) => Ok(Value::Null),
            },
            ReadMode::Glob => {
                let mut map = ValueMap::default();
                for (matched_uri, text) in self.engine.resolver.glob_resources(&uri) {
                    map.insert(Key(Value::Str(matched_uri.into())), Value::Str(text.into()));
                }
                Ok(Value::Map(Shared::new(map)))
            }
        }
    }
}

/// Convert a value to a float-or-int pair for arithmetic; used by stdlib.
#[inline]
pub(crate) fn expect_int(value: &Value, span: Span) -> Result<INT, Box<EvalError>> {
    value.as_int().ok_or_else(|| {
        EvalError::new(
            ErrorKind::TypeMismatch {
                expected: "Int".to_string(),
                actual: value.type_name().to_string(),
            },
            span,
        )
    })
}

/// Widen a numeric value, used by stdlib.
#[inline]
#[allow(dead_code)]
pub(crate) fn expect_float(value: &Value, span: Span) -> Result<FLOAT, Box<EvalError>> {
    value.as_float().ok_or_else(|| {
        EvalError::new(
            ErrorKind::TypeMismatch {
                expected: "Number".to_string(),
                actual: value.type_name().to_string(),
            },
            span,
        )
    })
}
