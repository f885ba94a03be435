//! Module defining the object runtime: the five object variants, the
//! amendment chain, member tables and the per-receiver evaluation cache.
//!
//! An [`Obj`] is immutable once constructed. Amendment never mutates the
//! parent: it produces a new object whose member table holds only the
//! additions and overrides, sharing everything else through the chain.

use crate::ast::Expr;
use crate::dynamic::{Key, Value};
use crate::member::{Member, MemberKind};
use crate::scope::Frame;
use crate::token::Span;
use crate::typecheck::TypeNode;
use crate::{Identifier, Shared, INT};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// Hasher used for all runtime tables.
pub(crate) type BuildHasher = ahash::RandomState;

/// Insertion-ordered member table.
pub type MemberTable = indexmap::IndexMap<MemberKey, Shared<Member>, BuildHasher>;

/// A class definition: declared properties and methods, ancestry, and
/// instantiation gates.
#[derive(Debug)]
pub struct ClassDef {
    /// Class name.
    pub name: Identifier,
    /// Parent class, if any.
    pub parent: Option<Shared<ClassDef>>,
    /// Is the class `open` for extension?
    pub is_open: bool,
    /// Is the class `abstract` (cannot be instantiated)?
    pub is_abstract: bool,
    /// Declared properties and methods by name.
    pub members: indexmap::IndexMap<Identifier, Shared<Member>, BuildHasher>,
    /// Declaration site.
    pub span: Span,
}

impl ClassDef {
    /// Find a declared property or method, searching the ancestry.
    #[must_use]
    pub fn find_member(&self, name: &str) -> Option<Shared<Member>> {
        match self.members.get(name) {
            Some(member) => Some(member.clone()),
            None => self.parent.as_ref().and_then(|p| p.find_member(name)),
        }
    }
    /// Is this class `name`, or a subclass of it?
    #[must_use]
    pub fn is_subclass_of(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        self.parent.as_ref().map_or(false, |p| p.is_subclass_of(name))
    }
}

/// Static information attached to a module object.
#[derive(Debug, Default)]
pub struct ModuleInfo {
    /// Declared module name, or the name the module was loaded under.
    pub name: Identifier,
    /// The module URI, when loaded through a resolver.
    pub uri: Option<String>,
    /// The module's source text, kept for diagnostics and test reports.
    pub source: String,
    /// Classes declared by the module.
    pub classes: HashMap<Identifier, Shared<ClassDef>, BuildHasher>,
    /// Type aliases declared by the module.
    pub aliases: HashMap<Identifier, Shared<TypeNode>, BuildHasher>,
    /// Values bound by `import` declarations.
    pub imports: HashMap<Identifier, Value, BuildHasher>,
}

/// Which of the object variants an [`Obj`] is.
#[derive(Debug, Clone)]
pub enum ObjVariant {
    /// A dynamic record: properties, entries and elements.
    Dynamic,
    /// A listing: contiguous elements, plus `default`.
    Listing,
    /// A mapping: entries keyed by arbitrary values, plus `default`.
    Mapping,
    /// A typed record of the given class.
    Typed(Shared<ClassDef>),
    /// A module object. Behaves like a typed record whose "class" is the
    /// module itself.
    Module,
}

impl ObjVariant {
    /// Variant name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Dynamic => "Dynamic",
            Self::Listing => "Listing",
            Self::Mapping => "Mapping",
            Self::Typed(_) => "Typed",
            Self::Module => "Module",
        }
    }
}

/// Key of a member within an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberKey {
    /// A property, method or local name.
    Name(Identifier),
    /// An element index, or an integer entry key.
    Index(INT),
    /// An arbitrary-value entry key.
    Key(Key),
}

impl MemberKey {
    /// Build a key from an entry-key value. Integers normalize to
    /// [`MemberKey::Index`] so that subscripts and element amendments agree.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Int(n) => Self::Index(n),
            other => Self::Key(Key(other)),
        }
    }
    /// The key as a value, for predicate and iteration bindings.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Name(name) => Value::Str(name.as_str().into()),
            Self::Index(n) => Value::Int(*n),
            Self::Key(key) => key.0.clone(),
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(n) => fmt::Display::fmt(n, f),
            Self::Key(key) => fmt::Display::fmt(key, f),
        }
    }
}

/// A member predicate recorded on an object: a deferred amendment applied at
/// read time to every member whose value satisfies the predicate.
#[derive(Debug, Clone)]
pub struct PredicateRec {
    /// The predicate expression, evaluated with the member's current value
    /// bound to `this`.
    pub pred: Shared<Expr>,
    /// The amendment body.
    pub member: Shared<Member>,
    /// Frame snapshot captured where the predicate was written.
    pub frame: Frame,
}

/// One slot of the member-evaluation cache.
#[derive(Debug, Clone)]
pub enum CacheSlot {
    /// Evaluation of this member is underway: a re-entrant read is a
    /// circular reference.
    InProgress,
    /// The memoized value.
    Done(Value),
}

/// Mutable data accumulated while a generator body executes, before it is
/// frozen into an [`Obj`].
#[derive(Debug, Default)]
pub struct ObjectData {
    /// Members added by this literal.
    pub members: MemberTable,
    /// Captured generator frames for frame-stored members.
    pub frames: HashMap<MemberKey, Frame, BuildHasher>,
    /// Member predicates in declaration order.
    pub predicates: Vec<PredicateRec>,
    /// Element count, seeded from the parent's length.
    pub length: usize,
}

/// A runtime object.
pub struct Obj {
    variant: ObjVariant,
    /// The amendment chain: this object's parent, if any.
    parent: Option<Shared<Obj>>,
    /// The lexically enclosing object, for `outer` and name resolution.
    lexical: Option<Shared<Obj>>,
    /// Members defined by this object itself.
    members: MemberTable,
    /// Captured generator frames, keyed by member.
    frames: HashMap<MemberKey, Frame, BuildHasher>,
    /// Member predicates defined by this object.
    predicates: Vec<PredicateRec>,
    /// Element count (Dynamic and Listing).
    length: usize,
    /// Is this a class or base prototype?
    prototype: bool,
    /// Module bookkeeping, present on module objects only.
    module_info: Option<Shared<ModuleInfo>>,
    /// Memoized member values for reads with this object as receiver.
    cache: RefCell<HashMap<MemberKey, CacheSlot, BuildHasher>>,
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("variant", &self.variant)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .field("length", &self.length)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            ObjVariant::Typed(class) => write!(f, "new {} {{...}}", class.name),
            variant => write!(f, "new {} {{...}}", variant.name()),
        }
    }
}

impl Obj {
    /// Freeze generator output into an object.
    #[must_use]
    pub fn from_data(
        variant: ObjVariant,
        data: ObjectData,
        parent: Option<Shared<Obj>>,
        lexical: Option<Shared<Obj>>,
    ) -> Shared<Self> {
        Shared::new(Self {
            variant,
            parent,
            lexical,
            members: data.members,
            frames: data.frames,
            predicates: data.predicates,
            length: data.length,
            prototype: false,
            module_info: None,
            cache: RefCell::new(HashMap::default()),
        })
    }

    /// Create an empty prototype object of a variant.
    #[must_use]
    pub fn prototype(variant: ObjVariant) -> Shared<Self> {
        Shared::new(Self {
            variant,
            parent: None,
            lexical: None,
            members: MemberTable::default(),
            frames: HashMap::default(),
            predicates: Vec::new(),
            length: 0,
            prototype: true,
            module_info: None,
            cache: RefCell::new(HashMap::default()),
        })
    }

    /// Create a module object from generator output.
    #[must_use]
    pub fn module(
        data: ObjectData,
        info: ModuleInfo,
        parent: Option<Shared<Obj>>,
    ) -> Shared<Self> {
        Shared::new(Self {
            variant: ObjVariant::Module,
            parent,
            lexical: None,
            members: data.members,
            frames: data.frames,
            predicates: data.predicates,
            length: data.length,
            prototype: false,
            module_info: Some(Shared::new(info)),
            cache: RefCell::new(HashMap::default()),
        })
    }

    /// The object's variant.
    #[inline(always)]
    #[must_use]
    pub fn variant(&self) -> &ObjVariant {
        &self.variant
    }
    /// Variant name for diagnostics.
    #[inline(always)]
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        self.variant.name()
    }
    /// The amendment parent.
    #[inline(always)]
    #[must_use]
    pub fn parent(&self) -> Option<&Shared<Obj>> {
        self.parent.as_ref()
    }
    /// The lexically enclosing object.
    #[inline(always)]
    #[must_use]
    pub fn lexical(&self) -> Option<&Shared<Obj>> {
        self.lexical.as_ref()
    }
    /// Is this a prototype?
    #[inline(always)]
    #[must_use]
    pub fn is_prototype(&self) -> bool {
        self.prototype
    }
    /// Module bookkeeping, for module objects.
    #[inline(always)]
    #[must_use]
    pub fn module_info(&self) -> Option<&Shared<ModuleInfo>> {
        self.module_info.as_ref()
    }
    /// The class of a typed object, walking the chain if necessary.
    #[must_use]
    pub fn class(&self) -> Option<Shared<ClassDef>> {
        match &self.variant {
            ObjVariant::Typed(class) => Some(class.clone()),
            _ => None,
        }
    }
    /// Members defined by this object itself.
    #[inline(always)]
    #[must_use]
    pub fn own_members(&self) -> &MemberTable {
        &self.members
    }
    /// Member predicates defined by this object itself.
    #[inline(always)]
    #[must_use]
    pub fn own_predicates(&self) -> &[PredicateRec] {
        &self.predicates
    }
    /// The captured generator frame of a frame-stored member.
    #[inline]
    #[must_use]
    pub fn stored_frame(&self, key: &MemberKey) -> Option<Frame> {
        self.frames.get(key).cloned()
    }

    /// Number of elements, inherited from the parent unless this literal
    /// appended more.
    #[inline(always)]
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// The amendment chain, rootmost first.
    #[must_use]
    pub fn chain(obj: &Shared<Obj>) -> Vec<Shared<Obj>> {
        let mut chain = Vec::new();
        let mut cursor = Some(obj.clone());
        while let Some(o) = cursor {
            cursor = o.parent.clone();
            chain.push(o);
        }
        chain.reverse();
        chain
    }

    /// Find a member in the chain, returning the physically owning object.
    #[must_use]
    pub fn lookup(obj: &Shared<Obj>, key: &MemberKey) -> Option<(Shared<Obj>, Shared<Member>)> {
        let mut cursor = Some(obj.clone());
        while let Some(o) = cursor {
            if let Some(member) = o.members.get(key) {
                return Some((o.clone(), member.clone()));
            }
            cursor = o.parent.clone();
        }
        None
    }

    /// Find a member strictly above `owner` in the chain: the `super` search.
    #[must_use]
    pub fn lookup_super(
        owner: &Shared<Obj>,
        key: &MemberKey,
    ) -> Option<(Shared<Obj>, Shared<Member>)> {
        owner.parent.as_ref().and_then(|p| Self::lookup(p, key))
    }

    /// All member keys visible to renderers and iteration, in chain order:
    /// the rootmost definition position wins, overrides keep the original
    /// position, and new members append. Locals, methods and hidden members
    /// are skipped.
    #[must_use]
    pub fn visible_keys(&self) -> Vec<MemberKey> {
        let mut keys: Vec<MemberKey> = Vec::new();
        let mut seen: HashMap<MemberKey, (), BuildHasher> = HashMap::default();
        self.collect_visible(&mut keys, &mut seen);
        keys
    }

    fn collect_visible(
        &self,
        keys: &mut Vec<MemberKey>,
        seen: &mut HashMap<MemberKey, (), BuildHasher>,
    ) {
        if let Some(parent) = &self.parent {
            parent.collect_visible(keys, seen);
        }
        for (key, member) in &self.members {
            if member.is_local() || member.is_hidden() || member.kind == MemberKind::Method {
                continue;
            }
            if seen.insert(key.clone(), ()).is_none() {
                keys.push(key.clone());
            }
        }
    }

    /// Look up the `default` function of this object's chain.
    #[must_use]
    pub fn default_member(obj: &Shared<Obj>) -> Option<(Shared<Obj>, Shared<Member>)> {
        Self::lookup(obj, &MemberKey::Name("default".into()))
    }

    // Cache plumbing. A member evaluates at most once per (receiver, key);
    // the in-progress marker doubles as the cycle bit.

    /// Current cache slot for `key`, if any.
    #[must_use]
    pub fn cache_get(&self, key: &MemberKey) -> Option<CacheSlot> {
        self.cache.borrow().get(key).cloned()
    }
    /// Mark `key` as being evaluated.
    pub fn cache_begin(&self, key: &MemberKey) {
        self.cache
            .borrow_mut()
            .insert(key.clone(), CacheSlot::InProgress);
    }
    /// Store the finished value for `key`.
    pub fn cache_done(&self, key: &MemberKey, value: Value) {
        self.cache
            .borrow_mut()
            .insert(key.clone(), CacheSlot::Done(value));
    }
    /// Roll back an in-progress slot after a failure.
    pub fn cache_cancel(&self, key: &MemberKey) {
        self.cache.borrow_mut().remove(key);
    }
}
