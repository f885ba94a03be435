//! Module registering the built-in value constructors, properties and
//! methods of the base scope, plus the synthetic standard-library modules.

use crate::dynamic::{IntSeq, Key, Value, ValueMap};
use crate::engine::{expect_int, Engine, EvalCtx};
use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::member::Member;
use crate::object::{MemberKey, ModuleInfo, Obj, ObjVariant, ObjectData};
use crate::token::Span;
use crate::{Shared, INT};

/// Register the standard constructors and the synthetic `pkl:test` module.
pub(crate) fn register(engine: &mut Engine) {
    engine.register_fn("List", 0, list_ctor);
    engine.register_fn("Set", 0, set_ctor);
    engine.register_fn("Map", 0, map_ctor);
    engine.register_fn("IntSeq", 2, intseq_ctor);
    engine.register_fn("Bytes", 0, bytes_ctor);

    engine.cache_module("pkl:test", build_test_module());
}

fn list_ctor(_engine: &Engine, args: &[Value], _span: Span) -> EvalResult {
    Ok(Value::List(Shared::new(args.to_vec())))
}

fn set_ctor(_engine: &Engine, args: &[Value], _span: Span) -> EvalResult {
    let mut items: Vec<Value> = Vec::with_capacity(args.len());
    for arg in args {
        if !items.iter().any(|existing| existing.value_eq(arg)) {
            items.push(arg.clone());
        }
    }
    Ok(Value::Set(Shared::new(items)))
}

fn map_ctor(_engine: &Engine, args: &[Value], span: Span) -> EvalResult {
    if args.len() % 2 != 0 {
        return Err(EvalError::new(
            ErrorKind::WrongArity {
                expected: args.len() + 1,
                actual: args.len(),
            },
            span,
        )
        .with_hint("Map(...) takes alternating keys and values"));
    }
    let mut map = ValueMap::default();
    for pair in args.chunks(2) {
        map.insert(Key(pair[0].clone()), pair[1].clone());
    }
    Ok(Value::Map(Shared::new(map)))
}

fn intseq_ctor(_engine: &Engine, args: &[Value], span: Span) -> EvalResult {
    if args.len() != 2 && args.len() != 3 {
        return Err(EvalError::new(
            ErrorKind::WrongArity {
                expected: 2,
                actual: args.len(),
            },
            span,
        ));
    }
    let start = expect_int(&args[0], span)?;
    let end = expect_int(&args[1], span)?;
    let step = match args.get(2) {
        Some(v) => expect_int(v, span)?,
        None => 1,
    };
    if step == 0 {
        return Err(EvalError::new(
            ErrorKind::Arithmetic("IntSeq step must not be zero".to_string()),
            span,
        ));
    }
    Ok(Value::IntSeq(IntSeq { start, end, step }))
}

fn bytes_ctor(_engine: &Engine, args: &[Value], span: Span) -> EvalResult {
    let mut bytes = Vec::with_capacity(args.len());
    for arg in args {
        let n = expect_int(arg, span)?;
        if !(0..=255).contains(&n) {
            return Err(EvalError::new(
                ErrorKind::Arithmetic(format!("byte value {} is out of range 0..255", n)),
                span,
            ));
        }
        bytes.push(n as u8);
    }
    Ok(Value::Bytes(Shared::new(bytes)))
}

/// Built-in properties of non-object values.
#[must_use]
pub(crate) fn builtin_property(value: &Value, name: &str) -> Option<Value> {
    match (value, name) {
        (Value::Str(s), "length") => Some(Value::Int(s.chars().count() as INT)),
        (Value::Str(s), "isEmpty") => Some(Value::Bool(s.is_empty())),
        (Value::List(items), "length") | (Value::Set(items), "length") => {
            Some(Value::Int(items.len() as INT))
        }
        (Value::List(items), "isEmpty") | (Value::Set(items), "isEmpty") => {
            Some(Value::Bool(items.is_empty()))
        }
        (Value::List(items), "first") | (Value::Set(items), "first") => items.first().cloned(),
        (Value::List(items), "last") | (Value::Set(items), "last") => items.last().cloned(),
        (Value::Map(map), "length") => Some(Value::Int(map.len() as INT)),
        (Value::Map(map), "isEmpty") => Some(Value::Bool(map.is_empty())),
        (Value::Map(map), "keys") => Some(Value::Set(Shared::new(
            map.keys().map(|k| k.value().clone()).collect(),
        ))),
        (Value::Bytes(bytes), "length") => Some(Value::Int(bytes.len() as INT)),
        (Value::Bytes(bytes), "isEmpty") => Some(Value::Bool(bytes.is_empty())),
        (Value::IntSeq(seq), "length") => Some(Value::Int(seq.len() as INT)),
        (Value::IntSeq(seq), "isEmpty") => Some(Value::Bool(seq.is_empty())),
        (Value::IntSeq(seq), "start") => Some(Value::Int(seq.start)),
        (Value::IntSeq(seq), "end") => Some(Value::Int(seq.end)),
        (Value::IntSeq(seq), "step") => Some(Value::Int(seq.step)),
        _ => None,
    }
}

/// Built-in methods: conversions and small utilities available on values
/// that do not define the name themselves.
pub(crate) fn builtin_method(
    ctx: &mut EvalCtx<'_>,
    target: &Value,
    name: &str,
    args: &[Value],
    span: Span,
) -> EvalResult {
    match (target, name) {
        (_, "toString") if args.is_empty() => Ok(Value::Str(target.to_string().into())),
        (Value::Object(obj), "toDynamic") if args.is_empty() => to_dynamic(ctx, obj),
        (Value::Object(obj), "toList") if args.is_empty() => {
            let mut items = Vec::new();
            for key in obj.visible_keys() {
                items.push(ctx.read_member(obj, &key, span)?);
            }
            Ok(Value::List(Shared::new(items)))
        }
        (Value::Object(obj), "toMap") if args.is_empty() => {
            let mut map = ValueMap::default();
            for key in obj.visible_keys() {
                let value = ctx.read_member(obj, &key, span)?;
                map.insert(Key(key.to_value()), value);
            }
            Ok(Value::Map(Shared::new(map)))
        }
        (Value::List(items), "toList") if args.is_empty() => {
            Ok(Value::List(items.clone()))
        }
        (Value::List(items), "toSet") if args.is_empty() => {
            set_ctor(ctx.engine(), items, span)
        }
        (Value::Set(items), "toList") if args.is_empty() => {
            Ok(Value::List(items.clone()))
        }
        (Value::IntSeq(seq), "toList") if args.is_empty() => Ok(Value::List(Shared::new(
            seq.iter().map(Value::Int).collect(),
        ))),
        (Value::Map(map), "toMap") if args.is_empty() => Ok(Value::Map(map.clone())),
        (Value::Map(map), "containsKey") if args.len() == 1 => {
            Ok(Value::Bool(map.contains_key(&Key(args[0].clone()))))
        }
        (Value::List(items), "contains") | (Value::Set(items), "contains") if args.len() == 1 => {
            Ok(Value::Bool(items.iter().any(|v| v.value_eq(&args[0]))))
        }
        (Value::Str(s), "contains") if args.len() == 1 => match args[0].as_str() {
            Some(needle) => Ok(Value::Bool(s.contains(needle))),
            None => Err(EvalError::new(
                ErrorKind::TypeMismatch {
                    expected: "String".to_string(),
                    actual: args[0].type_name().to_string(),
                },
                span,
            )),
        },
        _ => Err(EvalError::new(
            ErrorKind::MissingProperty {
                name: name.to_string(),
            },
            span,
        )),
    }
}

/// Flatten an object's amendment chain into a plain dynamic record, keeping
/// member bodies lazy.
fn to_dynamic(ctx: &mut EvalCtx<'_>, src: &Shared<Obj>) -> EvalResult {
    let mut data = ObjectData::default();
    data.length = src.length();

    for obj in Obj::chain(src) {
        for (key, member) in obj.own_members() {
            if member.is_local() {
                continue;
            }
            if let Some(frame) = obj.stored_frame(key) {
                data.frames.insert(key.clone(), frame);
            }
            data.members.insert(key.clone(), member.clone());
        }
    }

    let parent = ctx.engine().proto(&ObjVariant::Dynamic);
    Ok(Value::Object(Obj::from_data(
        ObjVariant::Dynamic,
        data,
        Some(parent),
        Some(ctx.owner().clone()),
    )))
}

/// The synthetic `pkl:test` module: empty `facts` and `examples` mappings
/// that test modules amend.
fn build_test_module() -> Shared<Obj> {
    let mut data = ObjectData::default();
    for name in ["facts", "examples"] {
        let mapping = Obj::prototype(ObjVariant::Mapping);
        data.members.insert(
            MemberKey::Name(name.into()),
            Member::synthetic(Value::Object(mapping), Span::NONE),
        );
    }
    let info = ModuleInfo {
        name: "pkl.test".into(),
        ..ModuleInfo::default()
    };
    Obj::module(data, info, None)
}
