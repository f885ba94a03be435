//! Module implementing the generator engine: evaluation of object-literal
//! bodies against their parent.
//!
//! A literal's member nodes execute strictly in source order. Only the
//! membership-determining expressions run eagerly - `for` iterables, `when`
//! conditions, entry and predicate keys, spread sources. Member bodies stay
//! lazy and are evaluated on read by the object runtime.

use crate::ast::{Expr, MemberNode, ObjBody, Param};
use crate::dynamic::Value;
use crate::engine::EvalCtx;
use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::member::{Member, MemberBody, MemberKind};
use crate::object::{MemberKey, Obj, ObjVariant, ObjectData, PredicateRec};
use crate::token::Span;
use crate::{Shared, INT};

/// Instantiate an object body over a parent value, producing a new object
/// whose variant follows from the parent's.
pub(crate) fn instantiate(
    ctx: &mut EvalCtx<'_>,
    parent: Value,
    body: &ObjBody,
    span: Span,
) -> EvalResult {
    let parent_obj = match parent {
        Value::Object(obj) => obj,
        other => {
            return Err(EvalError::new(
                ErrorKind::TypeMismatch {
                    expected: "an object".to_string(),
                    actual: other.type_name().to_string(),
                },
                span,
            ))
        }
    };

    let variant = match parent_obj.variant() {
        // Amending a module produces a plain dynamic record.
        ObjVariant::Module => ObjVariant::Dynamic,
        other => other.clone(),
    };

    let mut data = ObjectData::default();
    data.length = parent_obj.length();

    exec_nodes(ctx, &mut data, &parent_obj, &variant, &body.members)?;

    let lexical = Some(ctx.owner().clone());
    Ok(Value::Object(Obj::from_data(
        variant,
        data,
        Some(parent_obj),
        lexical,
    )))
}

fn exec_nodes(
    ctx: &mut EvalCtx<'_>,
    data: &mut ObjectData,
    parent: &Shared<Obj>,
    variant: &ObjVariant,
    nodes: &[MemberNode],
) -> Result<(), Box<EvalError>> {
    for node in nodes {
        exec_node(ctx, data, parent, variant, node)?;
    }
    Ok(())
}

fn exec_node(
    ctx: &mut EvalCtx<'_>,
    data: &mut ObjectData,
    parent: &Shared<Obj>,
    variant: &ObjVariant,
    node: &MemberNode,
) -> Result<(), Box<EvalError>> {
    match node {
        MemberNode::Local(member) => {
            let key = member_name_key(member);
            insert_member(data, key, member.clone(), ctx, node.span())
        }
        MemberNode::Property(member) | MemberNode::Method(member) => {
            let key = member_name_key(member);
            check_property_allowed(variant, parent, member, &key, node.span())?;
            insert_member(data, key, member.clone(), ctx, node.span())
        }
        MemberNode::Element(member) => {
            match variant {
                ObjVariant::Dynamic | ObjVariant::Listing => (),
                _ => {
                    return Err(EvalError::new(
                        ErrorKind::MemberKindNotAllowed {
                            variant: variant.name(),
                            kind: "an element",
                        },
                        node.span(),
                    ))
                }
            }
            let key = MemberKey::Index(data.length as INT);
            data.length += 1;
            insert_member(data, key, member.clone(), ctx, node.span())
        }
        MemberNode::Entry(key_expr, member) => {
            let key_value = ctx.eval_expr(key_expr)?;
            let key = MemberKey::from_value(key_value);
            match variant {
                ObjVariant::Dynamic | ObjVariant::Mapping => (),
                ObjVariant::Listing => {
                    // Entries on a listing amend an existing index.
                    let index = match &key {
                        MemberKey::Index(i) => *i,
                        _ => {
                            return Err(EvalError::new(
                                ErrorKind::TypeMismatch {
                                    expected: "Int".to_string(),
                                    actual: key.to_value().type_name().to_string(),
                                },
                                key_expr.span(),
                            ))
                        }
                    };
                    let length = parent.length();
                    if index < 0 || index as usize >= length {
                        return Err(EvalError::new(
                            ErrorKind::ListingIndexOutOfRange { index, length },
                            key_expr.span(),
                        ));
                    }
                }
                _ => {
                    return Err(EvalError::new(
                        ErrorKind::MemberKindNotAllowed {
                            variant: variant.name(),
                            kind: "an entry",
                        },
                        node.span(),
                    ))
                }
            }
            insert_member(data, key, member.clone(), ctx, node.span())
        }
        MemberNode::Predicate(pred, member) => {
            match variant {
                ObjVariant::Dynamic | ObjVariant::Listing | ObjVariant::Mapping => (),
                _ => {
                    return Err(EvalError::new(
                        ErrorKind::MemberKindNotAllowed {
                            variant: variant.name(),
                            kind: "a member predicate",
                        },
                        node.span(),
                    ))
                }
            }
            data.predicates.push(PredicateRec {
                pred: pred.clone(),
                member: member.clone(),
                frame: ctx.frame.snapshot(member.frame_depth),
            });
            Ok(())
        }
        MemberNode::Spread {
            expr,
            nullable,
            span,
        } => exec_spread(ctx, data, parent, variant, expr, *nullable, *span),
        MemberNode::When {
            cond,
            then,
            otherwise,
            ..
        } => {
            let value = ctx.eval_expr(cond)?;
            let flag = value.as_bool().ok_or_else(|| {
                EvalError::new(
                    ErrorKind::TypeMismatch {
                        expected: "Boolean".to_string(),
                        actual: value.type_name().to_string(),
                    },
                    cond.span(),
                )
            })?;
            let branch = if flag { then } else { otherwise };
            exec_nodes(ctx, data, parent, variant, branch)
        }
        MemberNode::For {
            key_var,
            value_var,
            iterable,
            body,
            span,
        } => exec_for(
            ctx,
            data,
            parent,
            variant,
            key_var.as_ref(),
            value_var,
            iterable,
            body,
            *span,
        ),
    }
}

fn member_name_key(member: &Shared<Member>) -> MemberKey {
    MemberKey::Name(member.name.clone().unwrap_or_else(|| "<member>".into()))
}

/// Insert a member, failing on duplicate definition within the literal, and
/// snapshot the generator frame for frame-stored members.
fn insert_member(
    data: &mut ObjectData,
    key: MemberKey,
    member: Shared<Member>,
    ctx: &EvalCtx<'_>,
    span: Span,
) -> Result<(), Box<EvalError>> {
    if member.frame_depth > 0 {
        data.frames
            .insert(key.clone(), ctx.frame.snapshot(member.frame_depth));
    }
    if data.members.insert(key.clone(), member).is_some() {
        return Err(EvalError::new(
            ErrorKind::DuplicateDefinition {
                key: key.to_string(),
            },
            span,
        ));
    }
    Ok(())
}

/// Property legality for the target variant, plus `const`/`fixed` and
/// function-arity checks against the inherited slot.
fn check_property_allowed(
    variant: &ObjVariant,
    parent: &Shared<Obj>,
    member: &Shared<Member>,
    key: &MemberKey,
    span: Span,
) -> Result<(), Box<EvalError>> {
    let name = member.display_name();

    match variant {
        ObjVariant::Dynamic | ObjVariant::Module => (),
        ObjVariant::Listing | ObjVariant::Mapping => {
            if name != "default" {
                return Err(EvalError::new(
                    ErrorKind::PropertyNotAllowed {
                        variant: variant.name(),
                        name: name.to_string(),
                    },
                    span,
                ));
            }
        }
        ObjVariant::Typed(class) => {
            if class.find_member(name).is_none() {
                return Err(EvalError::new(
                    ErrorKind::NoSuchTypedProperty {
                        class: class.name.to_string(),
                        name: name.to_string(),
                    },
                    span,
                ));
            }
        }
    }

    if let Some((_, inherited)) = Obj::lookup(parent, key) {
        if inherited.is_const() {
            return Err(EvalError::new(
                ErrorKind::ModifierViolation {
                    modifier: "const",
                    name: name.to_string(),
                },
                span,
            ));
        }
        if inherited.is_fixed() {
            return Err(EvalError::new(
                ErrorKind::ModifierViolation {
                    modifier: "fixed",
                    name: name.to_string(),
                },
                span,
            ));
        }
        if inherited.kind == MemberKind::Method {
            let override_arity = match (&member.kind, &member.body) {
                (MemberKind::Method, _) => Some(member.params.len()),
                (_, MemberBody::Expr(expr)) => match &**expr {
                    Expr::Lambda(literal, _) => Some(literal.params.len()),
                    _ => None,
                },
                _ => None,
            };
            if let Some(arity) = override_arity {
                if arity > inherited.params.len() {
                    return Err(EvalError::new(
                        ErrorKind::FunctionAmendParams {
                            name: name.to_string(),
                        },
                        span,
                    ));
                }
            }
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Spread
// ----------------------------------------------------------------------

fn exec_spread(
    ctx: &mut EvalCtx<'_>,
    data: &mut ObjectData,
    parent: &Shared<Obj>,
    variant: &ObjVariant,
    expr: &Expr,
    nullable: bool,
    span: Span,
) -> Result<(), Box<EvalError>> {
    let source = ctx.eval_expr(expr)?;

    match source {
        Value::Null if nullable => Ok(()),
        Value::Null => Err(EvalError::new(ErrorKind::SpreadNull, span)
            .with_hint("use '...?' to spread a value that may be null")),
        Value::List(items) | Value::Set(items) => {
            spread_elements(data, variant, items.iter().cloned(), span)
        }
        Value::IntSeq(seq) => {
            let items: Vec<Value> = seq.iter().map(Value::Int).collect();
            spread_elements(data, variant, items.into_iter(), span)
        }
        Value::Map(map) => {
            match variant {
                ObjVariant::Dynamic | ObjVariant::Mapping => (),
                _ => {
                    return Err(EvalError::new(
                        ErrorKind::SpreadRejected {
                            parent: variant.name(),
                            source_type: "Map".to_string(),
                        },
                        span,
                    ))
                }
            }
            for (k, v) in map.iter() {
                let key = MemberKey::from_value(k.value().clone());
                insert_synthetic(data, key, v.clone(), span)?;
            }
            Ok(())
        }
        Value::Object(src) => spread_object(ctx, data, parent, variant, &src, span),
        other => Err(EvalError::new(
            ErrorKind::SpreadRejected {
                parent: variant.name(),
                source_type: other.type_name().to_string(),
            },
            span,
        )),
    }
}

fn spread_elements(
    data: &mut ObjectData,
    variant: &ObjVariant,
    items: impl Iterator<Item = Value>,
    span: Span,
) -> Result<(), Box<EvalError>> {
    match variant {
        ObjVariant::Dynamic | ObjVariant::Listing => (),
        _ => {
            return Err(EvalError::new(
                ErrorKind::SpreadRejected {
                    parent: variant.name(),
                    source_type: "a sequence of elements".to_string(),
                },
                span,
            ))
        }
    }
    for item in items {
        let key = MemberKey::Index(data.length as INT);
        data.length += 1;
        insert_synthetic(data, key, item, span)?;
    }
    Ok(())
}

fn insert_synthetic(
    data: &mut ObjectData,
    key: MemberKey,
    value: Value,
    span: Span,
) -> Result<(), Box<EvalError>> {
    if data
        .members
        .insert(key.clone(), Member::synthetic(value, span))
        .is_some()
    {
        return Err(EvalError::new(
            ErrorKind::DuplicateDefinition {
                key: key.to_string(),
            },
            span,
        ));
    }
    Ok(())
}

/// Spread one object into another, copying member records so their bodies
/// stay lazy. The compatibility matrix rejects everything not listed.
fn spread_object(
    _ctx: &mut EvalCtx<'_>,
    data: &mut ObjectData,
    parent: &Shared<Obj>,
    variant: &ObjVariant,
    src: &Shared<Obj>,
    span: Span,
) -> Result<(), Box<EvalError>> {
    let src_is_typed = matches!(src.variant(), ObjVariant::Typed(_) | ObjVariant::Module);

    // Flatten the source chain: topmost definition of each key, in the
    // rootmost definition order.
    let mut flattened: indexmap::IndexMap<MemberKey, (Shared<Member>, Shared<Obj>), crate::object::BuildHasher> =
        indexmap::IndexMap::default();
    for obj in Obj::chain(src) {
        for (key, member) in obj.own_members() {
            flattened.insert(key.clone(), (member.clone(), obj.clone()));
        }
    }

    for (key, (member, owner)) in flattened {
        if member.is_local() || member.kind == MemberKind::Method {
            continue;
        }
        if matches!(&key, MemberKey::Name(name) if name.as_str() == "default") {
            continue;
        }

        let rejected = |kind: &str| {
            EvalError::new(
                ErrorKind::SpreadRejected {
                    parent: variant.name(),
                    source_type: kind.to_string(),
                },
                span,
            )
        };

        let new_key = match &key {
            MemberKey::Name(name) => {
                match variant {
                    ObjVariant::Dynamic => (),
                    ObjVariant::Typed(class) => {
                        if class.find_member(name).is_none() {
                            return Err(EvalError::new(
                                ErrorKind::NoSuchTypedProperty {
                                    class: class.name.to_string(),
                                    name: name.to_string(),
                                },
                                span,
                            ));
                        }
                        if let Some((_, inherited)) = Obj::lookup(parent, &key) {
                            if inherited.is_const() || inherited.is_fixed() {
                                return Err(EvalError::new(
                                    ErrorKind::ModifierViolation {
                                        modifier: if inherited.is_const() {
                                            "const"
                                        } else {
                                            "fixed"
                                        },
                                        name: name.to_string(),
                                    },
                                    span,
                                ));
                            }
                        }
                    }
                    _ => return Err(rejected("a property")),
                }
                key.clone()
            }
            MemberKey::Index(_) => {
                if src_is_typed {
                    return Err(rejected("a typed object"));
                }
                match variant {
                    ObjVariant::Dynamic | ObjVariant::Listing => (),
                    _ => return Err(rejected("elements")),
                }
                let new_key = MemberKey::Index(data.length as INT);
                data.length += 1;
                new_key
            }
            MemberKey::Key(_) => {
                if src_is_typed {
                    return Err(rejected("a typed object"));
                }
                match variant {
                    ObjVariant::Dynamic | ObjVariant::Mapping => (),
                    _ => return Err(rejected("entries")),
                }
                key.clone()
            }
        };

        if let Some(frame) = owner.stored_frame(&key) {
            data.frames.insert(new_key.clone(), frame);
        }
        if data.members.insert(new_key.clone(), member).is_some() {
            return Err(EvalError::new(
                ErrorKind::DuplicateDefinition {
                    key: new_key.to_string(),
                },
                span,
            ));
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// for-generators
// ----------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn exec_for(
    ctx: &mut EvalCtx<'_>,
    data: &mut ObjectData,
    parent: &Shared<Obj>,
    variant: &ObjVariant,
    key_var: Option<&Param>,
    value_var: &Param,
    iterable: &Expr,
    body: &[MemberNode],
    span: Span,
) -> Result<(), Box<EvalError>> {
    let source = ctx.eval_expr(iterable)?;
    let pairs = iteration_pairs(ctx, &source, iterable.span())?;

    let first_slot = key_var.map_or(value_var.slot, |kv| kv.slot);

    for (k, v) in pairs {
        // Each iteration writes its bindings into fresh slots; members
        // produced under this iteration snapshot the frame as it is now.
        if let Some(kv) = key_var {
            if let Err(err) = bind_for_var(ctx, kv, k, iterable.span()) {
                ctx.frame.truncate(first_slot);
                return Err(err.with_frame("for generator", span));
            }
        }
        if let Err(err) = bind_for_var(ctx, value_var, v, iterable.span()) {
            ctx.frame.truncate(first_slot);
            return Err(err.with_frame("for generator", span));
        }

        let result = exec_nodes(ctx, data, parent, variant, body);
        if let Err(err) = result {
            ctx.frame.truncate(first_slot);
            return Err(err.with_frame("for generator", span));
        }
    }

    ctx.frame.truncate(first_slot);
    Ok(())
}

/// Write a `for` binding into the generator frame, checking it against the
/// declared type first. The blamed span is the iterable: that is where the
/// offending value came from.
fn bind_for_var(
    ctx: &mut EvalCtx<'_>,
    param: &Param,
    value: Value,
    span: Span,
) -> Result<(), Box<EvalError>> {
    match &param.ty {
        Some(ty) => {
            let ty = ty.clone();
            // Bind into a copy so constraint expressions still see the
            // outer bindings of the live frame, then commit.
            let mut frame = ctx.frame.clone();
            ty.check_and_bind(
                &mut frame,
                param.slot,
                param.name.as_str(),
                value,
                ctx,
                span,
            )?;
            ctx.frame = frame;
            Ok(())
        }
        None => {
            ctx.frame.push_at(param.slot, value);
            Ok(())
        }
    }
}

/// The `(key, value)` sequence a `for` generator iterates.
fn iteration_pairs(
    ctx: &mut EvalCtx<'_>,
    source: &Value,
    span: Span,
) -> Result<Vec<(Value, Value)>, Box<EvalError>> {
    match source {
        Value::List(items) | Value::Set(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as INT), v.clone()))
            .collect()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.value().clone(), v.clone()))
            .collect()),
        Value::IntSeq(seq) => Ok(seq
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as INT), Value::Int(v)))
            .collect()),
        Value::Bytes(bytes) => Ok(bytes
            .iter()
            .enumerate()
            .map(|(i, b)| (Value::Int(i as INT), Value::Int(*b as INT)))
            .collect()),
        Value::Object(obj) => match obj.variant() {
            ObjVariant::Typed(_) | ObjVariant::Module => Err(EvalError::new(
                ErrorKind::CannotIterate {
                    type_name: source.type_name().to_string(),
                },
                span,
            )
            .with_hint("call 'toDynamic()' to iterate over a typed value")),
            _ => {
                let mut pairs = Vec::new();
                for key in obj.visible_keys() {
                    let value = ctx.read_member(obj, &key, span)?;
                    pairs.push((key.to_value(), value));
                }
                Ok(pairs)
            }
        },
        Value::Null => Err(EvalError::new(
            ErrorKind::CannotIterate {
                type_name: "Null".to_string(),
            },
            span,
        )
        .with_hint("the iterable is null; supply a fallback with '??'")),
        other => Err(EvalError::new(
            ErrorKind::CannotIterate {
                type_name: other.type_name().to_string(),
            },
            span,
        )),
    }
}
