use pkl::{Engine, ErrorKind, EvalError};

#[test]
fn test_for_over_list() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "forlist",
        "x = new Listing { for (n in List(1, 2, 3)) { n * 10 } }",
    )?;
    assert_eq!(engine.eval_expression_in(&module, "x.length")?.as_int(), Some(3));
    assert_eq!(engine.eval_expression_in(&module, "x[0]")?.as_int(), Some(10));
    assert_eq!(engine.eval_expression_in(&module, "x[2]")?.as_int(), Some(30));
    Ok(())
}

#[test]
fn test_for_over_map_with_frame_bindings() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "formap",
        r#"
        m = Map("x", 1, "y", 2)
        result = new Dynamic {
            for (k, v in m) { ["\(k)-sq"] = v * v }
        }
        "#,
    )?;
    assert_eq!(
        engine
            .eval_expression_in(&module, r#"result["x-sq"]"#)?
            .as_int(),
        Some(1)
    );
    assert_eq!(
        engine
            .eval_expression_in(&module, r#"result["y-sq"]"#)?
            .as_int(),
        Some(4)
    );
    Ok(())
}

#[test]
fn test_for_binding_hygiene() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    // Each iteration's members see exactly their own binding, even though
    // they are read long after the loop finished.
    let module = engine.load_module_str(
        "hygiene",
        r#"
        xs = new Dynamic {
            for (i in List(1, 2, 3)) { ["k\(i)"] = i * 100 }
        }
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, r#"xs["k1"]"#)?.as_int(),
        Some(100)
    );
    assert_eq!(
        engine.eval_expression_in(&module, r#"xs["k3"]"#)?.as_int(),
        Some(300)
    );
    assert_eq!(
        engine.eval_expression_in(&module, r#"xs["k2"]"#)?.as_int(),
        Some(200)
    );
    Ok(())
}

#[test]
fn test_for_binding_types_checked() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "typedfor",
        r#"
        ok = new Listing { for (n: Int in List(1, 2)) { n * 2 } }
        pairs = new Dynamic { for (k: String, v: Int in Map("a", 1)) { [k] = v } }
        bad = new Listing { for (n: Int in List("x")) { n } }
        "#,
    )?;

    assert_eq!(engine.eval_expression_in(&module, "ok[1]")?.as_int(), Some(4));
    assert_eq!(
        engine.eval_expression_in(&module, r#"pairs["a"]"#)?.as_int(),
        Some(1)
    );

    // A value that fails the binding's declared type is a type mismatch,
    // with an inserted frame naming the binding.
    let err = engine.eval_expression_in(&module, "bad").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch { .. }));
    assert!(err.trace().iter().any(|f| f.target.contains("n")));
    Ok(())
}

#[test]
fn test_nested_for_bindings() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "nested",
        r#"
        grid = new Dynamic {
            for (a in List(1, 2)) {
                for (b in List(10, 20)) {
                    ["\(a)x\(b)"] = a + b
                }
            }
        }
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, r#"grid["1x10"]"#)?.as_int(),
        Some(11)
    );
    assert_eq!(
        engine.eval_expression_in(&module, r#"grid["2x20"]"#)?.as_int(),
        Some(22)
    );
    Ok(())
}

#[test]
fn test_for_over_intseq_and_bytes() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "seqs",
        r#"
        up = new Listing { for (n in IntSeq(1, 5, 2)) { n } }
        down = new Listing { for (n in IntSeq(5, 1, -2)) { n } }
        bytes = new Listing { for (b in Bytes(7, 8)) { b } }
        "#,
    )?;
    assert_eq!(engine.eval_expression_in(&module, "up.length")?.as_int(), Some(3));
    assert_eq!(engine.eval_expression_in(&module, "up[2]")?.as_int(), Some(5));
    assert_eq!(engine.eval_expression_in(&module, "down.length")?.as_int(), Some(3));
    assert_eq!(engine.eval_expression_in(&module, "down[1]")?.as_int(), Some(3));
    assert_eq!(engine.eval_expression_in(&module, "bytes[1]")?.as_int(), Some(8));
    Ok(())
}

#[test]
fn test_for_over_null_and_typed_fails() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "badfor",
            r#"
            class C { x: Int = 1 }
            overNull = new Dynamic { for (v in null) { v } }
            overTyped = new Dynamic { for (v in new C {}) { v } }
            "#,
        )
        .unwrap();

    let err = engine.eval_expression_in(&module, "overNull").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CannotIterate { .. }));

    let err = engine.eval_expression_in(&module, "overTyped").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CannotIterate { .. }));
    // The hint points at the conversion that makes it iterable.
    assert!(err.hints().iter().any(|h| h.contains("toDynamic")));
}

#[test]
fn test_to_dynamic_makes_typed_iterable() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "todyn",
        r#"
        class C {
            x: Int = 1
            y: Int = 2
        }
        total = new Dynamic {
            for (k, v in new C {}.toDynamic()) { [k] = v }
        }
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, r#"total["x"]"#)?.as_int(),
        Some(1)
    );
    Ok(())
}

#[test]
fn test_when_generator() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "when",
        r#"
        flag = true
        x = new Dynamic {
            when (flag) { a = 1 } else { a = 2 }
            when (!flag) { b = 3 }
        }
        "#,
    )?;
    assert_eq!(engine.eval_expression_in(&module, "x.a")?.as_int(), Some(1));
    let err = engine.eval_expression_in(&module, "x.b").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::MissingProperty { .. }));
    Ok(())
}

#[test]
fn test_when_condition_must_be_boolean() {
    let engine = Engine::new();
    let module = engine
        .load_module_str("badwhen", "x = new Dynamic { when (1) { a = 1 } }")
        .unwrap();
    let err = engine.eval_expression_in(&module, "x").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch { .. }));
}

#[test]
fn test_spread_list_into_listing() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "spread",
        "a = new Listing { 1; 2 }\nb = (a) { ...List(3, 4) }",
    )?;
    assert_eq!(engine.eval_expression_in(&module, "b.length")?.as_int(), Some(4));
    for (i, expected) in [1, 2, 3, 4].iter().enumerate() {
        assert_eq!(
            engine
                .eval_expression_in(&module, &format!("b[{}]", i))?
                .as_int(),
            Some(*expected)
        );
    }
    Ok(())
}

#[test]
fn test_spread_map_into_mapping() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "spreadmap",
        r#"m = new Mapping { ...Map("a", 1, "b", 2) }"#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, r#"m["b"]"#)?.as_int(),
        Some(2)
    );
    Ok(())
}

#[test]
fn test_spread_object_members_stay_late_bound() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "spreadobj",
        r#"
        src = new Dynamic {
            b = a + 1
        }
        dst = new Dynamic {
            a = 10
            ...src
        }
        "#,
    )?;
    // The spread copies members, not values: `b` stays lazy and binds its
    // `a` against the object it was spread into.
    assert_eq!(engine.eval_expression_in(&module, "dst.b")?.as_int(), Some(11));
    Ok(())
}

#[test]
fn test_spread_compatibility_rejections() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "badspread",
            r#"
            class C { x: Int = 1 }
            listIntoMapping = new Mapping { ...List(1) }
            mapIntoListing = new Listing { ...Map("a", 1) }
            typedIntoListing = new Listing { ...new C {} }
            nullSpread = new Dynamic { ...null }
            "#,
        )
        .unwrap();

    for name in ["listIntoMapping", "mapIntoListing", "typedIntoListing"] {
        let err = engine.eval_expression_in(&module, name).unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::SpreadRejected { .. }),
            "{} should be a spread rejection, got {:?}",
            name,
            err.kind()
        );
    }

    let err = engine.eval_expression_in(&module, "nullSpread").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::SpreadNull));
    assert!(err.hints().iter().any(|h| h.contains("...?")));
}

#[test]
fn test_nullable_spread_of_null_is_noop() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "nullspread",
        "x = new Dynamic { ...?null\na = 1 }",
    )?;
    assert_eq!(engine.eval_expression_in(&module, "x.a")?.as_int(), Some(1));
    Ok(())
}

#[test]
fn test_member_predicate_amends_matching_values() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "predicate",
        r#"
        a = new Listing { 1; 2; 3 }
        b = (a) { [[this > 1]] = 0 }
        "#,
    )?;
    assert_eq!(engine.eval_expression_in(&module, "b[0]")?.as_int(), Some(1));
    assert_eq!(engine.eval_expression_in(&module, "b[1]")?.as_int(), Some(0));
    assert_eq!(engine.eval_expression_in(&module, "b[2]")?.as_int(), Some(0));
    // A predicate matching nothing is silently a no-op.
    let module = engine.load_module_str(
        "nopredicate",
        "a = new Listing { 1 }\nb = (a) { [[this > 99]] = 0 }",
    )?;
    assert_eq!(engine.eval_expression_in(&module, "b[0]")?.as_int(), Some(1));
    Ok(())
}

#[test]
fn test_generator_ordering_is_source_order() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "ordering",
        r#"
        x = new Listing {
            1
            for (n in List(2, 3)) { n }
            when (true) { 4 }
            ...List(5)
        }
        "#,
    )?;
    for (i, expected) in [1, 2, 3, 4, 5].iter().enumerate() {
        assert_eq!(
            engine
                .eval_expression_in(&module, &format!("x[{}]", i))?
                .as_int(),
            Some(*expected)
        );
    }
    Ok(())
}
