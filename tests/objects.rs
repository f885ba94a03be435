use pkl::{Engine, ErrorKind, EvalError, Value};

#[test]
fn test_amendment_and_late_binding() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "amend",
        r#"
        base = new Dynamic {
            host = "localhost"
            port = 8080
            url = "\(host):\(port)"
        }
        web = (base) { port = 443 }
        "#,
    )?;

    // `this` binds late: the amended port flows into the inherited url.
    assert_eq!(
        engine.eval_expression_in(&module, "web.url")?.as_str(),
        Some("localhost:443")
    );
    // The parent is untouched.
    assert_eq!(
        engine.eval_expression_in(&module, "base.url")?.as_str(),
        Some("localhost:8080")
    );
    Ok(())
}

#[test]
fn test_super_access() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "supers",
        r#"
        base = new Dynamic { greeting = "hello" }
        child = (base) { greeting = super.greeting + " world" }
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "child.greeting")?.as_str(),
        Some("hello world")
    );
    Ok(())
}

#[test]
fn test_outer_and_module_references() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "scopes",
        r#"
        x = 1
        o = new Dynamic {
            y2 = 5
            y = new Dynamic { z = outer.y2 + module.x }
        }
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "o.y.z")?.as_int(),
        Some(6)
    );
    Ok(())
}

#[test]
fn test_memoization_returns_identical_value() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str("memo", "x = new Dynamic { y = 1 }")?;

    let first = engine.eval_expression_in(&module, "x")?;
    let second = engine.eval_expression_in(&module, "x")?;
    // Object members memoize per (receiver, key): both reads see the same
    // object identity.
    assert!(first.value_eq(&second));
    Ok(())
}

#[test]
fn test_circular_member_detection() {
    let engine = Engine::new();
    let module = engine.load_module_str("cycle", "a = b\nb = a").unwrap();

    let err = engine.eval_expression_in(&module, "a").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CircularReference));
    // The inserted stack frames cite the members the cycle ran through.
    assert!(err.trace().len() >= 2);
}

#[test]
fn test_missing_member() {
    let engine = Engine::new();
    let module = engine
        .load_module_str("missing", "a = new Dynamic { x = 1 }")
        .unwrap();
    let err = engine.eval_expression_in(&module, "a.nope").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::MissingProperty { .. }));
}

#[test]
fn test_duplicate_definition() {
    let engine = Engine::new();
    let module = engine
        .load_module_str("dup", "a = new Dynamic { x = 1; x = 2 }")
        .unwrap();
    let err = engine.eval_expression_in(&module, "a").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::DuplicateDefinition { .. }));
}

#[test]
fn test_listing_basics() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "listing",
        r#"
        a = new Listing { 1; 2 }
        b = (a) { [1] = 99 }
        "#,
    )?;
    assert_eq!(engine.eval_expression_in(&module, "a[0]")?.as_int(), Some(1));
    assert_eq!(engine.eval_expression_in(&module, "a.length")?.as_int(), Some(2));
    // Index amendment overrides in place without growing the listing.
    assert_eq!(engine.eval_expression_in(&module, "b[1]")?.as_int(), Some(99));
    assert_eq!(engine.eval_expression_in(&module, "b[0]")?.as_int(), Some(1));
    assert_eq!(engine.eval_expression_in(&module, "b.length")?.as_int(), Some(2));
    Ok(())
}

#[test]
fn test_listing_amendment_out_of_range() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "oor",
            "parent = new Listing { 1; 2 }\nchild = (parent) { [2] = 99 }",
        )
        .unwrap();
    let err = engine.eval_expression_in(&module, "child").unwrap_err();
    match err.kind() {
        ErrorKind::ListingIndexOutOfRange { index, length } => {
            assert_eq!(*index, 2);
            assert_eq!(*length, 2);
        }
        other => panic!("expected listing index error, got {:?}", other),
    }
}

#[test]
fn test_listing_forbids_properties() {
    let engine = Engine::new();
    let module = engine
        .load_module_str("badprop", "x = new Listing { foo = 1 }")
        .unwrap();
    let err = engine.eval_expression_in(&module, "x").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::PropertyNotAllowed { .. }));
}

#[test]
fn test_listing_default_function() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "defaults",
        "x = new Listing { default = (i) -> i * 10 }",
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "x[5]")?.as_int(),
        Some(50)
    );
    Ok(())
}

#[test]
fn test_mapping_entries() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "mapping",
        r#"
        m = new Mapping {
            ["a"] = 1
            ["b"] = 2
        }
        n = (m) { ["b"] = 20; ["c"] = 3 }
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, r#"m["a"]"#)?.as_int(),
        Some(1)
    );
    assert_eq!(
        engine.eval_expression_in(&module, r#"n["b"]"#)?.as_int(),
        Some(20)
    );
    assert_eq!(
        engine.eval_expression_in(&module, r#"n["c"]"#)?.as_int(),
        Some(3)
    );
    Ok(())
}

#[test]
fn test_const_and_fixed_cannot_be_amended() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "frozen",
            r#"
            base = new Dynamic { const v = 1 }
            broken = (base) { v = 2 }
            fixedBase = new Dynamic { fixed w = 1 }
            alsoBroken = (fixedBase) { w = 2 }
            "#,
        )
        .unwrap();

    let err = engine.eval_expression_in(&module, "broken").unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::ModifierViolation { modifier, .. } if *modifier == "const")
    );
    let err = engine.eval_expression_in(&module, "alsoBroken").unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::ModifierViolation { modifier, .. } if *modifier == "fixed")
    );
}

#[test]
fn test_hidden_members_are_not_rendered() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "hide",
        "x = new Dynamic { hidden secret = 1\nshown = 2 }",
    )?;
    // Hidden members still read...
    assert_eq!(
        engine.eval_expression_in(&module, "x.secret")?.as_int(),
        Some(1)
    );
    // ...but do not appear in output.
    let bytes = engine.evaluate_output_bytes(&module)?;
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("shown"));
    assert!(!text.contains("secret"));
    Ok(())
}

#[test]
fn test_classes_and_prototypes() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "classes",
        r#"
        class Server {
            host: String = "localhost"
            port: Int = 8080
        }
        s = new Server { port = 9090 }
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "s.port")?.as_int(),
        Some(9090)
    );
    assert_eq!(
        engine.eval_expression_in(&module, "s.host")?.as_str(),
        Some("localhost")
    );
    Ok(())
}

#[test]
fn test_typed_object_rejects_unknown_property() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "badtyped",
            "class Point { x: Int = 0 }\np = new Point { oops = 1 }",
        )
        .unwrap();
    let err = engine.eval_expression_in(&module, "p").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NoSuchTypedProperty { .. }));
}

#[test]
fn test_typed_property_type_enforced_on_read() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "typedread",
            "class Point { x: Int = 0 }\np = new Point { x = \"nope\" }",
        )
        .unwrap();
    let err = engine.eval_expression_in(&module, "p.x").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch { .. }));
}

#[test]
fn test_methods_dispatch_with_late_this() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "methods",
        r#"
        o = new Dynamic {
            amount = 10
            function inc(x) = x + amount
        }
        bigger = (o) { amount = 100 }
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "o.inc(5)")?.as_int(),
        Some(15)
    );
    assert_eq!(
        engine.eval_expression_in(&module, "bigger.inc(5)")?.as_int(),
        Some(105)
    );
    Ok(())
}

#[test]
fn test_imports() -> Result<(), Box<EvalError>> {
    let mut engine = Engine::new();
    let mut resolver = pkl::StaticModuleResolver::new();
    resolver.insert("modulepath:lib", "answer = 42");
    engine.set_module_resolver(resolver);

    let module = engine.load_module_str(
        "importer",
        "import \"modulepath:lib\" as lib\nvalue = lib.answer",
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "value")?.as_int(),
        Some(42)
    );
    Ok(())
}

#[test]
fn test_glob_imports() -> Result<(), Box<EvalError>> {
    let mut engine = Engine::new();
    let mut resolver = pkl::StaticModuleResolver::new();
    resolver.insert("modulepath:lib/a", "answer = 1");
    resolver.insert("modulepath:lib/b", "answer = 2");
    resolver.insert("modulepath:other", "answer = 3");
    engine.set_module_resolver(resolver);

    // The declaration form binds a map of URI to module.
    let module = engine.load_module_str(
        "globber",
        r#"
        import* "modulepath:lib/*" as libs
        count = libs.length
        second = libs["modulepath:lib/b"].answer
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "count")?.as_int(),
        Some(2)
    );
    assert_eq!(
        engine.eval_expression_in(&module, "second")?.as_int(),
        Some(2)
    );

    // The expression form produces the same mapping.
    assert_eq!(
        engine
            .eval_expression_in(
                &module,
                r#"import*("modulepath:lib/*")["modulepath:lib/a"].answer"#
            )?
            .as_int(),
        Some(1)
    );
    Ok(())
}

#[test]
fn test_security_policy_blocks_modules() {
    let mut engine = Engine::new();
    let mut resolver = pkl::StaticModuleResolver::new();
    resolver.insert("http://example.com/evil", "x = 1");
    engine.set_module_resolver(resolver);

    struct NoHttp;
    impl pkl::SecurityPolicy for NoHttp {
        fn allows_module(&self, uri: &str) -> bool {
            !uri.starts_with("http")
        }
        fn allows_resource(&self, _uri: &str) -> bool {
            true
        }
    }
    engine.set_security_policy(NoHttp);

    let err = engine.load_module("http://example.com/evil").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ModuleNotAllowed { .. }));
}

#[test]
fn test_amending_module_value_is_plain_object() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "chained",
        r#"
        a = new Dynamic { x = 1 }
        b = (a) { y = 2 } { z = 3 }
        "#,
    )?;
    // Chained amendment: each `{}` wraps the previous result.
    assert_eq!(engine.eval_expression_in(&module, "b.x")?.as_int(), Some(1));
    assert_eq!(engine.eval_expression_in(&module, "b.y")?.as_int(), Some(2));
    assert_eq!(engine.eval_expression_in(&module, "b.z")?.as_int(), Some(3));
    Ok(())
}

#[test]
fn test_read_resource() -> Result<(), Box<EvalError>> {
    let mut engine = Engine::new();
    let mut resolver = pkl::StaticModuleResolver::new();
    resolver.insert_resource("file:/etc/motd", "hello");
    engine.set_module_resolver(resolver);

    let module = engine.load_module_str(
        "resources",
        "motd = read(\"file:/etc/motd\")\nmissing = read?(\"file:/nope\")",
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "motd")?.as_str(),
        Some("hello")
    );
    assert!(matches!(
        engine.eval_expression_in(&module, "missing")?,
        Value::Null
    ));
    Ok(())
}
