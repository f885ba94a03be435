use pkl::{Engine, ErrorKind, EvalError, INT};

#[test]
fn test_is_checks() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();

    assert!(engine.eval_expression::<bool>("5 is Int")?);
    assert!(!engine.eval_expression::<bool>("5 is String")?);
    assert!(engine.eval_expression::<bool>("5 is Number")?);
    assert!(engine.eval_expression::<bool>("5.0 is Float")?);
    assert!(engine.eval_expression::<bool>("null is Int?")?);
    assert!(engine.eval_expression::<bool>("\"x\" is Int|String")?);
    assert!(engine.eval_expression::<bool>("5 is unknown")?);
    assert!(!engine.eval_expression::<bool>("5 is nothing")?);
    assert!(engine.eval_expression::<bool>("List(1) is List")?);
    assert!(engine.eval_expression::<bool>("\"json\" is \"json\"")?);
    assert!(!engine.eval_expression::<bool>("\"yaml\" is \"json\"")?);
    Ok(())
}

#[test]
fn test_as_casts() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();

    assert_eq!(engine.eval_expression::<INT>("5 as Int")?, 5);
    // Ints widen to floats through a cast.
    assert_eq!(engine.eval_expression::<f64>("5 as Float")?, 5.0);

    let err = engine.eval_expression::<INT>("\"x\" as Int").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch { .. }));
    Ok(())
}

#[test]
fn test_constrained_types() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();

    assert_eq!(
        engine.eval_expression::<INT>("let (x: Int(this > 0) = 5) x")?,
        5
    );
    let err = engine
        .eval_expression::<INT>("let (x: Int(this > 0) = -5) x")
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ConstraintViolated { .. }));
    Ok(())
}

#[test]
fn test_typed_bindings_and_parameters() {
    let engine = Engine::new();

    // A `let` binding checks its declared type.
    let err = engine
        .eval_expression::<INT>("let (x: Int = \"nope\") 1")
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch { .. }));

    // A lambda parameter checks its declared type on call.
    let err = engine
        .eval_expression::<INT>("let (f = (x: Int) -> x) f(\"nope\")")
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch { .. }));
    // The failure carries an inserted frame naming the binding.
    assert!(err.trace().iter().any(|f| f.target.contains("x")));
}

#[test]
fn test_property_type_annotations() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "typedprops",
        "port: Int = 8080\nname: String = \"web\"",
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "port")?.as_int(),
        Some(8080)
    );

    let module = engine.load_module_str("badprops", "port: Int = \"oops\"")?;
    let err = engine.eval_expression_in(&module, "port").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch { .. }));
    Ok(())
}

#[test]
fn test_union_tries_alternatives_in_order() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "unions",
        "value: Int|String = \"yes\"\nbad: Int|Boolean = \"no\"",
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "value")?.as_str(),
        Some("yes")
    );
    let err = engine.eval_expression_in(&module, "bad").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch { .. }));
    Ok(())
}

#[test]
fn test_typealias() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "aliases",
        "typealias Port = Int(this > 0)\nhttp: Port = 80",
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "http")?.as_int(),
        Some(80)
    );

    let module = engine.load_module_str(
        "badalias",
        "typealias Port = Int(this > 0)\nbad: Port = -1",
    )?;
    assert!(engine.eval_expression_in(&module, "bad").is_err());
    Ok(())
}

#[test]
fn test_parametric_collection_types() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();

    assert!(engine.eval_expression::<bool>("List(1, 2) is List<Int>")?);
    assert!(!engine.eval_expression::<bool>("List(1, \"x\") is List<Int>")?);
    assert!(engine.eval_expression::<bool>("Map(\"a\", 1) is Map<String, Int>")?);
    Ok(())
}

#[test]
fn test_class_instance_checks() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "classcheck",
        r#"
        class Animal { legs: Int = 4 }
        class Dog extends Animal { name: String = "rex" }
        d = new Dog {}
        dIsDog = d is Dog
        dIsAnimal = d is Animal
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "dIsDog")?.as_bool(),
        Some(true)
    );
    assert_eq!(
        engine.eval_expression_in(&module, "dIsAnimal")?.as_bool(),
        Some(true)
    );
    // Inherited declared properties resolve through the class ancestry.
    assert_eq!(
        engine.eval_expression_in(&module, "d.legs")?.as_int(),
        Some(4)
    );
    Ok(())
}

#[test]
fn test_function_types() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    assert!(engine.eval_expression::<bool>("((x) -> x) is (Int) -> Int")?);
    assert!(!engine.eval_expression::<bool>("((x, y) -> x) is (Int) -> Int")?);
    Ok(())
}
