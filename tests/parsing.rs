use pkl::{Engine, EvalError, INT};

#[test]
fn test_operator_precedence() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();

    assert_eq!(engine.eval_expression::<INT>("2 + 3 * 4")?, 14);
    assert_eq!(engine.eval_expression::<INT>("(2 + 3) * 4")?, 20);
    assert_eq!(engine.eval_expression::<INT>("10 - 2 - 3")?, 5);
    assert_eq!(engine.eval_expression::<INT>("2 ** 3 ** 2")?, 512);
    assert_eq!(engine.eval_expression::<INT>("-2 ** 2")?, 4);
    assert_eq!(engine.eval_expression::<INT>("7 ~/ 2")?, 3);
    assert_eq!(engine.eval_expression::<INT>("7 % 3")?, 1);
    assert!(engine.eval_expression::<bool>("1 + 1 == 2 && 3 < 4")?);
    assert!(engine.eval_expression::<bool>("false || !false")?);
    Ok(())
}

#[test]
fn test_division_is_float() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    assert_eq!(engine.eval_expression::<f64>("7 / 2")?, 3.5);
    Ok(())
}

#[test]
fn test_if_let_lambda() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();

    assert_eq!(engine.eval_expression::<INT>("if (1 < 2) 10 else 20")?, 10);
    assert_eq!(
        engine.eval_expression::<INT>("let (x = 5) x * x")?,
        25
    );
    assert_eq!(
        engine.eval_expression::<INT>("let (f = (x) -> x * 2) f(21)")?,
        42
    );
    assert_eq!(
        engine.eval_expression::<INT>("let (f = (a, b) -> a + b) f(1, 2)")?,
        3
    );
    // Nested lets shadow properly.
    assert_eq!(
        engine.eval_expression::<INT>("let (x = 1) let (x = x + 1) x")?,
        2
    );
    Ok(())
}

#[test]
fn test_pipe_and_coalesce() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    assert_eq!(engine.eval_expression::<INT>("null ?? 7")?, 7);
    assert_eq!(engine.eval_expression::<INT>("3 ?? 7")?, 3);
    assert_eq!(
        engine.eval_expression::<INT>("3 |> ((x) -> x + 1)")?,
        4
    );
    Ok(())
}

#[test]
fn test_null_safety_operators() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    assert!(engine.eval_expression::<bool>("null?.foo == null")?);
    assert_eq!(engine.eval_expression::<INT>("5!!")?, 5);
    assert!(engine.eval_expression::<INT>("null!!").is_err());
    Ok(())
}

#[test]
fn test_parse_errors() {
    let engine = Engine::new();

    assert!(engine.compile("x =").is_err());
    assert!(engine.compile("x = (1 + ").is_err());
    assert!(engine.compile("class {}").is_err());
    assert!(engine.eval_expression::<INT>("1 +").is_err());

    // The error carries a usable span.
    let err = engine.compile("x = @@").unwrap_err();
    assert!(!err.span().is_none());
}

#[test]
fn test_amend_requires_same_line() {
    let engine = Engine::new();
    // A line break between a value and `{` means the brace does not amend.
    let result = engine.load_module_str("m", "a = new Dynamic { x = 1 }\nb = a\n{ y = 2 }");
    assert!(result.is_err());
}

#[test]
fn test_module_structure() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "structured",
        r#"
        module example.config

        /// The port to serve on.
        port = 8080
        local secret = 99
        function plusSecret(x) = x + secret
        visible = plusSecret(1)
        "#,
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "port")?.as_int(),
        Some(8080)
    );
    assert_eq!(
        engine.eval_expression_in(&module, "visible")?.as_int(),
        Some(100)
    );
    Ok(())
}

#[test]
fn test_trailing_commas() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "trailing",
        "function add(a, b,) = a + b\nsum = add(1, 2,)",
    )?;
    assert_eq!(
        engine.eval_expression_in(&module, "sum")?.as_int(),
        Some(3)
    );
    Ok(())
}

#[test]
fn test_semicolons_separate_members() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str("semis", "a = 1; b = 2")?;
    assert_eq!(engine.eval_expression_in(&module, "a + b")?.as_int(), Some(3));
    Ok(())
}
