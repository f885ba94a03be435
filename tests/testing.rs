use pkl::{Engine, EvalError, ExampleOutcome};

#[test]
fn test_facts_pass() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "pass",
        r#"
        amends "pkl:test"
        facts {
            ["ok"] {
                1 == 1
                2 + 2 == 4
            }
        }
        "#,
    )?;
    let report = engine.evaluate_test(&module, None)?;
    assert_eq!(report.facts.len(), 1);
    assert_eq!(report.facts[0].name, "ok");
    assert_eq!(report.facts[0].asserts.len(), 2);
    assert!(report.passed());
    assert_eq!(report.exit_code(), pkl::EXIT_OK);
    Ok(())
}

#[test]
fn test_facts_fail() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "fail",
        r#"
        amends "pkl:test"
        facts {
            ["arithmetic still works"] {
                1 == 2
                2 == 2
            }
        }
        "#,
    )?;
    let report = engine.evaluate_test(&module, None)?;
    assert!(!report.passed());
    assert_eq!(report.exit_code(), pkl::EXIT_ERROR);
    assert!(!report.facts[0].asserts[0].passed);
    assert!(report.facts[0].asserts[1].passed);
    Ok(())
}

#[test]
fn test_fact_error_is_reported() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "erroring",
        r#"
        amends "pkl:test"
        facts {
            ["boom"] {
                throw("nope") == true
            }
        }
        "#,
    )?;
    let report = engine.evaluate_test(&module, None)?;
    assert!(!report.passed());
    assert!(report.facts[0].asserts[0].error.is_some());
    Ok(())
}

#[test]
fn test_examples_written_exit_code() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "writes",
        r#"
        amends "pkl:test"
        facts {
            ["fine"] { true }
        }
        examples {
            ["sample"] { 42 }
        }
        "#,
    )?;
    let report = engine.evaluate_test(&module, None)?;
    assert!(matches!(
        report.examples[0].outcome,
        ExampleOutcome::Written
    ));
    assert_eq!(report.examples_written(), 1);
    assert_eq!(report.exit_code(), pkl::EXIT_TESTS_WROTE_EXAMPLES);
    Ok(())
}

#[test]
fn test_examples_roundtrip_against_files() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let source = r#"
        amends "pkl:test"
        examples {
            ["answer"] { 42 }
        }
    "#;
    let dir = std::env::temp_dir().join(format!(
        "pkl-test-{}-{}",
        std::process::id(),
        "examples_roundtrip"
    ));
    std::fs::create_dir_all(&dir).unwrap();

    // First run writes the expected file.
    let module = engine.load_module_str("roundtrip", source)?;
    let report = engine.evaluate_test(&module, Some(&dir))?;
    assert!(matches!(
        report.examples[0].outcome,
        ExampleOutcome::Written
    ));
    assert_eq!(report.exit_code(), pkl::EXIT_TESTS_WROTE_EXAMPLES);

    // Second run compares and passes.
    let module = engine.load_module_str("roundtrip", source)?;
    let report = engine.evaluate_test(&module, Some(&dir))?;
    assert!(matches!(report.examples[0].outcome, ExampleOutcome::Passed));
    assert_eq!(report.exit_code(), pkl::EXIT_OK);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[test]
fn test_junit_xml_shape() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "junit",
        r#"
        amends "pkl:test"
        facts {
            ["good"] { true }
            ["bad"] { false }
        }
        "#,
    )?;
    let report = engine.evaluate_test(&module, None)?;
    let xml = report.to_junit_xml();

    assert!(xml.contains("<testsuite name=\"junit\""));
    assert!(xml.contains("classname=\"junit.facts\""));
    assert!(xml.contains("name=\"good\""));
    assert!(xml.contains("<failure message=\"assertion failed\">"));

    let suites = pkl::junit_suites("all", &[report]);
    assert!(suites.starts_with("<testsuites name=\"all\">"));
    assert!(suites.trim_end().ends_with("</testsuites>"));
    Ok(())
}

#[test]
fn test_fact_assertion_sources_in_report() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "sources",
        r#"
        amends "pkl:test"
        facts {
            ["math"] { 1 + 1 == 3 }
        }
        "#,
    )?;
    let report = engine.evaluate_test(&module, None)?;
    // The failing assertion quotes its source expression.
    assert!(report.facts[0].asserts[0].source.contains("1 + 1 == 3"));
    Ok(())
}
