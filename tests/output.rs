use pkl::{Engine, ErrorKind, EvalError};

#[test]
fn test_output_bytes_renders_module() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str("render", "a = 1\nb = \"x\"")?;
    let text = String::from_utf8(engine.evaluate_output_bytes(&module)?).unwrap();
    assert!(text.contains("a = 1"));
    assert!(text.contains("b = \"x\""));
    Ok(())
}

#[test]
fn test_output_text_overrides_rendering() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "explicit",
        "output { text = \"custom bytes\" }",
    )?;
    assert_eq!(
        engine.evaluate_output_bytes(&module)?,
        b"custom bytes".to_vec()
    );
    Ok(())
}

#[test]
fn test_output_files() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let module = engine.load_module_str(
        "files",
        r#"
        output {
            files {
                ["conf/%{moduleName}.txt"] { text = "hi" }
                ["other.txt"] { text = "there" }
            }
        }
        "#,
    )?;
    let files = engine.evaluate_output_files(&module)?;
    assert_eq!(files.len(), 2);
    assert_eq!(files.get("conf/files.txt").map(Vec::as_slice), Some(&b"hi"[..]));
    assert_eq!(files.get("other.txt").map(Vec::as_slice), Some(&b"there"[..]));
    Ok(())
}

#[test]
fn test_output_path_sandboxing() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "escape",
            r#"
            output {
                files {
                    ["../outside.txt"] { text = "bad" }
                }
            }
            "#,
        )
        .unwrap();
    let err = engine.evaluate_output_files(&module).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidOutputPath { .. }));
}

#[test]
fn test_output_path_reserved_characters() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "reserved",
            r#"
            output {
                files {
                    ["what?.txt"] { text = "bad" }
                }
            }
            "#,
        )
        .unwrap();
    let err = engine.evaluate_output_files(&module).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidOutputPath { .. }));
}

#[test]
fn test_output_path_conflicts() {
    let engine = Engine::new();
    // Two specs normalizing to the same path.
    let module = engine
        .load_module_str(
            "conflict",
            r#"
            output {
                files {
                    ["a/b.txt"] { text = "one" }
                    ["a/./b.txt"] { text = "two" }
                }
            }
            "#,
        )
        .unwrap();
    let err = engine.evaluate_output_files(&module).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::OutputPathConflict { .. }));

    // A path that is also another path's directory.
    let module = engine
        .load_module_str(
            "dirconflict",
            r#"
            output {
                files {
                    ["a"] { text = "one" }
                    ["a/b.txt"] { text = "two" }
                }
            }
            "#,
        )
        .unwrap();
    let err = engine.evaluate_output_files(&module).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::OutputPathConflict { .. }));
}

#[test]
fn test_module_dir_placeholder_requires_file_module() {
    let engine = Engine::new();
    let module = engine
        .load_module_str(
            "nodir",
            r#"
            output {
                files {
                    ["%{moduleDir}/x.txt"] { text = "bad" }
                }
            }
            "#,
        )
        .unwrap();
    let err = engine.evaluate_output_files(&module).unwrap_err();
    match err.kind() {
        ErrorKind::InvalidOutputPath { reason, .. } => {
            assert!(reason.contains("moduleDir"));
        }
        other => panic!("expected invalid output path, got {:?}", other),
    }
}

#[test]
fn test_exit_codes() {
    assert_eq!(pkl::EXIT_OK, 0);
    assert_eq!(pkl::EXIT_ERROR, 1);
    assert_eq!(pkl::EXIT_TESTS_WROTE_EXAMPLES, 10);
    assert_eq!(pkl::EXIT_FORMAT_VIOLATIONS, 11);
}
