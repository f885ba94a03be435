use pkl::{Engine, EvalError, Lexer, Token};

fn tokens_of(src: &str) -> Vec<(Token, pkl::Span)> {
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    loop {
        let st = lexer.next_token();
        if matches!(st.token, Token::Eof) {
            break;
        }
        out.push((st.token, st.span));
    }
    out
}

#[test]
fn test_lexer_spans_round_trip() {
    let src = "x = foo.bar + 42 * 0x1_f\ny = \"abc\"";
    let tokens = tokens_of(src);

    // Spans are in order, non-overlapping, and slice back to real text.
    let mut last_end = 0;
    for (_, span) in &tokens {
        assert!(span.start() >= last_end);
        assert!(span.end() <= src.len());
        assert!(span.start() < span.end());
        last_end = span.end();
    }

    // Punctuation and keyword tokens slice to their own syntax.
    for (token, span) in &tokens {
        match token {
            Token::Equals | Token::Dot | Token::Plus | Token::Star => {
                assert_eq!(&src[span.start()..span.end()], token.syntax());
            }
            _ => (),
        }
    }
}

#[test]
fn test_lexer_numbers() {
    assert!(matches!(
        tokens_of("0x1F")[0].0,
        Token::IntConstant(31)
    ));
    assert!(matches!(tokens_of("0b1010")[0].0, Token::IntConstant(10)));
    assert!(matches!(tokens_of("0o17")[0].0, Token::IntConstant(15)));
    assert!(matches!(
        tokens_of("1_000_000")[0].0,
        Token::IntConstant(1_000_000)
    ));
    assert!(matches!(tokens_of("1.5")[0].0, Token::FloatConstant(_)));
    assert!(matches!(tokens_of("1e3")[0].0, Token::FloatConstant(_)));

    // Misplaced separators are lex errors.
    assert!(matches!(tokens_of("1__2")[0].0, Token::LexError(_)));
    assert!(matches!(tokens_of("12_")[0].0, Token::LexError(_)));
}

#[test]
fn test_lexer_dot_vs_fraction() {
    let tokens = tokens_of("3.max");
    assert!(matches!(tokens[0].0, Token::IntConstant(3)));
    assert!(matches!(tokens[1].0, Token::Dot));
    assert!(matches!(tokens[2].0, Token::Identifier(_)));
}

#[test]
fn test_lexer_comments_nest() {
    let tokens = tokens_of("a /* outer /* inner */ still */ b");
    assert_eq!(tokens.len(), 2);
    assert!(matches!(tokens[0].0, Token::Identifier(_)));
    assert!(matches!(tokens[1].0, Token::Identifier(_)));
}

#[test]
fn test_lexer_backtick_identifiers() {
    let tokens = tokens_of("`weird name` = 1");
    match &tokens[0].0 {
        Token::Identifier(name) => assert_eq!(name.as_str(), "weird name"),
        other => panic!("expected identifier, got {:?}", other),
    }

    // A backtick identifier may not cross a line.
    assert!(matches!(tokens_of("`ab\ncd`")[0].0, Token::LexError(_)));
}

#[test]
fn test_lexer_interpolation_scopes() {
    let tokens = tokens_of(r#""a\(x + "inner\(y)")b""#);
    let starts = tokens
        .iter()
        .filter(|(t, _)| matches!(t, Token::InterpolationStart))
        .count();
    assert_eq!(starts, 2);
    let ends = tokens
        .iter()
        .filter(|(t, _)| matches!(t, Token::StringEnd))
        .count();
    assert_eq!(ends, 2);
}

#[test]
fn test_lexer_pound_strings() {
    // Without matching pounds, `\(` is plain text.
    let tokens = tokens_of(r##"#"a\(b)c"#"##);
    assert!(tokens
        .iter()
        .all(|(t, _)| !matches!(t, Token::InterpolationStart)));

    // With matching pounds, interpolation is live again.
    let tokens = tokens_of(r##"#"a\#(b)c"#"##);
    assert!(tokens
        .iter()
        .any(|(t, _)| matches!(t, Token::InterpolationStart)));
}

#[test]
fn test_lexer_unterminated_string() {
    let tokens = tokens_of("\"abc\ndef\"");
    assert!(tokens.iter().any(|(t, _)| matches!(t, Token::LexError(_))));
}

#[test]
fn test_multiline_string_normalization() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    // CR, LF and CRLF all normalize to LF; the delimiting newlines are not
    // part of the value.
    let source = "x = \"\"\"\none\rtwo\nthree\r\nfour\n\"\"\"";
    let module = engine.load_module_str("strings", source)?;
    let value = engine.eval_expression_in(&module, "x")?;
    assert_eq!(value.as_str(), Some("one\ntwo\nthree\nfour"));
    Ok(())
}

#[test]
fn test_multiline_string_margin() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    let source = "x = \"\"\"\n  a\n  b\n  \"\"\"";
    let module = engine.load_module_str("strings", source)?;
    let value = engine.eval_expression_in(&module, "x")?;
    assert_eq!(value.as_str(), Some("a\nb"));
    Ok(())
}

#[test]
fn test_string_escapes() -> Result<(), Box<EvalError>> {
    let engine = Engine::new();
    assert_eq!(
        engine.eval_expression::<String>(r#""a\tb\nc\u{41}""#)?,
        "a\tb\nc\u{41}"
    );
    Ok(())
}
