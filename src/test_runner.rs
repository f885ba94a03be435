//! Module implementing the test runner for modules amending `pkl:test`.
//!
//! Facts are named groups of boolean assertions; examples are named values
//! whose rendered output is compared against sibling expected-output files.
//! A missing expected file is written on first run and reported as such.

use crate::dynamic::Value;
use crate::engine::{Engine, EvalCtx};
use crate::error::EvalError;
use crate::object::{MemberKey, Obj};
use crate::output::{EXIT_ERROR, EXIT_OK, EXIT_TESTS_WROTE_EXAMPLES};
use crate::token::Span;
use crate::Shared;
use std::fmt::Write as _;
use std::path::Path;

/// Outcome of one assertion inside a fact.
#[derive(Debug, Clone)]
pub struct AssertResult {
    /// Source text of the assertion expression, when available.
    pub source: String,
    /// Did the assertion evaluate to `true`?
    pub passed: bool,
    /// Evaluation failure, if the assertion threw.
    pub error: Option<String>,
}

/// Outcome of one named fact.
#[derive(Debug, Clone)]
pub struct FactResult {
    /// The fact's name.
    pub name: String,
    /// Its assertions, in source order.
    pub asserts: Vec<AssertResult>,
}

impl FactResult {
    /// A fact passes iff all its assertions pass.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.asserts.iter().all(|a| a.passed && a.error.is_none())
    }
}

/// Outcome of one named example.
#[derive(Debug, Clone)]
pub enum ExampleOutcome {
    /// Rendered output matched the expected file.
    Passed,
    /// No expected file existed; the rendered output was recorded.
    Written,
    /// Rendered output differed from the expected file.
    Mismatch {
        /// Contents of the expected file.
        expected: String,
        /// The freshly rendered output.
        actual: String,
    },
    /// Evaluation of the example failed.
    Error(String),
}

/// One named example's result.
#[derive(Debug, Clone)]
pub struct ExampleResult {
    /// The example's name.
    pub name: String,
    /// What happened.
    pub outcome: ExampleOutcome,
}

/// The report of one tested module.
#[derive(Debug, Clone, Default)]
pub struct TestReport {
    /// Name of the tested module.
    pub module_name: String,
    /// Fact results in source order.
    pub facts: Vec<FactResult>,
    /// Example results in source order.
    pub examples: Vec<ExampleResult>,
}

impl TestReport {
    /// Did every fact and example pass?
    #[must_use]
    pub fn passed(&self) -> bool {
        self.facts.iter().all(FactResult::passed)
            && self
                .examples
                .iter()
                .all(|e| matches!(e.outcome, ExampleOutcome::Passed))
    }

    /// Number of examples newly written this run.
    #[must_use]
    pub fn examples_written(&self) -> usize {
        self.examples
            .iter()
            .filter(|e| matches!(e.outcome, ExampleOutcome::Written))
            .count()
    }

    /// The exit code this report maps to: `0` for a clean pass, `10` when
    /// the only deviation is freshly written examples, `1` otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        let failed = self.facts.iter().any(|f| !f.passed())
            || self.examples.iter().any(|e| {
                matches!(
                    e.outcome,
                    ExampleOutcome::Mismatch { .. } | ExampleOutcome::Error(_)
                )
            });
        if failed {
            EXIT_ERROR
        } else if self.examples_written() > 0 {
            EXIT_TESTS_WROTE_EXAMPLES
        } else {
            EXIT_OK
        }
    }

    /// Render this report as one JUnit `<testsuite>` element.
    #[must_use]
    pub fn to_junit_xml(&self) -> String {
        let mut out = String::new();
        self.write_junit(&mut out);
        out
    }

    fn counts(&self) -> (usize, usize, usize) {
        let mut tests = 0;
        let mut failures = 0;
        let mut errors = 0;
        for fact in &self.facts {
            tests += 1;
            if fact.asserts.iter().any(|a| a.error.is_some()) {
                errors += 1;
            } else if !fact.passed() {
                failures += 1;
            }
        }
        for example in &self.examples {
            tests += 1;
            match &example.outcome {
                ExampleOutcome::Mismatch { .. } => failures += 1,
                ExampleOutcome::Error(_) => errors += 1,
                _ => (),
            }
        }
        (tests, failures, errors)
    }

    fn write_junit(&self, out: &mut String) {
        let (tests, failures, errors) = self.counts();
        let _ = writeln!(
            out,
            "<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\">",
            xml_escape(&self.module_name),
            tests,
            failures,
            errors
        );
        for fact in &self.facts {
            let _ = write!(
                out,
                "  <testcase classname=\"{}.facts\" name=\"{}\"",
                xml_escape(&self.module_name),
                xml_escape(&fact.name)
            );
            let failing: Vec<&AssertResult> = fact
                .asserts
                .iter()
                .filter(|a| !a.passed || a.error.is_some())
                .collect();
            if failing.is_empty() {
                let _ = writeln!(out, "/>");
            } else {
                let _ = writeln!(out, ">");
                for assert in failing {
                    match &assert.error {
                        Some(error) => {
                            let _ = writeln!(
                                out,
                                "    <error message=\"{}\">{}</error>",
                                xml_escape(error),
                                xml_escape(&assert.source)
                            );
                        }
                        None => {
                            let _ = writeln!(
                                out,
                                "    <failure message=\"assertion failed\">{}</failure>",
                                xml_escape(&assert.source)
                            );
                        }
                    }
                }
                let _ = writeln!(out, "  </testcase>");
            }
        }
        for example in &self.examples {
            let _ = write!(
                out,
                "  <testcase classname=\"{}.examples\" name=\"{}\"",
                xml_escape(&self.module_name),
                xml_escape(&example.name)
            );
            match &example.outcome {
                ExampleOutcome::Passed | ExampleOutcome::Written => {
                    let _ = writeln!(out, "/>");
                }
                ExampleOutcome::Mismatch { expected, actual } => {
                    let _ = writeln!(out, ">");
                    let _ = writeln!(
                        out,
                        "    <failure message=\"output mismatch ({} bytes expected, {} bytes actual)\">{}</failure>",
                        expected.len(),
                        actual.len(),
                        xml_escape(actual)
                    );
                    let _ = writeln!(out, "  </testcase>");
                }
                ExampleOutcome::Error(error) => {
                    let _ = writeln!(out, ">");
                    let _ = writeln!(
                        out,
                        "    <error message=\"{}\">{}</error>",
                        xml_escape(error),
                        xml_escape(error)
                    );
                    let _ = writeln!(out, "  </testcase>");
                }
            }
        }
        let _ = writeln!(out, "</testsuite>");
    }
}

/// Wrap several module reports into one `<testsuites>` aggregation.
#[must_use]
pub fn junit_suites(name: &str, reports: &[TestReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<testsuites name=\"{}\">", xml_escape(name));
    for report in reports {
        report.write_junit(&mut out);
    }
    let _ = writeln!(out, "</testsuites>");
    out
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

impl Engine {
    /// Run a test module's `facts` and `examples`.
    ///
    /// `expected_dir` is where example expected-output files live; with
    /// `None`, every example counts as newly written and nothing touches
    /// the filesystem.
    pub fn evaluate_test(
        &self,
        module: &Shared<Obj>,
        expected_dir: Option<&Path>,
    ) -> Result<TestReport, Box<EvalError>> {
        let module_name = module
            .module_info()
            .map(|info| info.name.to_string())
            .unwrap_or_else(|| "test".to_string());
        tracing::debug!(module = %module_name, "running tests");

        let mut report = TestReport {
            module_name: module_name.clone(),
            ..TestReport::default()
        };
        let mut ctx = EvalCtx::new_root(self, module.clone());

        report.facts = self.run_facts(&mut ctx, module)?;
        report.examples = self.run_examples(&mut ctx, module, expected_dir)?;

        tracing::debug!(
            module = %module_name,
            passed = report.passed(),
            exit_code = report.exit_code(),
            "test run finished"
        );
        Ok(report)
    }

    fn run_facts(
        &self,
        ctx: &mut EvalCtx<'_>,
        module: &Shared<Obj>,
    ) -> Result<Vec<FactResult>, Box<EvalError>> {
        let facts_key = MemberKey::Name("facts".into());
        if Obj::lookup(module, &facts_key).is_none() {
            return Ok(Vec::new());
        }
        let facts_value = ctx.read_member(module, &facts_key, Span::NONE)?;
        let facts_obj = match facts_value {
            Value::Object(obj) => obj,
            _ => return Ok(Vec::new()),
        };

        let source = module
            .module_info()
            .map(|info| info.source.clone())
            .unwrap_or_default();

        let mut results = Vec::new();
        for fact_key in facts_obj.visible_keys() {
            let name = fact_key.to_value().to_string();
            let fact_value = ctx.read_member(&facts_obj, &fact_key, Span::NONE)?;
            let fact_obj = match fact_value {
                Value::Object(obj) => obj,
                other => {
                    results.push(FactResult {
                        name,
                        asserts: vec![AssertResult {
                            source: String::new(),
                            passed: false,
                            error: Some(format!(
                                "a fact must be an object of assertions, not {}",
                                other.type_name()
                            )),
                        }],
                    });
                    continue;
                }
            };

            let mut asserts = Vec::new();
            for assert_key in fact_obj.visible_keys() {
                let assert_source = Obj::lookup(&fact_obj, &assert_key)
                    .map(|(_, member)| slice_span(&source, member.header_span))
                    .unwrap_or_default();
                match ctx.read_member(&fact_obj, &assert_key, Span::NONE) {
                    Ok(Value::Bool(passed)) => asserts.push(AssertResult {
                        source: assert_source,
                        passed,
                        error: None,
                    }),
                    Ok(other) => asserts.push(AssertResult {
                        source: assert_source,
                        passed: false,
                        error: Some(format!(
                            "an assertion must be a Boolean, not {}",
                            other.type_name()
                        )),
                    }),
                    Err(err) => asserts.push(AssertResult {
                        source: assert_source,
                        passed: false,
                        error: Some(err.to_string()),
                    }),
                }
            }
            results.push(FactResult { name, asserts });
        }
        Ok(results)
    }

    fn run_examples(
        &self,
        ctx: &mut EvalCtx<'_>,
        module: &Shared<Obj>,
        expected_dir: Option<&Path>,
    ) -> Result<Vec<ExampleResult>, Box<EvalError>> {
        let examples_key = MemberKey::Name("examples".into());
        if Obj::lookup(module, &examples_key).is_none() {
            return Ok(Vec::new());
        }
        let examples_value = ctx.read_member(module, &examples_key, Span::NONE)?;
        let examples_obj = match examples_value {
            Value::Object(obj) => obj,
            _ => return Ok(Vec::new()),
        };
        let module_name = module
            .module_info()
            .map(|info| info.name.to_string())
            .unwrap_or_else(|| "test".to_string());

        let mut results = Vec::new();
        for example_key in examples_obj.visible_keys() {
            let name = example_key.to_value().to_string();

            let rendered = ctx
                .read_member(&examples_obj, &example_key, Span::NONE)
                .and_then(|value| self.renderer().render(ctx, &value));
            let actual = match rendered {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    results.push(ExampleResult {
                        name,
                        outcome: ExampleOutcome::Error(err.to_string()),
                    });
                    continue;
                }
            };

            let outcome = match expected_dir {
                None => ExampleOutcome::Written,
                Some(dir) => {
                    let file = dir.join(expected_file_name(&module_name, &name));
                    if file.exists() {
                        match std::fs::read_to_string(&file) {
                            Ok(expected) if expected == actual => ExampleOutcome::Passed,
                            Ok(expected) => ExampleOutcome::Mismatch { expected, actual },
                            Err(err) => ExampleOutcome::Error(format!(
                                "cannot read expected output {}: {}",
                                file.display(),
                                err
                            )),
                        }
                    } else {
                        match std::fs::write(&file, &actual) {
                            Ok(()) => ExampleOutcome::Written,
                            Err(err) => ExampleOutcome::Error(format!(
                                "cannot write expected output {}: {}",
                                file.display(),
                                err
                            )),
                        }
                    }
                }
            };
            results.push(ExampleResult { name, outcome });
        }
        Ok(results)
    }
}

fn expected_file_name(module_name: &str, example_name: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    };
    format!(
        "{}.{}.expected",
        sanitize(module_name),
        sanitize(example_name)
    )
}

fn slice_span(source: &str, span: Span) -> String {
    if span.is_none() || span.end() > source.len() {
        return String::new();
    }
    source[span.start()..span.end()].to_string()
}
