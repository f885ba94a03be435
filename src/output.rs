//! Module implementing module output: `output.bytes`, `output.files`,
//! the pluggable renderer seam, and output-path validation.

use crate::dynamic::Value;
use crate::engine::{Engine, EvalCtx};
use crate::error::{ErrorKind, EvalError};
use crate::object::{MemberKey, Obj, ObjVariant};
use crate::token::Span;
use crate::Shared;
use std::collections::BTreeMap;

/// Process exit code: success.
pub const EXIT_OK: i32 = 0;
/// Process exit code: generic evaluation error.
pub const EXIT_ERROR: i32 = 1;
/// Process exit code: tests wrote new expected-output files.
pub const EXIT_TESTS_WROTE_EXAMPLES: i32 = 10;
/// Process exit code: formatting violations.
pub const EXIT_FORMAT_VIOLATIONS: i32 = 11;

/// Filename characters never allowed in `output.files` path specs.
const RESERVED_PATH_CHARS: &[char] = &['<', '>', ':', '"', '\\', '|', '?', '*'];

/// Renders an evaluated value to output bytes.
///
/// Concrete output formats (JSON, YAML, ...) live outside the core; the
/// engine only needs "value in, bytes out".
pub trait Renderer {
    /// Render a value, forcing member evaluation as needed.
    fn render(&self, ctx: &mut EvalCtx<'_>, value: &Value) -> Result<Vec<u8>, Box<EvalError>>;
    /// Name of the output format, used for `%{outputFormat}` substitution.
    fn format_name(&self) -> &str {
        "text"
    }
}

/// The default renderer: a plain textual form of the value tree.
#[derive(Debug, Clone, Default)]
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn render(&self, ctx: &mut EvalCtx<'_>, value: &Value) -> Result<Vec<u8>, Box<EvalError>> {
        let mut out = String::new();
        match value {
            // A module renders as its top-level bindings.
            Value::Object(obj) if matches!(obj.variant(), ObjVariant::Module) => {
                for key in obj.visible_keys() {
                    if matches!(&key, MemberKey::Name(name) if name.as_str() == "output") {
                        continue;
                    }
                    let member_value = ctx.read_member(obj, &key, Span::NONE)?;
                    out.push_str(&format!("{} = ", key));
                    render_value(ctx, &member_value, 0, &mut out)?;
                    out.push('\n');
                }
            }
            other => {
                render_value(ctx, other, 0, &mut out)?;
                out.push('\n');
            }
        }
        Ok(out.into_bytes())
    }
}

fn render_value(
    ctx: &mut EvalCtx<'_>,
    value: &Value,
    indent: usize,
    out: &mut String,
) -> Result<(), Box<EvalError>> {
    match value {
        Value::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    '\r' => out.push_str("\\r"),
                    c => out.push(c),
                }
            }
            out.push('"');
        }
        Value::Object(obj) => {
            out.push_str("{\n");
            let pad = "  ".repeat(indent + 1);
            for key in obj.visible_keys() {
                let member_value = ctx.read_member(obj, &key, Span::NONE)?;
                out.push_str(&pad);
                match &key {
                    MemberKey::Name(name) => {
                        out.push_str(name);
                        out.push_str(" = ");
                    }
                    MemberKey::Index(_) => (),
                    MemberKey::Key(k) => {
                        out.push('[');
                        out.push_str(&k.to_string());
                        out.push_str("] = ");
                    }
                }
                render_value(ctx, &member_value, indent + 1, out)?;
                out.push('\n');
            }
            out.push_str(&"  ".repeat(indent));
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
    Ok(())
}

impl Engine {
    /// Evaluate a module's `output.bytes`: the module's own `output`
    /// object when it defines one, otherwise the whole module through the
    /// configured renderer.
    pub fn evaluate_output_bytes(
        &self,
        module: &Shared<Obj>,
    ) -> Result<Vec<u8>, Box<EvalError>> {
        tracing::debug!("evaluating output bytes");
        let mut ctx = EvalCtx::new_root(self, module.clone());
        let output_key = MemberKey::Name("output".into());

        if Obj::lookup(module, &output_key).is_some() {
            let output = ctx.read_member(module, &output_key, Span::NONE)?;
            if let Value::Object(output_obj) = &output {
                return self.output_object_bytes(&mut ctx, output_obj);
            }
        }
        self.renderer()
            .render(&mut ctx, &Value::Object(module.clone()))
    }

    /// Bytes of one output object: explicit `bytes`/`text` wins, then a
    /// rendered `value`, then the rendered object itself.
    fn output_object_bytes(
        &self,
        ctx: &mut EvalCtx<'_>,
        output: &Shared<Obj>,
    ) -> Result<Vec<u8>, Box<EvalError>> {
        for name in &["bytes", "text"] {
            let key = MemberKey::Name((*name).into());
            if Obj::lookup(output, &key).is_some() {
                let value = ctx.read_member(output, &key, Span::NONE)?;
                return match value {
                    Value::Bytes(bytes) => Ok(bytes.as_ref().clone()),
                    Value::Str(text) => Ok(text.as_bytes().to_vec()),
                    other => Err(EvalError::new(
                        ErrorKind::TypeMismatch {
                            expected: "Bytes or String".to_string(),
                            actual: other.type_name().to_string(),
                        },
                        Span::NONE,
                    )),
                };
            }
        }
        let value_key = MemberKey::Name("value".into());
        if Obj::lookup(output, &value_key).is_some() {
            let value = ctx.read_member(output, &value_key, Span::NONE)?;
            return self.renderer().render(ctx, &value);
        }
        self.renderer()
            .render(ctx, &Value::Object(output.clone()))
    }

    /// Evaluate `output.files`: a map of validated relative paths to
    /// rendered bytes. Paths are checked against reserved characters,
    /// sandboxed under the (logical) output root, and checked for
    /// conflicts.
    pub fn evaluate_output_files(
        &self,
        module: &Shared<Obj>,
    ) -> Result<BTreeMap<String, Vec<u8>>, Box<EvalError>> {
        tracing::debug!("evaluating output files");
        let mut ctx = EvalCtx::new_root(self, module.clone());
        let mut files = BTreeMap::new();

        let output_key = MemberKey::Name("output".into());
        if Obj::lookup(module, &output_key).is_none() {
            return Ok(files);
        }
        let output = ctx.read_member(module, &output_key, Span::NONE)?;
        let output_obj = match output {
            Value::Object(obj) => obj,
            _ => return Ok(files),
        };
        let files_key = MemberKey::Name("files".into());
        if Obj::lookup(&output_obj, &files_key).is_none() {
            return Ok(files);
        }
        let files_value = ctx.read_member(&output_obj, &files_key, Span::NONE)?;
        let files_obj = match files_value {
            Value::Object(obj) => obj,
            Value::Null => return Ok(files),
            other => {
                return Err(EvalError::new(
                    ErrorKind::TypeMismatch {
                        expected: "Mapping".to_string(),
                        actual: other.type_name().to_string(),
                    },
                    Span::NONE,
                ))
            }
        };

        let module_name = module
            .module_info()
            .map(|info| info.name.to_string())
            .unwrap_or_default();
        let module_uri = module.module_info().and_then(|info| info.uri.clone());

        for key in files_obj.visible_keys() {
            let spec = match key.to_value() {
                Value::Str(s) => s.to_string(),
                other => {
                    return Err(EvalError::new(
                        ErrorKind::InvalidOutputPath {
                            path: other.to_string(),
                            reason: "path specs must be strings".to_string(),
                        },
                        Span::NONE,
                    ))
                }
            };

            let substituted = substitute_placeholders(
                &spec,
                &module_name,
                self.renderer().format_name(),
                module_uri.as_deref(),
            )?;
            let resolved = sandbox_path(&substituted)?;

            // Conflicts: same resolved path twice, or a path that is also
            // a directory of another path.
            if files.contains_key(&resolved) {
                return Err(EvalError::new(
                    ErrorKind::OutputPathConflict { path: resolved },
                    Span::NONE,
                ));
            }
            let as_dir = format!("{}/", resolved);
            if files.keys().any(|existing: &String| {
                existing.starts_with(&as_dir) || resolved.starts_with(&format!("{}/", existing))
            }) {
                return Err(EvalError::new(
                    ErrorKind::OutputPathConflict { path: resolved },
                    Span::NONE,
                ));
            }

            let file_output = ctx.read_member(&files_obj, &key, Span::NONE)?;
            let bytes = match &file_output {
                Value::Object(obj) => self.output_object_bytes(&mut ctx, obj)?,
                other => self.renderer().render(&mut ctx, other)?,
            };
            files.insert(resolved, bytes);
        }

        Ok(files)
    }
}

/// Substitute `%{moduleName}`, `%{outputFormat}` and `%{moduleDir}` in an
/// output path spec.
fn substitute_placeholders(
    spec: &str,
    module_name: &str,
    output_format: &str,
    module_uri: Option<&str>,
) -> Result<String, Box<EvalError>> {
    let mut out = spec.replace("%{moduleName}", module_name);
    out = out.replace("%{outputFormat}", output_format);
    if out.contains("%{moduleDir}") {
        let dir = module_uri
            .and_then(|uri| {
                let path = uri.strip_prefix("file://").or_else(|| uri.strip_prefix("file:"))?;
                let parent = std::path::Path::new(path).parent()?;
                Some(parent.to_string_lossy().into_owned())
            })
            .ok_or_else(|| {
                EvalError::new(
                    ErrorKind::InvalidOutputPath {
                        path: spec.to_string(),
                        reason: "%{moduleDir} requires a file-based module".to_string(),
                    },
                    Span::NONE,
                )
            })?;
        out = out.replace("%{moduleDir}", &dir);
    }
    Ok(out)
}

/// Validate a path spec and normalize it so that the result stays inside
/// the output directory.
fn sandbox_path(spec: &str) -> Result<String, Box<EvalError>> {
    let invalid = |reason: &str| {
        EvalError::new(
            ErrorKind::InvalidOutputPath {
                path: spec.to_string(),
                reason: reason.to_string(),
            },
            Span::NONE,
        )
    };

    if spec.is_empty() {
        return Err(invalid("path is empty"));
    }
    if spec.starts_with('/') {
        return Err(invalid("path must be relative"));
    }
    if spec.ends_with('/') {
        return Err(invalid("path names a directory"));
    }
    if let Some(c) = spec.chars().find(|c| RESERVED_PATH_CHARS.contains(c) || c.is_control()) {
        return Err(invalid(&format!("reserved character '{}'", c.escape_default())));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in spec.split('/') {
        match segment {
            "" | "." => (),
            ".." => {
                if segments.pop().is_none() {
                    return Err(invalid("path escapes the output directory"));
                }
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(invalid("path resolves to the output directory itself"));
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_rejects_escapes() {
        assert!(sandbox_path("../etc/passwd").is_err());
        assert!(sandbox_path("a/../../b").is_err());
        assert!(sandbox_path("/abs").is_err());
        assert!(sandbox_path("dir/").is_err());
        assert!(sandbox_path("a?.txt").is_err());
    }

    #[test]
    fn sandbox_normalizes() {
        assert_eq!(sandbox_path("a/./b/../c.txt").unwrap(), "a/c.txt");
        assert_eq!(sandbox_path("plain.yml").unwrap(), "plain.yml");
    }

    #[test]
    fn placeholders_substitute() {
        let out = substitute_placeholders(
            "%{moduleName}.%{outputFormat}",
            "config",
            "text",
            None,
        )
        .unwrap();
        assert_eq!(out, "config.text");
        assert!(substitute_placeholders("%{moduleDir}/x", "m", "text", None).is_err());
    }
}
