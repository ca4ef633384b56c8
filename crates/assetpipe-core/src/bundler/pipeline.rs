//! The transform pipeline: ordered content conversions for one file.
//!
//! Transforms run strictly in declaration order. Each one consumes the
//! previous stage and produces the next; a transform that cannot accept the
//! current stage is a configuration error reported against the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::codes;
use super::naming::{split_name, OutputTemplate};
use super::rules::{Rule, DEFAULT_RESOURCE_TEMPLATE};
use super::BuildError;
use crate::compiler::ScriptCompiler;
use crate::config::Mode;
use crate::css::{self, sass, CssOptions};

/// A single transform step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformKind {
    /// TypeScript / JSX to JavaScript.
    Script,
    /// SCSS / Sass to CSS; plain CSS passes through.
    Sass,
    /// lightningcss normalize, prefix, minify.
    Css,
    /// Move the stylesheet into the bundle's CSS artifact.
    ExtractCss,
    /// Emit the bytes unchanged under the rule's output template.
    Resource,
}

impl TransformKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Sass => "sass",
            Self::Css => "css",
            Self::ExtractCss => "extract-css",
            Self::Resource => "resource",
        }
    }
}

/// What a file became after its pipeline ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutput {
    /// JavaScript with ES module or CommonJS syntax, linked later.
    Script { code: String },
    /// A stylesheet; `extracted` ones go to the CSS artifact, the rest are
    /// injected with a `<style>` element at runtime.
    Style { css: String, extracted: bool },
    /// A file emitted as-is; the module exports its public URL.
    Resource { path: String, bytes: Arc<Vec<u8>> },
}

impl ModuleOutput {
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Script { .. } => "script",
            Self::Style { .. } => "style",
            Self::Resource { .. } => "resource",
        }
    }
}

/// Shared, read-only inputs of every transform.
pub struct PipelineContext<'a> {
    pub compiler: &'a dyn ScriptCompiler,
    pub minify: bool,
    pub mode: Mode,
}

enum Stage {
    Source(Vec<u8>),
    Script(String),
    Style { css: String, extracted: bool },
    Resource { path: String, bytes: Vec<u8> },
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Script(_) => "script",
            Self::Style { .. } => "style",
            Self::Resource { .. } => "resource",
        }
    }
}

/// Run the matched rule's transforms (or the pass-through) over one file.
///
/// `rel_path` is the project-relative path used in diagnostics; `path` is the
/// absolute path handed to compilers for `@import` resolution.
pub fn run_pipeline(
    ctx: &PipelineContext<'_>,
    rule: Option<&Rule>,
    rel_path: &str,
    path: &Path,
    bytes: Vec<u8>,
) -> Result<ModuleOutput, BuildError> {
    let fail = |code: &'static str, message: String| BuildError::new(code, message).with_path(rel_path);

    let Some(rule) = rule else {
        return pass_through(ctx, rel_path, path, bytes);
    };

    let mut stage = Stage::Source(bytes);
    for transform in rule.transforms() {
        tracing::trace!(path = rel_path, rule = %rule.name, transform = transform.as_str(), "transform");

        stage = match (*transform, stage) {
            (TransformKind::Script, Stage::Source(bytes)) => {
                let source = utf8(bytes, rel_path)?;
                let code = ctx
                    .compiler
                    .transpile(path, &source)
                    .map_err(|e| fail(codes::BUILD_SCRIPT_FAILED, e.message))?;
                Stage::Script(code)
            }
            (TransformKind::Sass, Stage::Source(bytes)) => {
                let source = utf8(bytes, rel_path)?;
                let css = if sass::is_sass_file(path) {
                    let options = sass::SassOptions {
                        minify: ctx.minify,
                        filename: Some(path.display().to_string()),
                        ..Default::default()
                    };
                    sass::compile_sass(&source, &options)
                        .map_err(|e| fail(codes::BUILD_STYLE_FAILED, e.to_string()))?
                } else {
                    source
                };
                Stage::Style {
                    css,
                    extracted: false,
                }
            }
            (TransformKind::Css, Stage::Source(bytes)) => Stage::Style {
                css: process_css(ctx, &utf8(bytes, rel_path)?, rel_path)?,
                extracted: false,
            },
            (TransformKind::Css, Stage::Style { css, extracted }) => Stage::Style {
                css: process_css(ctx, &css, rel_path)?,
                extracted,
            },
            (TransformKind::ExtractCss, Stage::Source(bytes)) => Stage::Style {
                css: utf8(bytes, rel_path)?,
                extracted: true,
            },
            (TransformKind::ExtractCss, Stage::Style { css, .. }) => Stage::Style {
                css,
                extracted: true,
            },
            (TransformKind::Resource, Stage::Source(bytes)) => Stage::Resource {
                path: resource_path(rule.filename(), path, &bytes),
                bytes,
            },
            (transform, stage) => {
                return Err(fail(
                    codes::BUILD_TRANSFORM_ORDER,
                    format!(
                        "rule `{}`: transform `{}` cannot run on {} output",
                        rule.name,
                        transform.as_str(),
                        stage.name()
                    ),
                ));
            }
        };
    }

    Ok(match stage {
        Stage::Source(bytes) => resource(DEFAULT_RESOURCE_TEMPLATE, path, bytes)?,
        Stage::Script(code) => ModuleOutput::Script {
            code: define_mode(&code, ctx.mode),
        },
        Stage::Style { css, extracted } => ModuleOutput::Style { css, extracted },
        Stage::Resource { path, bytes } => ModuleOutput::Resource {
            path,
            bytes: Arc::new(bytes),
        },
    })
}

/// Files no rule claims: plain JavaScript is linked as-is, anything else is
/// copied as a resource.
fn pass_through(
    ctx: &PipelineContext<'_>,
    rel_path: &str,
    path: &Path,
    bytes: Vec<u8>,
) -> Result<ModuleOutput, BuildError> {
    if is_plain_script(path) {
        let source = utf8(bytes, rel_path)?;
        let code = ctx.compiler.normalize(path, &source).map_err(|e| {
            BuildError::new(codes::BUILD_SCRIPT_FAILED, e.message).with_path(rel_path)
        })?;
        return Ok(ModuleOutput::Script {
            code: define_mode(&code, ctx.mode),
        });
    }
    resource(DEFAULT_RESOURCE_TEMPLATE, path, bytes)
}

fn resource(template: &str, path: &Path, bytes: Vec<u8>) -> Result<ModuleOutput, BuildError> {
    let template = OutputTemplate::parse(template)
        .map_err(|e| BuildError::new(codes::BUILD_CONFIG_INVALID, e.to_string()))?;
    Ok(ModuleOutput::Resource {
        path: resource_path(&template, path, &bytes),
        bytes: Arc::new(bytes),
    })
}

fn resource_path(template: &OutputTemplate, path: &Path, bytes: &[u8]) -> String {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let (name, ext) = split_name(file_name);
    template.render(name, ext, bytes)
}

fn process_css(ctx: &PipelineContext<'_>, source: &str, rel_path: &str) -> Result<String, BuildError> {
    let options = CssOptions {
        minify: ctx.minify,
        filename: Some(rel_path.to_string()),
        targets: None,
    };
    css::process_css(source, &options)
        .map_err(|e| BuildError::new(codes::BUILD_STYLE_FAILED, e.to_string()).with_path(rel_path))
}

fn utf8(bytes: Vec<u8>, rel_path: &str) -> Result<String, BuildError> {
    String::from_utf8(bytes).map_err(|e| {
        BuildError::new(codes::BUILD_READ_FAILED, format!("not valid UTF-8: {e}")).with_path(rel_path)
    })
}

/// `.js`, `.mjs` and `.cjs` files.
#[must_use]
pub fn is_plain_script(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "js" | "mjs" | "cjs"))
}

/// Inline `process.env.NODE_ENV` the way browsers expect.
fn define_mode(code: &str, mode: Mode) -> String {
    if code.contains("process.env.NODE_ENV") {
        code.replace("process.env.NODE_ENV", &format!("\"{}\"", mode.as_str()))
    } else {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::rules::RuleSet;
    use crate::compiler::{CompilerError, SwcCompiler};
    use crate::config::default_rules;
    use std::path::PathBuf;

    /// Records calls instead of compiling, to check ordering and wiring.
    struct EchoCompiler;

    impl ScriptCompiler for EchoCompiler {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn transpile(&self, _path: &Path, source: &str) -> Result<String, CompilerError> {
            if source.contains("syntax error") {
                return Err(CompilerError::parse_error("1:1: unexpected token"));
            }
            Ok(format!("/* transpiled */{source}"))
        }
        fn normalize(&self, _path: &Path, source: &str) -> Result<String, CompilerError> {
            Ok(format!("/* normalized */{source}"))
        }
        fn minify(&self, _name: &str, code: &str) -> Result<String, CompilerError> {
            Ok(code.to_string())
        }
    }

    fn run(rel: &str, bytes: &[u8], minify: bool) -> Result<ModuleOutput, BuildError> {
        let rules = RuleSet::from_config(&default_rules()).unwrap();
        let ctx = PipelineContext {
            compiler: &EchoCompiler,
            minify,
            mode: Mode::Production,
        };
        run_pipeline(
            &ctx,
            rules.match_path(rel),
            rel,
            &PathBuf::from("/project").join(rel),
            bytes.to_vec(),
        )
    }

    #[test]
    fn test_script_rule() {
        let out = run("src/app.ts", b"if (process.env.NODE_ENV) {}", false).unwrap();
        assert_eq!(
            out,
            ModuleOutput::Script {
                code: "/* transpiled */if (\"production\") {}".into()
            }
        );
    }

    #[test]
    fn test_script_error_names_file() {
        let err = run("src/app.ts", b"syntax error", false).unwrap_err();
        assert_eq!(err.code, codes::BUILD_SCRIPT_FAILED);
        assert_eq!(err.path.as_deref(), Some("src/app.ts"));
    }

    #[test]
    fn test_style_rule_extracts() {
        let out = run("src/styles/main.scss", b"$c: red; .a { .b { color: $c; } }", true).unwrap();
        match out {
            ModuleOutput::Style { css, extracted } => {
                assert!(extracted);
                assert_eq!(css, ".a .b{color:red}");
            }
            other => panic!("expected style, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_css_skips_sass() {
        let out = run("src/reset.css", b"* { margin: 0 }", true).unwrap();
        assert_eq!(
            out,
            ModuleOutput::Style {
                css: "*{margin:0}".into(),
                extracted: true
            }
        );
    }

    #[test]
    fn test_image_resource() {
        let out = run("src/assets/images/logo.png", b"\x89PNG\r\n", false).unwrap();
        match out {
            ModuleOutput::Resource { path, bytes } => {
                assert_eq!(path, "assets/images/logo.png");
                assert_eq!(bytes.as_slice(), b"\x89PNG\r\n");
            }
            other => panic!("expected resource, got {other:?}"),
        }
    }

    #[test]
    fn test_pass_through() {
        let out = run("src/legacy.js", b"var a = 1;", false).unwrap();
        assert_eq!(
            out,
            ModuleOutput::Script {
                code: "/* normalized */var a = 1;".into()
            }
        );

        let out = run("src/data/strings.json", b"{}", false).unwrap();
        assert!(matches!(out, ModuleOutput::Resource { ref path, .. } if path == "assets/strings.json"));
    }

    #[test]
    fn test_transform_order_error() {
        let rules = RuleSet::from_config(&[crate::config::RuleConfig {
            name: "odd".into(),
            test: r"\.txt$".into(),
            include: vec![],
            exclude: None,
            transforms: vec![TransformKind::Resource, TransformKind::Script],
            filename: None,
        }])
        .unwrap();
        let ctx = PipelineContext {
            compiler: &EchoCompiler,
            minify: false,
            mode: Mode::Development,
        };
        let err = run_pipeline(&ctx, rules.match_path("a.txt"), "a.txt", Path::new("/a.txt"), b"x".to_vec())
            .unwrap_err();
        assert_eq!(err.code, codes::BUILD_TRANSFORM_ORDER);
    }

    #[test]
    fn test_swc_script_keeps_module_syntax() {
        let rules = RuleSet::from_config(&default_rules()).unwrap();
        let compiler = SwcCompiler::new();
        let ctx = PipelineContext {
            compiler: &compiler,
            minify: false,
            mode: Mode::Development,
        };
        let out = run_pipeline(
            &ctx,
            rules.match_path("src/app.ts"),
            "src/app.ts",
            Path::new("/project/src/app.ts"),
            b"import { greet } from './greet';\nconst n: number = 1;\ngreet(n);\n".to_vec(),
        )
        .unwrap();
        let ModuleOutput::Script { code } = out else {
            panic!("expected script");
        };
        assert!(code.contains("from \"./greet\"") || code.contains("from './greet'"), "{code}");
        assert!(!code.contains(": number"));
    }
}
