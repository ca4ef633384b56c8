//! SWC-backed [`ScriptCompiler`].
//!
//! Every call builds its own `SourceMap` and `Globals`, so one
//! `SwcCompiler` can serve the whole rayon pool.

#![allow(clippy::default_trait_access)]

use std::path::Path;

use swc_common::{
    comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceMap, Spanned,
    GLOBALS,
};
use swc_ecma_ast::{EsVersion, Module, ModuleItem, Program};
use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
use swc_ecma_transforms_react::{react, Options as ReactOptions, Runtime};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::FoldWith;

use super::{CompilerError, ScriptCompiler};

const TARGET: EsVersion = EsVersion::Es2020;

/// SWC-based compiler backend.
#[derive(Debug, Clone, Default)]
pub struct SwcCompiler {
    _private: (),
}

impl SwcCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn is_typescript(path: &Path) -> bool {
        extension(path).is_some_and(|ext| matches!(ext.as_str(), "ts" | "tsx" | "mts" | "cts"))
    }

    fn is_jsx(path: &Path) -> bool {
        extension(path).is_some_and(|ext| matches!(ext.as_str(), "jsx" | "tsx"))
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

impl ScriptCompiler for SwcCompiler {
    fn name(&self) -> &'static str {
        "swc"
    }

    fn transpile(&self, path: &Path, source: &str) -> Result<String, CompilerError> {
        let is_ts = Self::is_typescript(path);
        let is_jsx = Self::is_jsx(path);

        let syntax = if is_ts {
            Syntax::Typescript(TsSyntax {
                tsx: is_jsx,
                decorators: true,
                ..Default::default()
            })
        } else {
            Syntax::Es(EsSyntax {
                jsx: is_jsx,
                decorators: true,
                ..Default::default()
            })
        };

        let cm: Lrc<SourceMap> = Default::default();
        let comments = SingleThreadedComments::default();
        let module = parse(&cm, &comments, path, source, syntax, false)?;

        let module = GLOBALS.set(&Globals::default(), || {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();

            let mut program = Program::Module(module);
            program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, is_ts));
            if is_ts {
                program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));
            }

            let mut module = into_module(program);

            if is_jsx {
                let options = ReactOptions {
                    runtime: Some(Runtime::Automatic),
                    import_source: Some("react".to_string()),
                    ..Default::default()
                };
                module = module.fold_with(&mut react(
                    cm.clone(),
                    Some(&comments),
                    options,
                    top_level_mark,
                    unresolved_mark,
                ));
            }

            module = module.fold_with(&mut hygiene());
            module.fold_with(&mut fixer(Some(&comments)))
        });

        print(&cm, Some(&comments), &module, false)
    }

    fn normalize(&self, path: &Path, source: &str) -> Result<String, CompilerError> {
        let cm: Lrc<SourceMap> = Default::default();
        let comments = SingleThreadedComments::default();
        let module = parse(&cm, &comments, path, source, Syntax::Es(EsSyntax::default()), true)?;
        print(&cm, Some(&comments), &module, false)
    }

    fn minify(&self, name: &str, code: &str) -> Result<String, CompilerError> {
        let cm: Lrc<SourceMap> = Default::default();
        let comments = SingleThreadedComments::default();
        let module = parse(
            &cm,
            &comments,
            Path::new(name),
            code,
            Syntax::Es(EsSyntax::default()),
            true,
        )?;
        print(&cm, None, &module, true)
    }
}

/// Parse `source` into a module.
///
/// With `lenient` set the input may be a sloppy-mode script; it is parsed as
/// a program and its statements are lifted into a module body.
fn parse(
    cm: &Lrc<SourceMap>,
    comments: &SingleThreadedComments,
    path: &Path,
    source: &str,
    syntax: Syntax,
    lenient: bool,
) -> Result<Module, CompilerError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input.js");
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(filename.to_string())),
        source.to_string(),
    );

    let lexer = Lexer::new(syntax, TARGET, StringInput::from(&*fm), Some(comments));
    let mut parser = Parser::new_from(lexer);

    let parsed = if lenient {
        parser.parse_program().map(into_module)
    } else {
        parser.parse_module()
    };

    let describe = |e: &swc_ecma_parser::error::Error| {
        let loc = cm.lookup_char_pos(e.span().lo);
        format!("{}:{}: {}", loc.line, loc.col_display + 1, e.kind().msg())
    };

    let module = parsed.map_err(|e| CompilerError::parse_error(describe(&e)))?;

    let errors: Vec<String> = parser.take_errors().iter().map(describe).collect();
    if !errors.is_empty() {
        return Err(CompilerError::parse_error(errors.join(", ")));
    }

    Ok(module)
}

fn into_module(program: Program) -> Module {
    match program {
        Program::Module(m) => m,
        Program::Script(s) => Module {
            span: s.span,
            body: s.body.into_iter().map(ModuleItem::Stmt).collect(),
            shebang: s.shebang,
        },
    }
}

fn print(
    cm: &Lrc<SourceMap>,
    comments: Option<&SingleThreadedComments>,
    module: &Module,
    minify: bool,
) -> Result<String, CompilerError> {
    let mut buf = Vec::new();
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg: swc_ecma_codegen::Config::default()
                .with_minify(minify)
                .with_target(TARGET),
            cm: cm.clone(),
            comments: comments.map(|c| c as &dyn swc_common::comments::Comments),
            wr: writer,
        };
        emitter
            .emit_module(module)
            .map_err(|e| CompilerError::transform_error(format!("Failed to emit: {e}")))?;
    }

    String::from_utf8(buf)
        .map_err(|e| CompilerError::transform_error(format!("Invalid UTF-8 output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpile_strips_types() {
        let compiler = SwcCompiler::new();
        let out = compiler
            .transpile(
                Path::new("src/app.ts"),
                "interface User { name: string }\nexport const greet = (u: User): string => `hi ${u.name}`;\n",
            )
            .unwrap();
        assert!(!out.contains("interface"));
        assert!(!out.contains(": string"));
        assert!(out.contains("export const greet"));
    }

    #[test]
    fn test_transpile_keeps_side_effect_imports() {
        let compiler = SwcCompiler::new();
        let out = compiler
            .transpile(Path::new("src/app.ts"), "import './styles/main.scss';\n")
            .unwrap();
        assert!(out.contains("./styles/main.scss"));
    }

    #[test]
    fn test_transpile_reports_position() {
        let compiler = SwcCompiler::new();
        let err = compiler
            .transpile(Path::new("src/app.ts"), "const = ;\n")
            .unwrap_err();
        assert_eq!(err.code, "COMPILER_PARSE_ERROR");
        assert!(err.message.starts_with("1:"), "{}", err.message);
    }

    #[test]
    fn test_normalize_accepts_sloppy_scripts() {
        let compiler = SwcCompiler::new();
        let out = compiler
            .normalize(Path::new("legacy.js"), "var x = 1;\nmodule.exports = x;\n")
            .unwrap();
        assert!(out.contains("module.exports"));
    }

    #[test]
    fn test_minify_drops_comments_and_whitespace() {
        let compiler = SwcCompiler::new();
        let out = compiler
            .minify("main.js", "/* banner */\nfunction add(a, b) {\n    return a + b;\n}\n")
            .unwrap();
        assert!(!out.contains("banner"));
        assert!(out.contains("function add(a,b)"));
    }
}
