//! Bundle emission.
//!
//! Each module becomes a factory registered on `self.__assetpipe__`; entry
//! bundles also carry the runtime (`require`, async `load`, export helpers),
//! the async chunk map and the boot call. Import and export statements of the
//! compiled code are rewritten line by line into runtime calls. Compiler
//! output puts every top-level statement at column zero, so only unindented
//! lines that begin outside comments and literals are candidates.

#![allow(clippy::format_push_string)]

use rayon::prelude::*;
use regex_lite::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use super::chunks::{Bundle, BundleKind, ChunkGraph, Root};
use super::codes;
use super::graph::{Module, ModuleGraph};
use super::imports::{
    dynamic_import_regex, export_from_regex, import_bare_regex, import_from_regex, require_regex,
    ImportKind, Literals,
};
use super::naming::OutputTemplate;
use super::pipeline::ModuleOutput;
use super::publish::{Artifact, ArtifactKind};
use super::BuildError;
use crate::compiler::ScriptCompiler;
use crate::css;

/// Installed once per page by the first entry bundle that runs.
const RUNTIME: &str = r#"if (!ap.require) {
var cache = {};
var pending = {};
ap.require = function (id) {
  var cached = cache[id];
  if (cached) return cached.exports;
  var factory = ap.modules[id];
  if (!factory) throw new Error("Cannot find module '" + id + "'");
  var module = (cache[id] = { id: id, exports: {} });
  factory.call(module.exports, module, module.exports, ap);
  return module.exports;
};
ap.fetch = function (url) {
  if (pending[url]) return pending[url];
  return (pending[url] = new Promise(function (resolve, reject) {
    var css = /\.css(\?|$)/.test(url);
    var el = document.createElement(css ? "link" : "script");
    if (css) { el.rel = "stylesheet"; el.href = url; } else { el.src = url; }
    el.onload = function () { resolve(); };
    el.onerror = function () { delete pending[url]; reject(new Error("Loading chunk " + url + " failed")); };
    document.head.appendChild(el);
  }));
};
ap.loaded = function (urls) {
  urls.forEach(function (url) { pending[url] = pending[url] || Promise.resolve(); });
};
ap.load = function (id) {
  var files = ap.chunks[id] || [];
  return Promise.all(files.map(ap.fetch)).then(function () { return ap.require(id); });
};
ap.interop = function (m) { return m && m.__esModule ? m["default"] : m; };
ap.define = function (exports, name, get) {
  Object.defineProperty(exports, name, { enumerable: true, configurable: true, get: get });
};
ap.reexport = function (exports, from) {
  Object.keys(from).forEach(function (key) {
    if (key !== "default" && !Object.prototype.hasOwnProperty.call(exports, key)) {
      ap.define(exports, key, function () { return from[key]; });
    }
  });
};
ap.esm = function (exports) { Object.defineProperty(exports, "__esModule", { value: true }); };
}
"#;

const OPEN: &str = "(function (ap) {\n";
const CLOSE: &str = "})(self.__assetpipe__ = self.__assetpipe__ || { modules: {}, chunks: {} });\n";

/// Path templates for bundle artifacts.
#[derive(Debug, Clone)]
pub struct BundleTemplates {
    pub js: OutputTemplate,
    pub js_chunk: OutputTemplate,
    pub css: OutputTemplate,
    pub css_chunk: OutputTemplate,
}

/// Inputs shared by every bundle.
pub struct EmitOptions<'a> {
    pub templates: &'a BundleTemplates,
    pub public_path: &'a str,
    pub minify: bool,
    pub compiler: &'a dyn ScriptCompiler,
}

/// Output paths of one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedBundle {
    pub name: String,
    pub kind: BundleKind,
    pub js: String,
    pub css: Option<String>,
    pub modules: usize,
}

/// Everything emission produced.
#[derive(Debug, Clone, Default)]
pub struct EmitOutput {
    pub bundles: Vec<EmittedBundle>,
    pub artifacts: Vec<Artifact>,
    /// Entry name → files to load at startup, stylesheets first.
    pub entrypoints: Vec<(String, Vec<String>)>,
}

/// Render, minify and name every bundle.
///
/// Non-entry bundles are finished first; entry bundles embed their final
/// file names in the chunk map.
pub fn emit(graph: &ModuleGraph, chunks: &ChunkGraph, opts: &EmitOptions<'_>) -> Result<EmitOutput, BuildError> {
    let bundles = chunks.bundles();

    let rendered: Vec<Result<(usize, Rendered), BuildError>> = bundles
        .par_iter()
        .enumerate()
        .filter(|(_, b)| !b.kind.is_entry())
        .map(|(i, b)| render(graph, b, None, opts).map(|r| (i, r)))
        .collect();

    let mut done: BTreeMap<usize, Rendered> = BTreeMap::new();
    for result in rendered {
        let (i, r) = result?;
        done.insert(i, r);
    }

    let public = |path: &str| public_url(opts.public_path, path);
    let files_of = |root: &Root, done: &BTreeMap<usize, Rendered>| -> Vec<String> {
        let mut css_files = Vec::new();
        let mut js_files = Vec::new();
        for id in &root.bundles {
            if let Some(r) = done.get(id) {
                css_files.extend(r.css.as_ref().map(|a| a.path.clone()));
                js_files.push(r.js.path.clone());
            }
        }
        css_files.extend(js_files);
        css_files
    };

    let chunk_map: BTreeMap<String, Vec<String>> = chunks
        .async_roots()
        .map(|root| {
            let files = files_of(root, &done).iter().map(|f| public(f)).collect();
            (root.module.clone(), files)
        })
        .collect();

    // Entries: startup files other than the entry's own bundle are known now
    let entry_renders: Vec<Result<(usize, Rendered), BuildError>> = chunks
        .entry_roots()
        .collect::<Vec<_>>()
        .par_iter()
        .filter_map(|root| root.bundles.last().map(|own| (*root, *own)))
        .map(|(root, own)| {
            let preloaded: Vec<String> = files_of(root, &done).iter().map(|f| public(f)).collect();
            let boot = Boot {
                entry: &root.module,
                chunk_map: &chunk_map,
                preloaded: &preloaded,
            };
            render(graph, &bundles[own], Some(&boot), opts).map(|r| (own, r))
        })
        .collect();
    for result in entry_renders {
        let (i, r) = result?;
        done.insert(i, r);
    }

    let mut output = EmitOutput::default();
    for root in chunks.entry_roots() {
        output.entrypoints.push((root.name.clone(), files_of(root, &done)));
    }
    for (i, bundle) in bundles.iter().enumerate() {
        let Some(r) = done.remove(&i) else { continue };
        output.bundles.push(EmittedBundle {
            name: bundle.name.clone(),
            kind: bundle.kind,
            js: r.js.path.clone(),
            css: r.css.as_ref().map(|c| c.path.clone()),
            modules: bundle.modules.len(),
        });
        output.artifacts.push(r.js);
        output.artifacts.extend(r.css);
    }
    Ok(output)
}

struct Boot<'a> {
    entry: &'a str,
    chunk_map: &'a BTreeMap<String, Vec<String>>,
    preloaded: &'a [String],
}

struct Rendered {
    js: Artifact,
    css: Option<Artifact>,
}

fn render(
    graph: &ModuleGraph,
    bundle: &Bundle,
    boot: Option<&Boot<'_>>,
    opts: &EmitOptions<'_>,
) -> Result<Rendered, BuildError> {
    let mut js = String::from(OPEN);
    let mut styles: Vec<String> = Vec::new();

    if boot.is_some() {
        js.push_str(RUNTIME);
    }

    for id in &bundle.modules {
        let Some(module) = graph.get(id) else { continue };
        let body = match module.output.as_ref() {
            ModuleOutput::Script { code } => link_script(module, code)?,
            ModuleOutput::Style { css, extracted } => {
                let css = rewrite_css_urls(graph, module, css, opts.public_path);
                if *extracted {
                    styles.push(css);
                    String::new()
                } else {
                    inject_style(&module.id, &css)
                }
            }
            ModuleOutput::Resource { path, .. } => {
                format!("module.exports = {};\n", js_string(&public_url(opts.public_path, path)))
            }
        };
        let _ = write!(
            js,
            "// {id}\nap.modules[{}] = function (module, exports, __ap__) {{\n{body}}};\n",
            js_string(id)
        );
    }

    if let Some(boot) = boot {
        if !boot.chunk_map.is_empty() {
            let map = serde_json::to_string(boot.chunk_map).unwrap_or_else(|_| "{}".into());
            let _ = writeln!(js, "Object.assign(ap.chunks, {map});");
        }
        let preloaded = serde_json::to_string(boot.preloaded).unwrap_or_else(|_| "[]".into());
        let _ = writeln!(js, "ap.loaded({preloaded});");
        let _ = writeln!(js, "ap.require({});", js_string(boot.entry));
    }
    js.push_str(CLOSE);

    let entry = bundle.kind.is_entry();
    let templates = opts.templates;

    let js = if opts.minify {
        opts.compiler
            .minify(&bundle.name, &js)
            .map_err(|e| BuildError::new(codes::BUILD_MINIFY_FAILED, format!("bundle `{}`: {}", bundle.name, e.message)))?
    } else {
        js
    };
    let js_template = if entry { &templates.js } else { &templates.js_chunk };
    let js_path = js_template.render(&bundle.name, ".js", js.as_bytes());

    let css = if styles.is_empty() {
        None
    } else {
        let css = styles.join(if opts.minify { "" } else { "\n" });
        let css_template = if entry { &templates.css } else { &templates.css_chunk };
        let path = css_template.render(&bundle.name, ".css", css.as_bytes());
        Some(Artifact::new(path, css.into_bytes(), ArtifactKind::Stylesheet).with_logical(format!("{}.css", bundle.name)))
    };

    Ok(Rendered {
        js: Artifact::new(js_path, js.into_bytes(), ArtifactKind::Script).with_logical(format!("{}.js", bundle.name)),
        css,
    })
}

/// Public URL of an output path.
#[must_use]
pub fn public_url(public_path: &str, path: &str) -> String {
    if public_path.is_empty() || public_path.ends_with('/') {
        format!("{public_path}{path}")
    } else {
        format!("{public_path}/{path}")
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn inject_style(id: &str, css: &str) -> String {
    format!(
        "var style = document.createElement(\"style\");\nstyle.setAttribute(\"data-assetpipe\", {});\nstyle.textContent = {};\ndocument.head.appendChild(style);\n",
        js_string(id),
        js_string(css)
    )
}

fn rewrite_css_urls(graph: &ModuleGraph, module: &Module, css: &str, public_path: &str) -> String {
    css::rewrite_urls(css, |url| {
        let target = module.target_of(url, ImportKind::Static)?;
        match graph.get(target)?.output.as_ref() {
            ModuleOutput::Resource { path, .. } => Some(public_url(public_path, path)),
            _ => None,
        }
    })
}

// =============================================================================
// Linking
// =============================================================================

fn export_default_named_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^export\s+default\s+((?:async\s+)?function\s*\*?\s*([\w$]+)\s*\(|class\s+([\w$]+)[\s{])")
            .unwrap_or_else(|e| unreachable!("export default pattern: {e}"))
    })
}

fn export_decl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^export\s+((?:async\s+)?function\s*\*?\s*([\w$]+)|class\s+([\w$]+)|(?:const|let|var)\s+(.*))")
            .unwrap_or_else(|e| unreachable!("export declaration pattern: {e}"))
    })
}

fn export_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^export\s*\{([^}]*)\}\s*;?\s*$")
            .unwrap_or_else(|e| unreachable!("export list pattern: {e}"))
    })
}

/// Factory body being assembled for one module.
#[derive(Default)]
struct Linked {
    esm: bool,
    getters: Vec<String>,
    imports: Vec<String>,
    body: String,
    temps: usize,
}

impl Linked {
    fn temp(&mut self) -> String {
        let name = format!("__ap_m{}__", self.temps);
        self.temps += 1;
        name
    }

    fn getter(&mut self, exported: &str, expr: &str) {
        self.getters.push(format!(
            "__ap__.define(exports, {}, function () {{ return {expr}; }});",
            js_string(exported)
        ));
    }

    fn finish(self) -> String {
        let mut out = String::new();
        if self.esm {
            out.push_str("__ap__.esm(exports);\n");
        }
        for line in self.getters.iter().chain(&self.imports) {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&self.body);
        out
    }
}

/// Rewrite a compiled script into a factory body.
fn link_script(module: &Module, code: &str) -> Result<String, BuildError> {
    let require_of = |specifier: &str| -> Result<String, BuildError> {
        module
            .target_of(specifier, ImportKind::Static)
            .map(|target| format!("__ap__.require({})", js_string(target)))
            .ok_or_else(|| {
                BuildError::new(
                    codes::BUILD_RESOLVE_FAILED,
                    format!("cannot link '{specifier}'"),
                )
                .with_path(module.id.trim_start_matches("./"))
            })
    };

    let mut linked = Linked::default();
    let literals = Literals::scan(code);
    let mut offset = 0;

    for line in code.split_inclusive('\n') {
        let at = offset;
        offset += line.len();
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        if literals.contains(at) || (!line.starts_with("import") && !line.starts_with("export")) {
            linked.body.push_str(line);
            linked.body.push('\n');
            continue;
        }

        if let Some(caps) = import_from_regex().captures(line) {
            linked.esm = true;
            let source = require_of(&caps[2])?;
            link_import_clause(&mut linked, caps[1].trim(), &source);
        } else if let Some(caps) = import_bare_regex().captures(line) {
            linked.esm = true;
            let source = require_of(&caps[1])?;
            linked.imports.push(format!("{source};"));
        } else if let Some(caps) = export_from_regex().captures(line) {
            linked.esm = true;
            let source = require_of(&caps[2])?;
            link_reexport(&mut linked, caps[1].trim(), &source);
        } else if let Some(caps) = export_list_regex().captures(line) {
            linked.esm = true;
            for (local, exported) in parse_specifiers(&caps[1]) {
                linked.getter(&exported, &local);
            }
        } else if let Some(caps) = export_default_named_regex().captures(line) {
            linked.esm = true;
            let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str()).to_string();
            linked.getter("default", &name);
            linked.body.push_str(strip_export(line, true));
            linked.body.push('\n');
        } else if let Some(rest) = line.strip_prefix("export default ") {
            linked.esm = true;
            linked.body.push_str("exports.default = ");
            linked.body.push_str(rest);
            linked.body.push('\n');
        } else if let Some(caps) = export_decl_regex().captures(line) {
            linked.esm = true;
            let names = match (caps.get(2), caps.get(3), caps.get(4)) {
                (Some(f), _, _) => vec![f.as_str().to_string()],
                (_, Some(c), _) => vec![c.as_str().to_string()],
                (_, _, Some(decl)) => declared_names(decl.as_str()),
                _ => Vec::new(),
            };
            for name in names {
                linked.getter(&name, &name);
            }
            linked.body.push_str(strip_export(line, false));
            linked.body.push('\n');
        } else {
            linked.body.push_str(line);
            linked.body.push('\n');
        }
    }

    let body = rewrite_calls(module, &linked.body);
    linked.body = body;
    Ok(linked.finish())
}

fn strip_export(line: &str, default: bool) -> &str {
    let rest = line.trim_start_matches("export").trim_start();
    if default {
        rest.trim_start_matches("default").trim_start()
    } else {
        rest
    }
}

/// `import <clause> from` → bindings.
fn link_import_clause(linked: &mut Linked, clause: &str, source: &str) {
    let (default, rest) = if clause.starts_with('{') || clause.starts_with('*') || clause.is_empty() {
        (None, clause)
    } else {
        match clause.split_once(',') {
            Some((default, rest)) => (Some(default.trim()), rest.trim()),
            None => (Some(clause), ""),
        }
    };

    let namespace = rest
        .strip_prefix('*')
        .and_then(|r| r.trim_start().strip_prefix("as"))
        .map(str::trim);
    let named = rest.starts_with('{').then(|| parse_specifiers(rest.trim_matches(['{', '}'])));

    match (default, namespace, named) {
        (Some(default), None, None) => linked
            .imports
            .push(format!("const {default} = __ap__.interop({source});")),
        (None, Some(ns), _) => linked.imports.push(format!("const {ns} = {source};")),
        (None, None, Some(named)) => linked
            .imports
            .push(format!("const {} = {source};", destructure(&named))),
        (Some(default), ns, named) => {
            let temp = linked.temp();
            linked.imports.push(format!("const {temp} = {source};"));
            linked
                .imports
                .push(format!("const {default} = __ap__.interop({temp});"));
            if let Some(ns) = ns {
                linked.imports.push(format!("const {ns} = {temp};"));
            }
            if let Some(named) = named {
                linked
                    .imports
                    .push(format!("const {} = {temp};", destructure(&named)));
            }
        }
        (None, None, None) => linked.imports.push(format!("{source};")),
    }
}

/// `export <clause> from` → getters over the source module.
fn link_reexport(linked: &mut Linked, clause: &str, source: &str) {
    if clause == "*" {
        linked
            .imports
            .push(format!("__ap__.reexport(exports, {source});"));
        return;
    }

    let temp = linked.temp();
    linked.imports.push(format!("const {temp} = {source};"));

    if let Some(ns) = clause
        .strip_prefix('*')
        .and_then(|r| r.trim_start().strip_prefix("as"))
    {
        linked.getter(ns.trim(), &temp);
        return;
    }

    for (imported, exported) in parse_specifiers(clause.trim_matches(['{', '}'])) {
        let expr = if imported == "default" {
            format!("__ap__.interop({temp})")
        } else {
            format!("{temp}.{imported}")
        };
        linked.getter(&exported, &expr);
    }
}

/// `a, b as c` → `[(a, a), (b, c)]`.
fn parse_specifiers(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.split_once(" as ") {
            Some((from, to)) => (
                from.trim().trim_matches(['"', '\'']).to_string(),
                to.trim().trim_matches(['"', '\'']).to_string(),
            ),
            None => (s.to_string(), s.to_string()),
        })
        .collect()
}

fn destructure(named: &[(String, String)]) -> String {
    if named.is_empty() {
        return "{}".to_string();
    }
    let parts: Vec<String> = named
        .iter()
        .map(|(from, to)| {
            if from == to {
                from.clone()
            } else {
                format!("{from}: {to}")
            }
        })
        .collect();
    format!("{{ {} }}", parts.join(", "))
}

/// Dynamic imports and CommonJS requires anywhere in the body, outside
/// comments and literals.
fn rewrite_calls(module: &Module, body: &str) -> String {
    let start_of = |caps: &Captures<'_>| caps.get(0).map_or(0, |m| m.start());

    let literals = Literals::scan(body);
    let body = dynamic_import_regex().replace_all(body, |caps: &Captures<'_>| {
        if literals.contains(start_of(caps)) {
            return caps[0].to_string();
        }
        match module.target_of(&caps[1], ImportKind::Dynamic) {
            Some(target) => format!("__ap__.load({})", js_string(target)),
            None => caps[0].to_string(),
        }
    });

    let literals = Literals::scan(&body);
    require_regex()
        .replace_all(&body, |caps: &Captures<'_>| {
            if literals.contains(start_of(caps) + caps[1].len()) {
                return caps[0].to_string();
            }
            match module.target_of(&caps[2], ImportKind::Require) {
                Some(target) => format!("{}__ap__.require({})", &caps[1], js_string(target)),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Punct(char),
    Other,
}

fn tokenize(src: &str) -> Vec<Token> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '"' || c == '\'' || c == '`' {
            i += 1;
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            tokens.push(Token::Other);
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Other);
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }
    tokens
}

/// Names bound by the declarators of `const|let|var <decl>` on one line.
fn declared_names(decl: &str) -> Vec<String> {
    let tokens = tokenize(decl);
    let mut names = Vec::new();
    let mut i = 0;
    loop {
        match tokens.get(i) {
            Some(Token::Ident(name)) => {
                names.push(name.clone());
                i += 1;
            }
            Some(Token::Punct(open @ ('{' | '['))) => {
                let open = *open;
                i += 1;
                binding_pattern(&tokens, &mut i, open, &mut names);
            }
            _ => break,
        }
        skip_initializer(&tokens, &mut i, &[',', ';']);
        if tokens.get(i) == Some(&Token::Punct(',')) {
            i += 1;
        } else {
            break;
        }
    }
    names
}

/// Skip tokens until one of `stops` at depth zero, leaving `i` on it.
fn skip_initializer(tokens: &[Token], i: &mut usize, stops: &[char]) {
    let mut depth = 0i32;
    while let Some(token) = tokens.get(*i) {
        if let Token::Punct(c) = token {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth == 0 => return,
                ')' | ']' | '}' => depth -= 1,
                c if depth == 0 && stops.contains(c) => return,
                _ => {}
            }
        }
        *i += 1;
    }
}

/// Collect bindings of an object (`{`) or array (`[`) pattern; `i` starts
/// after the opening bracket and ends after the closing one.
fn binding_pattern(tokens: &[Token], i: &mut usize, open: char, names: &mut Vec<String>) {
    let close = if open == '{' { '}' } else { ']' };
    while let Some(token) = tokens.get(*i) {
        match token {
            Token::Punct(c) if *c == close => {
                *i += 1;
                return;
            }
            Token::Punct(',' | '.') => *i += 1,
            Token::Punct(nested @ ('{' | '[')) => {
                let nested = *nested;
                *i += 1;
                binding_pattern(tokens, i, nested, names);
            }
            Token::Ident(name) => {
                *i += 1;
                if open == '{' && tokens.get(*i) == Some(&Token::Punct(':')) {
                    // `key: target`; the target is handled next round
                    *i += 1;
                    continue;
                }
                names.push(name.clone());
            }
            _ => *i += 1,
        }
        if tokens.get(*i) == Some(&Token::Punct('=')) {
            *i += 1;
            skip_initializer(tokens, i, &[',']);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::Dependency;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn module(id: &str, code: &str, deps: &[(&str, &str, ImportKind)]) -> Module {
        Module {
            id: id.to_string(),
            path: PathBuf::from(id),
            rule: None,
            content_hash: String::new(),
            output: Arc::new(ModuleOutput::Script {
                code: code.to_string(),
            }),
            deps: deps
                .iter()
                .map(|(spec, target, kind)| Dependency {
                    specifier: (*spec).to_string(),
                    kind: *kind,
                    target: Some((*target).to_string()),
                })
                .collect(),
        }
    }

    fn link(code: &str, deps: &[(&str, &str, ImportKind)]) -> String {
        let m = module("./src/app.ts", code, deps);
        link_script(&m, code).unwrap()
    }

    #[test]
    fn test_import_forms() {
        use ImportKind::Static;
        let deps = [
            ("./a", "./src/a.ts", Static),
            ("./b", "./src/b.ts", Static),
            ("./c", "./src/c.ts", Static),
            ("./d", "./src/d.ts", Static),
            ("./e.css", "./src/e.css", Static),
        ];
        let out = link(
            "import a from \"./a\";\nimport { x, y as z } from \"./b\";\nimport * as ns from \"./c\";\nimport def, { k } from \"./d\";\nimport \"./e.css\";\nconsole.log(a, x, z, ns, def, k);\n",
            &deps,
        );
        assert_eq!(
            out,
            "__ap__.esm(exports);\n\
             const a = __ap__.interop(__ap__.require(\"./src/a.ts\"));\n\
             const { x, y: z } = __ap__.require(\"./src/b.ts\");\n\
             const ns = __ap__.require(\"./src/c.ts\");\n\
             const __ap_m0__ = __ap__.require(\"./src/d.ts\");\n\
             const def = __ap__.interop(__ap_m0__);\n\
             const { k } = __ap_m0__;\n\
             __ap__.require(\"./src/e.css\");\n\
             console.log(a, x, z, ns, def, k);\n"
        );
    }

    #[test]
    fn test_export_forms() {
        let out = link(
            "export const a = 1, b = [1, 2];\nexport function f() {}\nexport class K {\n}\nconst local = 2;\nexport { local as renamed };\nexport default local;\n",
            &[],
        );
        assert_eq!(
            out,
            "__ap__.esm(exports);\n\
             __ap__.define(exports, \"a\", function () { return a; });\n\
             __ap__.define(exports, \"b\", function () { return b; });\n\
             __ap__.define(exports, \"f\", function () { return f; });\n\
             __ap__.define(exports, \"K\", function () { return K; });\n\
             __ap__.define(exports, \"renamed\", function () { return local; });\n\
             const a = 1, b = [1, 2];\n\
             function f() {}\n\
             class K {\n\
             }\n\
             const local = 2;\n\
             exports.default = local;\n"
        );
    }

    #[test]
    fn test_export_default_declarations() {
        let out = link("export default function main() {}\n", &[]);
        assert!(out.contains("__ap__.define(exports, \"default\", function () { return main; });"));
        assert!(out.contains("\nfunction main() {}\n"));

        let out = link("export default function() {}\n", &[]);
        assert!(out.contains("exports.default = function() {}"));
    }

    #[test]
    fn test_reexports() {
        use ImportKind::Static;
        let out = link(
            "export * from \"./a\";\nexport { x, default as y } from \"./b\";\nexport * as ns from \"./c\";\n",
            &[
                ("./a", "./src/a.ts", Static),
                ("./b", "./src/b.ts", Static),
                ("./c", "./src/c.ts", Static),
            ],
        );
        assert!(out.contains("__ap__.reexport(exports, __ap__.require(\"./src/a.ts\"));"));
        assert!(out.contains("const __ap_m0__ = __ap__.require(\"./src/b.ts\");"));
        assert!(out.contains("__ap__.define(exports, \"x\", function () { return __ap_m0__.x; });"));
        assert!(out.contains("__ap__.define(exports, \"y\", function () { return __ap__.interop(__ap_m0__); });"));
        assert!(out.contains("__ap__.define(exports, \"ns\", function () { return __ap_m1__; });"));
    }

    #[test]
    fn test_dynamic_and_require_rewritten() {
        let out = link(
            "const lib = require(\"lib\");\nbutton.onclick = () => import(\"./pages/admin\");\n",
            &[
                ("lib", "./node_modules/lib/index.js", ImportKind::Require),
                ("./pages/admin", "./src/pages/admin.ts", ImportKind::Dynamic),
            ],
        );
        assert_eq!(
            out,
            "const lib = __ap__.require(\"./node_modules/lib/index.js\");\nbutton.onclick = () => __ap__.load(\"./src/pages/admin.ts\");\n"
        );
    }

    #[test]
    fn test_comments_and_literals_left_alone() {
        let code = "// lazy-load with import(\"./pages/admin\")\nconst help = \"call require('lib') first\";\nconst lib = require(\"lib\");\n";
        let out = link(
            code,
            &[("lib", "./node_modules/lib/index.js", ImportKind::Require)],
        );
        assert_eq!(
            out,
            "// lazy-load with import(\"./pages/admin\")\nconst help = \"call require('lib') first\";\nconst lib = __ap__.require(\"./node_modules/lib/index.js\");\n"
        );
    }

    #[test]
    fn test_template_lines_not_linked() {
        let code = "const docs = `\nimport { a } from \"./missing\";\nexport default 42;\n`;\nexport const n = 1;\n";
        let out = link(code, &[]);
        assert!(out.contains("const docs = `\nimport { a } from \"./missing\";\nexport default 42;\n`;\n"));
        assert!(!out.contains("exports.default"));
        assert!(out.contains("__ap__.define(exports, \"n\", function () { return n; });"));
    }

    #[test]
    fn test_unknown_static_import_fails() {
        let m = module("./src/app.ts", "import x from \"./x\";\n", &[]);
        let err = link_script(&m, "import x from \"./x\";\n").unwrap_err();
        assert_eq!(err.code, codes::BUILD_RESOLVE_FAILED);
    }

    #[test]
    fn test_declared_names() {
        assert_eq!(declared_names("a = 1;"), vec!["a"]);
        assert_eq!(declared_names("a = f(1, 2), b = { c: 3 };"), vec!["a", "b"]);
        assert_eq!(declared_names("{ a, b: c, d = 1, ...e } = obj;"), vec!["a", "c", "d", "e"]);
        assert_eq!(declared_names("[x, , y = z] = arr;"), vec!["x", "y"]);
        assert_eq!(declared_names("Color;"), vec!["Color"]);
    }

    #[test]
    fn test_public_url() {
        assert_eq!(public_url("/", "js/main.js"), "/js/main.js");
        assert_eq!(public_url("/static", "js/main.js"), "/static/js/main.js");
        assert_eq!(public_url("", "js/main.js"), "js/main.js");
    }
}
