//! Import discovery in compiled scripts.
//!
//! Runs on compiler output, where every top-level statement starts at
//! column zero, so line-anchored patterns are enough. A match only counts
//! when its keyword sits in code: comments and the bodies of string,
//! template and regex literals are mapped out first by [`Literals`].

use regex_lite::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// How a dependency is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    /// `import ... from`, `import "x"`, `export ... from`, CSS `url()`.
    Static,
    /// CommonJS `require("x")`; unresolvable ones are left to the runtime.
    Require,
    /// `import("x")`; starts a new async bundle.
    Dynamic,
}

impl ImportKind {
    /// Whether the importer needs the target before it runs.
    #[must_use]
    pub fn is_eager(self) -> bool {
        matches!(self, Self::Static | Self::Require)
    }
}

/// One import found in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    pub kind: ImportKind,
}

pub(crate) fn import_from_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^import\s*((?:[\w$]+\s*,?\s*)?(?:\*\s*as\s+[\w$]+|\{[^}]*\})?)\s*from\s*["']([^"']+)["'];?[ \t]*$"#,
        )
        .unwrap_or_else(|e| unreachable!("import pattern: {e}"))
    })
}

pub(crate) fn import_bare_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^import\s*["']([^"']+)["'];?[ \t]*$"#)
            .unwrap_or_else(|e| unreachable!("import pattern: {e}"))
    })
}

pub(crate) fn export_from_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^export\s*(\*(?:\s*as\s+[\w$]+)?|\{[^}]*\})\s*from\s*["']([^"']+)["'];?[ \t]*$"#,
        )
        .unwrap_or_else(|e| unreachable!("export pattern: {e}"))
    })
}

pub(crate) fn dynamic_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\bimport\(\s*["']([^"']+)["']\s*\)"#)
            .unwrap_or_else(|e| unreachable!("dynamic import pattern: {e}"))
    })
}

pub(crate) fn require_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(^|[^.\w$])require\(\s*["']([^"']+)["']\s*\)"#)
            .unwrap_or_else(|e| unreachable!("require pattern: {e}"))
    })
}

/// Words after which `/` starts a regex literal rather than a division.
const REGEX_PREFIX_WORDS: &[&str] = &[
    "return", "typeof", "instanceof", "case", "do", "else", "in", "of", "new", "delete", "void",
    "throw", "yield", "await",
];

/// Byte ranges of a script that are not code: comments and the bodies of
/// string, template and regex literals. `${...}` inside templates is code.
#[derive(Debug, Default)]
pub(crate) struct Literals {
    spans: Vec<Range<usize>>,
}

impl Literals {
    pub(crate) fn scan(code: &str) -> Self {
        let bytes = code.as_bytes();
        let len = bytes.len();
        let mut spans = Vec::new();
        // One brace depth per open `${`
        let mut substitutions: Vec<u32> = Vec::new();
        let mut i = 0;

        while i < len {
            let start = i;
            match bytes[i] {
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    i = line_end(bytes, i);
                    spans.push(start..i);
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = code[i + 2..].find("*/").map_or(len, |end| i + 2 + end + 2);
                    spans.push(start..i);
                }
                b'/' if regex_allowed(bytes, i) => {
                    i = skip_regex(bytes, i + 1);
                    spans.push(start..i);
                }
                quote @ (b'"' | b'\'') => {
                    i += 1;
                    while i < len && bytes[i] != quote && bytes[i] != b'\n' {
                        if bytes[i] == b'\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                    i = (i + 1).min(len);
                    spans.push(start..i);
                }
                b'`' => {
                    let (end, opened) = skip_template(bytes, i + 1);
                    i = end;
                    spans.push(start..i);
                    if opened {
                        substitutions.push(0);
                    }
                }
                b'{' => {
                    if let Some(depth) = substitutions.last_mut() {
                        *depth += 1;
                    }
                    i += 1;
                }
                b'}' => match substitutions.last_mut() {
                    Some(0) => {
                        substitutions.pop();
                        let (end, opened) = skip_template(bytes, i + 1);
                        i = end;
                        spans.push(start..i);
                        if opened {
                            substitutions.push(0);
                        }
                    }
                    Some(depth) => {
                        *depth -= 1;
                        i += 1;
                    }
                    None => i += 1,
                },
                _ => i += 1,
            }
        }

        Self { spans }
    }

    /// Whether byte `at` is inside a comment or literal.
    pub(crate) fn contains(&self, at: usize) -> bool {
        let idx = self.spans.partition_point(|span| span.end <= at);
        self.spans.get(idx).is_some_and(|span| span.start <= at)
    }
}

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| from + p)
}

/// From just after an opening backtick or a closing `}`, to just after the
/// closing backtick or the next `${`. The flag is set for `${`.
fn skip_template(bytes: &[u8], mut i: usize) -> (usize, bool) {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return (i + 1, false),
            b'$' if bytes.get(i + 1) == Some(&b'{') => return (i + 2, true),
            _ => i += 1,
        }
    }
    (bytes.len(), false)
}

/// From just after the opening `/` to the end of the flags.
fn skip_regex(bytes: &[u8], mut i: usize) -> usize {
    let mut class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => class = true,
            b']' => class = false,
            b'/' if !class => break,
            b'\n' => return i,
            _ => {}
        }
        i += 1;
    }
    i = (i + 1).min(bytes.len());
    while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
        i += 1;
    }
    i
}

/// Whether a `/` at `at` opens a regex literal, judged by what precedes it.
fn regex_allowed(bytes: &[u8], at: usize) -> bool {
    let Some(prev) = bytes[..at].iter().rposition(|b| !b.is_ascii_whitespace()) else {
        return true;
    };
    match bytes[prev] {
        b')' | b']' | b'}' | b'"' | b'\'' | b'`' => false,
        c if is_ident_byte(c) => {
            let start = bytes[..prev]
                .iter()
                .rposition(|&b| !is_ident_byte(b))
                .map_or(0, |p| p + 1);
            std::str::from_utf8(&bytes[start..=prev])
                .is_ok_and(|word| REGEX_PREFIX_WORDS.contains(&word))
        }
        _ => true,
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Every import in `code`, in source order, each specifier/kind pair once.
#[must_use]
pub fn scan_imports(code: &str) -> Vec<ImportRef> {
    let literals = Literals::scan(code);
    let mut found: Vec<(usize, ImportRef)> = Vec::new();
    let mut push = |at: usize, specifier: &str, kind: ImportKind| {
        if literals.contains(at) {
            return;
        }
        found.push((
            at,
            ImportRef {
                specifier: specifier.to_string(),
                kind,
            },
        ));
    };

    for caps in import_from_regex().captures_iter(code) {
        push(caps.get(0).map_or(0, |m| m.start()), &caps[2], ImportKind::Static);
    }
    for caps in import_bare_regex().captures_iter(code) {
        push(caps.get(0).map_or(0, |m| m.start()), &caps[1], ImportKind::Static);
    }
    for caps in export_from_regex().captures_iter(code) {
        push(caps.get(0).map_or(0, |m| m.start()), &caps[2], ImportKind::Static);
    }
    for caps in dynamic_import_regex().captures_iter(code) {
        push(caps.get(0).map_or(0, |m| m.start()), &caps[1], ImportKind::Dynamic);
    }
    for caps in require_regex().captures_iter(code) {
        push(
            caps.get(0).map_or(0, |m| m.start()) + caps[1].len(),
            &caps[2],
            ImportKind::Require,
        );
    }

    found.sort_by_key(|(at, _)| *at);

    let mut imports: Vec<ImportRef> = Vec::with_capacity(found.len());
    for (_, import) in found {
        if !imports.contains(&import) {
            imports.push(import);
        }
    }
    imports
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(code: &str) -> Vec<(String, ImportKind)> {
        scan_imports(code)
            .into_iter()
            .map(|i| (i.specifier, i.kind))
            .collect()
    }

    #[test]
    fn test_static_forms() {
        let code = r#"import "./styles/main.scss";
import util from "./util";
import { a, b as c } from './named';
import def, * as ns from "./ns";
export * from "./star";
export { x } from "./reexport";
"#;
        let found: Vec<String> = specs(code).into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            found,
            vec!["./styles/main.scss", "./util", "./named", "./ns", "./star", "./reexport"]
        );
        assert!(specs(code).iter().all(|(_, k)| *k == ImportKind::Static));
    }

    #[test]
    fn test_dynamic_and_require() {
        let code = r#"const lodash = require("lodash");
button.onclick = () => import("./pages/admin");
const fake = obj.require("nope");
"#;
        assert_eq!(
            specs(code),
            vec![
                ("lodash".to_string(), ImportKind::Require),
                ("./pages/admin".to_string(), ImportKind::Dynamic),
            ]
        );
    }

    #[test]
    fn test_indented_and_string_lookalikes_ignored() {
        let code = r#"function f() {
    import_thing();
}
export const msg = "hello from " + "x";
"#;
        assert!(scan_imports(code).is_empty());
    }

    #[test]
    fn test_ignores_comments() {
        let code = r#"// later: lazy-load with import("./admin")
/* const a = require("./a");
import { b } from "./b";
*/
export const ready = true; // require("./c")
"#;
        assert!(scan_imports(code).is_empty());
    }

    #[test]
    fn test_ignores_string_contents() {
        let code = r#"const help = "call require('./x') first";
const hint = 'import("./y") loads lazily';
const real = require("./real");
"#;
        assert_eq!(specs(code), vec![("./real".to_string(), ImportKind::Require)]);
    }

    #[test]
    fn test_ignores_template_contents() {
        let code = "const snippet = `\nimport { a } from \"./a\";\nexport * from \"./b\";\nrequire(\"./c\")\n`;\nconst page = `${await import(\"./page\")}`;\n";
        assert_eq!(specs(code), vec![("./page".to_string(), ImportKind::Dynamic)]);
    }

    #[test]
    fn test_ignores_regex_literal() {
        let code = "const quote = /'/g;\nconst re = /import(\"x\")/;\nimport \"./after\";\n";
        assert_eq!(specs(code), vec![("./after".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_literal_spans() {
        let code = "a / b; `x${ {k: 1}.k }y`; '}' // c";
        let literals = Literals::scan(code);
        assert!(!literals.contains(code.find('b').unwrap()));
        assert!(literals.contains(code.find('x').unwrap()));
        assert!(!literals.contains(code.find('k').unwrap()));
        assert!(literals.contains(code.find('y').unwrap()));
        assert!(literals.contains(code.find('\'').unwrap() + 1));
        assert!(literals.contains(code.find('c').unwrap()));
    }

    #[test]
    fn test_duplicates_collapsed() {
        let code = "import { a } from \"./a\";\nimport { b } from \"./a\";\n";
        assert_eq!(scan_imports(code).len(), 1);
    }
}
