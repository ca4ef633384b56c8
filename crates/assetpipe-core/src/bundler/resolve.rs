//! Import specifier resolution.
//!
//! Relative and absolute specifiers are tried with the configured
//! extensions, then as directories with an `index` file. Bare specifiers
//! walk up `node_modules` directories and read `package.json`.

use std::path::{Path, PathBuf};

/// Resolution failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    pub specifier: String,
    pub message: String,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot resolve '{}': {}", self.specifier, self.message)
    }
}

impl std::error::Error for ResolveError {}

/// Module resolver for one project.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    extensions: Vec<String>,
}

impl Resolver {
    /// `extensions` carry their leading dot (`.ts`).
    #[must_use]
    pub fn new(root: PathBuf, extensions: Vec<String>) -> Self {
        Self { root, extensions }
    }

    /// Resolve `specifier` imported from the file `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let fail = |message: &str| ResolveError {
            specifier: specifier.to_string(),
            message: message.to_string(),
        };

        if specifier.is_empty() {
            return Err(fail("empty specifier"));
        }

        if is_relative(specifier) {
            let from_dir = from.parent().unwrap_or(Path::new("."));
            return self
                .resolve_file_or_directory(&from_dir.join(specifier))
                .ok_or_else(|| fail("file not found"));
        }

        if Path::new(specifier).is_absolute() {
            return self
                .resolve_file_or_directory(Path::new(specifier))
                .ok_or_else(|| fail("file not found"));
        }

        self.resolve_bare(specifier, from)
            .ok_or_else(|| fail("package not found in node_modules"))
    }

    /// Resolve a file referenced from a stylesheet: `url(img.png)` is
    /// relative even without `./`, and no extensions are tried.
    pub fn resolve_asset(&self, url: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let from_dir = from.parent().unwrap_or(Path::new("."));
        let target = from_dir.join(url);
        if target.is_file() {
            canonical(&target).ok_or_else(|| ResolveError {
                specifier: url.to_string(),
                message: "file not accessible".to_string(),
            })
        } else {
            Err(ResolveError {
                specifier: url.to_string(),
                message: "file not found".to_string(),
            })
        }
    }

    fn resolve_file_or_directory(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return canonical(target);
        }

        for ext in &self.extensions {
            let with_ext = PathBuf::from(format!("{}{ext}", target.display()));
            if with_ext.is_file() {
                return canonical(&with_ext);
            }
        }

        if target.is_dir() {
            for ext in &self.extensions {
                let index = target.join(format!("index{ext}"));
                if index.is_file() {
                    return canonical(&index);
                }
            }
        }

        None
    }

    fn resolve_bare(&self, specifier: &str, from: &Path) -> Option<PathBuf> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);

        let mut current = from.parent();
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(&pkg_name);
            if pkg_dir.is_dir() {
                if let Some(found) = self.resolve_in_package(&pkg_dir, subpath.as_deref()) {
                    return Some(found);
                }
            }

            // Packages above the project root are not ours to bundle
            if dir == self.root {
                break;
            }
            current = dir.parent();
        }
        None
    }

    fn resolve_in_package(&self, pkg_dir: &Path, subpath: Option<&str>) -> Option<PathBuf> {
        let manifest = std::fs::read_to_string(pkg_dir.join("package.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok());

        let key = subpath.map_or_else(|| ".".to_string(), |sub| format!("./{sub}"));
        if let Some(entry) = manifest
            .as_ref()
            .and_then(|json| json.get("exports"))
            .and_then(|exports| resolve_exports(exports, &key))
        {
            if let Some(found) = self.resolve_file_or_directory(&pkg_dir.join(entry)) {
                return Some(found);
            }
        }

        if let Some(sub) = subpath {
            return self.resolve_file_or_directory(&pkg_dir.join(sub));
        }

        // Browser builds first, then ESM, then CommonJS
        for field in ["browser", "module", "main"] {
            if let Some(entry) = manifest
                .as_ref()
                .and_then(|json| json.get(field))
                .and_then(|v| v.as_str())
            {
                if let Some(found) = self.resolve_file_or_directory(&pkg_dir.join(entry)) {
                    return Some(found);
                }
            }
        }

        ["index.js", "index.mjs"]
            .iter()
            .map(|index| pkg_dir.join(index))
            .find(|p| p.is_file())
            .and_then(|p| canonical(&p))
    }
}

fn canonical(path: &Path) -> Option<PathBuf> {
    dunce::canonicalize(path).ok()
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Split a bare specifier into package name and subpath.
fn parse_bare_specifier(specifier: &str) -> (String, Option<String>) {
    let name_parts = if specifier.starts_with('@') { 2 } else { 1 };
    let mut parts = specifier.splitn(name_parts + 1, '/');
    let name: Vec<&str> = parts.by_ref().take(name_parts).collect();
    (name.join("/"), parts.next().map(str::to_string))
}

/// Resolve the `exports` field (string, subpath map, or condition map).
fn resolve_exports(exports: &serde_json::Value, subpath: &str) -> Option<String> {
    match exports {
        serde_json::Value::String(s) if subpath == "." => Some(s.clone()),
        serde_json::Value::Object(map) => {
            if let Some(value) = map.get(subpath) {
                return resolve_export_value(value);
            }
            let is_condition_map = map.keys().all(|k| !k.starts_with('.'));
            if subpath == "." && is_condition_map {
                return resolve_export_value(exports);
            }
            None
        }
        _ => None,
    }
}

fn resolve_export_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => ["browser", "import", "default", "require"]
            .iter()
            .find_map(|cond| map.get(*cond))
            .and_then(resolve_export_value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn resolver(root: &Path) -> Resolver {
        Resolver::new(
            dunce::canonicalize(root).unwrap(),
            vec![".ts".into(), ".js".into()],
        )
    }

    #[test]
    fn test_parse_bare_specifier() {
        assert_eq!(parse_bare_specifier("lodash"), ("lodash".into(), None));
        assert_eq!(
            parse_bare_specifier("lodash/get"),
            ("lodash".into(), Some("get".into()))
        );
        assert_eq!(parse_bare_specifier("@types/node"), ("@types/node".into(), None));
        assert_eq!(
            parse_bare_specifier("@babel/core/lib/parse"),
            ("@babel/core".into(), Some("lib/parse".into()))
        );
    }

    #[test]
    fn test_relative_with_extension_candidates() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/app.ts", "");
        write(dir.path(), "src/util.ts", "");
        write(dir.path(), "src/lib/index.js", "");

        let r = resolver(dir.path());
        let from = dir.path().join("src/app.ts");
        assert!(r.resolve("./util", &from).unwrap().ends_with("src/util.ts"));
        assert!(r.resolve("./util.ts", &from).unwrap().ends_with("src/util.ts"));
        assert!(r.resolve("./lib", &from).unwrap().ends_with("src/lib/index.js"));
        assert!(r.resolve("./missing", &from).is_err());
    }

    #[test]
    fn test_extension_order() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/dual.ts", "");
        write(dir.path(), "src/dual.js", "");
        let r = resolver(dir.path());
        let found = r.resolve("./dual", &dir.path().join("src/app.ts")).unwrap();
        assert!(found.ends_with("dual.ts"));
    }

    #[test]
    fn test_bare_package_fields() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/app.ts", "");
        write(
            dir.path(),
            "node_modules/pkg/package.json",
            r#"{ "main": "lib/cjs.js", "module": "lib/esm.js" }"#,
        );
        write(dir.path(), "node_modules/pkg/lib/cjs.js", "");
        write(dir.path(), "node_modules/pkg/lib/esm.js", "");
        write(dir.path(), "node_modules/pkg/lib/extra.js", "");

        let r = resolver(dir.path());
        let from = dir.path().join("src/app.ts");
        assert!(r.resolve("pkg", &from).unwrap().ends_with("lib/esm.js"));
        assert!(r.resolve("pkg/lib/extra", &from).unwrap().ends_with("lib/extra.js"));
        assert!(r.resolve("nope", &from).is_err());
    }

    #[test]
    fn test_bare_package_exports() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "node_modules/@scope/ui/package.json",
            r#"{ "exports": { ".": { "import": "./dist/index.mjs", "require": "./dist/index.cjs" }, "./button": "./dist/button.js" } }"#,
        );
        write(dir.path(), "node_modules/@scope/ui/dist/index.mjs", "");
        write(dir.path(), "node_modules/@scope/ui/dist/index.cjs", "");
        write(dir.path(), "node_modules/@scope/ui/dist/button.js", "");

        let r = resolver(dir.path());
        let from = dir.path().join("src/app.ts");
        assert!(r.resolve("@scope/ui", &from).unwrap().ends_with("dist/index.mjs"));
        assert!(r.resolve("@scope/ui/button", &from).unwrap().ends_with("dist/button.js"));
    }

    #[test]
    fn test_resolve_asset() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/styles/main.scss", "");
        write(dir.path(), "src/assets/images/bg.png", "");
        let r = resolver(dir.path());
        let from = dir.path().join("src/styles/main.scss");
        assert!(r
            .resolve_asset("../assets/images/bg.png", &from)
            .unwrap()
            .ends_with("src/assets/images/bg.png"));
        assert!(r.resolve_asset("../assets/images/none.png", &from).is_err());
    }
}
