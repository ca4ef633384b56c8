//! Sass/SCSS preprocessing using grass.

use std::path::Path;

/// Sass compilation options.
#[derive(Debug, Clone, Default)]
pub struct SassOptions {
    /// Extra load paths for `@import` / `@use` resolution.
    pub load_paths: Vec<String>,
    /// Compressed instead of expanded output.
    pub minify: bool,
    /// Source file path; its directory is always a load path and a `.sass`
    /// extension selects the indented syntax.
    pub filename: Option<String>,
}

/// Compile Sass/SCSS to CSS.
pub fn compile_sass(source: &str, options: &SassOptions) -> Result<String, SassError> {
    let mut grass_options = grass::Options::default().style(if options.minify {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    });

    for path in &options.load_paths {
        grass_options = grass_options.load_path(path);
    }

    if let Some(fname) = &options.filename {
        let path = Path::new(fname);
        if let Some(parent) = path.parent() {
            grass_options = grass_options.load_path(parent);
        }
        if is_indented(path) {
            grass_options = grass_options.input_syntax(grass::InputSyntax::Sass);
        }
    }

    grass::from_string(source.to_string(), &grass_options)
        .map_err(|e| SassError::Compile(e.to_string()))
}

/// `.sass` files use the indented syntax.
#[must_use]
pub fn is_indented(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"))
}

/// Whether grass should run on this file at all; plain `.css` passes through.
#[must_use]
pub fn is_sass_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("scss") || e.eq_ignore_ascii_case("sass"))
}

/// Sass compilation error.
#[derive(Debug)]
pub enum SassError {
    Compile(String),
}

impl std::fmt::Display for SassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SassError::Compile(msg) => write!(f, "Sass compile error: {msg}"),
        }
    }
}

impl std::error::Error for SassError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_variables_and_nesting() {
        let scss = r"
            $primary: blue;
            .nav {
                .link { color: $primary; }
            }
        ";
        let out = compile_sass(scss, &SassOptions::default()).unwrap();
        assert!(out.contains(".nav .link"));
        assert!(out.contains("color: blue"));
    }

    #[test]
    fn test_indented_syntax() {
        let sass = "$c: red\n.a\n  color: $c\n";
        let options = SassOptions {
            filename: Some("src/styles/theme.sass".into()),
            ..Default::default()
        };
        let out = compile_sass(sass, &options).unwrap();
        assert!(out.contains("color: red"));
    }

    #[test]
    fn test_import_relative_to_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("_vars.scss"), "$gap: 4px;").unwrap();
        let main = dir.path().join("main.scss");
        let options = SassOptions {
            filename: Some(main.display().to_string()),
            ..Default::default()
        };
        let out = compile_sass("@import 'vars';\n.a { margin: $gap; }", &options).unwrap();
        assert!(out.contains("margin: 4px"));
    }

    #[test]
    fn test_compressed() {
        let options = SassOptions {
            minify: true,
            ..Default::default()
        };
        let out = compile_sass(".a { color: red; }", &options).unwrap();
        assert!(out.starts_with(".a{color:red}"));
    }

    #[test]
    fn test_compile_error() {
        let err = compile_sass(".a { color: $missing; }", &SassOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Sass compile error"));
    }

    #[test]
    fn test_is_sass_file() {
        assert!(is_sass_file(Path::new("a.scss")));
        assert!(is_sass_file(Path::new("a.SASS")));
        assert!(!is_sass_file(Path::new("a.css")));
    }
}
