//! Script compilation.
//!
//! The transform pipeline talks to a [`ScriptCompiler`]; the production
//! implementation is [`SwcCompiler`]. Compilers are shared across the rayon
//! pool, so implementations must be `Send + Sync` and keep no per-call state.

mod swc;

use std::fmt;
use std::path::Path;

pub use swc::SwcCompiler;

/// Script compiler backend.
pub trait ScriptCompiler: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Compile TypeScript / JSX / modern JavaScript to plain JavaScript.
    ///
    /// ES module syntax is preserved; the linker rewrites it afterwards.
    fn transpile(&self, path: &Path, source: &str) -> Result<String, CompilerError>;

    /// Reprint already-valid JavaScript in canonical form without
    /// transforming it.
    fn normalize(&self, path: &Path, source: &str) -> Result<String, CompilerError>;

    /// Whitespace-minify a finished bundle, dropping every comment.
    fn minify(&self, name: &str, code: &str) -> Result<String, CompilerError>;
}

/// Error during compilation.
#[derive(Debug, Clone)]
pub struct CompilerError {
    /// Error code.
    pub code: &'static str,
    /// Human-readable error message.
    pub message: String,
}

impl CompilerError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new("COMPILER_PARSE_ERROR", message)
    }

    #[must_use]
    pub fn transform_error(message: impl Into<String>) -> Self {
        Self::new("COMPILER_TRANSFORM_ERROR", message)
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CompilerError {}
