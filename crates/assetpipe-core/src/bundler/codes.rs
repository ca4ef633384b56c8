//! Stable error codes for build failures.

/// Configuration failed validation (bad regex, unknown placeholder, ...).
pub const BUILD_CONFIG_INVALID: &str = "BUILD_CONFIG_INVALID";
/// An entry point file does not exist.
pub const BUILD_ENTRY_NOT_FOUND: &str = "BUILD_ENTRY_NOT_FOUND";
/// An import specifier could not be resolved.
pub const BUILD_RESOLVE_FAILED: &str = "BUILD_RESOLVE_FAILED";
/// A source file could not be read.
pub const BUILD_READ_FAILED: &str = "BUILD_READ_FAILED";
/// A script transform (TypeScript, JSX) failed.
pub const BUILD_SCRIPT_FAILED: &str = "BUILD_SCRIPT_FAILED";
/// A stylesheet transform (Sass, CSS) failed.
pub const BUILD_STYLE_FAILED: &str = "BUILD_STYLE_FAILED";
/// Transforms were declared in an order that cannot run.
pub const BUILD_TRANSFORM_ORDER: &str = "BUILD_TRANSFORM_ORDER";
/// Bundle minification failed.
pub const BUILD_MINIFY_FAILED: &str = "BUILD_MINIFY_FAILED";
/// Two different artifacts were named with the same output path.
pub const BUILD_OUTPUT_CONFLICT: &str = "BUILD_OUTPUT_CONFLICT";
/// A copy pattern source could not be copied.
pub const BUILD_COPY_FAILED: &str = "BUILD_COPY_FAILED";
/// Writing the output directory failed.
pub const BUILD_WRITE_FAILED: &str = "BUILD_WRITE_FAILED";
/// The transform thread pool could not be created.
pub const BUILD_POOL_FAILED: &str = "BUILD_POOL_FAILED";
