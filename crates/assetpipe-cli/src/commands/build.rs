//! `assetpipe build` command implementation.
//!
//! Loads the config, layers the CLI flags on top, runs one full build and
//! publishes it. `--json` prints a single result object on stdout.

use assetpipe_core::bundler::{BuildReport, Builder};
use assetpipe_core::config::Mode;
use assetpipe_core::version::SCHEMA_VERSION;
use assetpipe_core::{Error, PipelineConfig};
use miette::Result;
use serde::Serialize;
use std::path::PathBuf;

use super::ErrorJson;

/// Build action, after flag parsing.
#[derive(Debug, Clone)]
pub struct BuildAction {
    /// Project directory.
    pub cwd: PathBuf,
    /// Explicit config file.
    pub config: Option<PathBuf>,
    /// `Some(false)` for `--no-minify`.
    pub minify: Option<bool>,
    pub max_parallel: Option<usize>,
    pub mode: Option<Mode>,
}

#[derive(Serialize)]
struct ArtifactJson<'a> {
    path: &'a str,
    kind: assetpipe_core::bundler::ArtifactKind,
    bytes: usize,
    hash: &'a str,
}

#[derive(Serialize)]
struct BundleJson<'a> {
    name: &'a str,
    kind: &'static str,
    modules: usize,
    js: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    css: Option<&'a str>,
}

#[derive(Serialize)]
struct CacheJson {
    hits: usize,
    misses: usize,
}

#[derive(Serialize)]
struct BuildResultJson<'a> {
    schema_version: u32,
    ok: bool,
    cwd: String,
    out_dir: String,
    duration_ms: u64,
    modules: usize,
    cache: CacheJson,
    bundles: Vec<BundleJson<'a>>,
    artifacts: Vec<ArtifactJson<'a>>,
    written: &'a [String],
    unchanged: usize,
    removed: &'a [String],
}

/// Run the build command.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let builder = match configure(&action) {
        Ok(builder) => builder,
        Err(e) => ErrorJson::from_core(&e).exit(json),
    };

    let report = match builder.build_and_publish() {
        Ok(report) => report,
        Err(e) => ErrorJson::from_core(&Error::Build(e)).exit(json),
    };

    if json {
        let out_dir = builder.out_dir();
        let result = to_json(&action, &out_dir, &report);
        println!("{}", serde_json::to_string(&result).unwrap_or_default());
    } else {
        print_human_output(&builder, &report);
    }
    Ok(())
}

fn configure(action: &BuildAction) -> Result<Builder, Error> {
    let mut config = PipelineConfig::load(&action.cwd, action.config.as_deref())?;
    if let Some(minify) = action.minify {
        config = config.with_minify(minify);
    }
    if let Some(max_parallel) = action.max_parallel {
        config = config.with_max_parallel(max_parallel);
    }
    if let Some(mode) = action.mode {
        config = config.with_mode(mode);
    }
    tracing::debug!(
        mode = config.mode.as_str(),
        minify = config.optimization.minify,
        parallelism = config.parallelism(),
        "configured"
    );
    Builder::new(config)
}

fn to_json<'a>(action: &BuildAction, out_dir: &std::path::Path, report: &'a BuildReport) -> BuildResultJson<'a> {
    BuildResultJson {
        schema_version: SCHEMA_VERSION,
        ok: true,
        cwd: action.cwd.display().to_string(),
        out_dir: out_dir.display().to_string(),
        duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
        modules: report.modules,
        cache: CacheJson {
            hits: report.cache_hits,
            misses: report.cache_misses,
        },
        bundles: report
            .bundles
            .iter()
            .map(|b| BundleJson {
                name: &b.name,
                kind: b.kind.as_str(),
                modules: b.modules,
                js: &b.js,
                css: b.css.as_deref(),
            })
            .collect(),
        artifacts: report
            .artifacts
            .iter()
            .map(|a| ArtifactJson {
                path: &a.path,
                kind: a.kind,
                bytes: a.len(),
                hash: &a.hash,
            })
            .collect(),
        written: &report.publish.written,
        unchanged: report.publish.unchanged,
        removed: &report.publish.removed,
    }
}

fn print_human_output(builder: &Builder, report: &BuildReport) {
    let width = report
        .artifacts
        .iter()
        .map(|a| a.path.len())
        .max()
        .unwrap_or(0);

    for artifact in report.artifacts.iter() {
        let status = if report.publish.written.contains(&artifact.path) {
            "written"
        } else {
            "unchanged"
        };
        println!(
            "  {:<width$}  {:>10}  ({status})",
            artifact.path,
            format_size(artifact.len()),
        );
    }

    println!();
    for path in &report.publish.removed {
        println!("  - {path} (removed)");
    }
    println!(
        "Built {} bundles from {} modules into {} ({}ms, {} cached)",
        report.bundles.len(),
        report.modules,
        builder.out_dir().display(),
        report.duration.as_millis(),
        report.cache_hits,
    );
}

fn format_size(bytes: usize) -> String {
    #[allow(clippy::cast_precision_loss)]
    let kib = bytes as f64 / 1024.0;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if kib < 1024.0 {
        format!("{kib:.1} KiB")
    } else {
        format!("{:.1} MiB", kib / 1024.0)
    }
}
