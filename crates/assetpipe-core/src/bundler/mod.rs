//! Build orchestration.
//!
//! ## Architecture
//!
//! 1. **Rules** - pick the transform list for each file
//! 2. **Graph** - discover and transform modules in parallel waves
//! 3. **Split** - assign modules to entry, shared, vendor and async bundles
//! 4. **Emit** - link modules into bundles and name them by content
//! 5. **Publish** - write the artifact set atomically, HTML last
//!
//! ```ignore
//! use assetpipe_core::{Builder, PipelineConfig};
//!
//! let config = PipelineConfig::load(&root, None)?;
//! let report = Builder::new(config)?.build_and_publish()?;
//! println!("{} files", report.artifacts.len());
//! ```

pub mod assets;
pub mod chunks;
pub mod codes;
pub mod emit;
pub mod graph;
pub mod html;
pub mod imports;
pub mod naming;
pub mod pipeline;
pub mod publish;
pub mod resolve;
pub mod rules;

pub use chunks::{Bundle, BundleKind, ChunkGraph};
pub use emit::EmittedBundle;
pub use graph::{ModuleGraph, ModuleId, TransformCache};
pub use naming::OutputTemplate;
pub use pipeline::{ModuleOutput, TransformKind};
pub use publish::{Artifact, ArtifactKind, ArtifactSet, PublishOptions, PublishReport};
pub use rules::{Rule, RuleSet};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::compiler::{ScriptCompiler, SwcCompiler};
use crate::config::PipelineConfig;
use crate::error::Error;
use emit::{BundleTemplates, EmitOptions};
use graph::GraphBuilder;
use pipeline::PipelineContext;
use resolve::Resolver;

/// A build failure with a stable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    pub code: &'static str,
    pub message: String,
    /// Project-relative file the failure is about.
    pub path: Option<String>,
}

impl BuildError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {} ({})", self.code, self.message, path)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for BuildError {}

/// Result of an in-memory build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub artifacts: ArtifactSet,
    pub bundles: Vec<EmittedBundle>,
    pub modules: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub duration: Duration,
}

/// Result of a build that was published to disk.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub artifacts: Arc<ArtifactSet>,
    pub publish: PublishReport,
    pub bundles: Vec<EmittedBundle>,
    pub modules: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub duration: Duration,
}

/// Runs builds for one project. Keeps the transform cache between builds.
pub struct Builder {
    config: Arc<PipelineConfig>,
    root: PathBuf,
    rules: RuleSet,
    resolver: Resolver,
    templates: BundleTemplates,
    compiler: Arc<dyn ScriptCompiler>,
    cache: TransformCache,
    pool: rayon::ThreadPool,
}

impl Builder {
    /// Compile rules and templates and start the transform pool.
    pub fn new(config: PipelineConfig) -> Result<Self, Error> {
        config.validate()?;
        let root = dunce::canonicalize(&config.root).map_err(|e| {
            Error::InvalidConfig(format!("project root {}: {e}", config.root.display()))
        })?;

        let rules = RuleSet::from_config(&config.rules)?;
        let resolver = Resolver::new(root.clone(), config.resolve.extensions.clone());
        let templates = BundleTemplates {
            js: OutputTemplate::parse(&config.output.filename)?,
            js_chunk: OutputTemplate::parse(&config.output.chunk_filename)?,
            css: OutputTemplate::parse(&config.output.css_filename)?,
            css_chunk: OutputTemplate::parse(&config.output.css_chunk_filename)?,
        };

        let threads = config.parallelism();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("assetpipe-transform-{i}"))
            .build()
            .map_err(|e| Error::Build(BuildError::new(codes::BUILD_POOL_FAILED, e.to_string())))?;
        tracing::debug!(threads, root = %root.display(), "builder ready");

        Ok(Self {
            config: Arc::new(config),
            root,
            rules,
            resolver,
            templates,
            compiler: Arc::new(SwcCompiler::new()),
            cache: TransformCache::new(),
            pool,
        })
    }

    /// Replace the script compiler.
    #[must_use]
    pub fn with_compiler(mut self, compiler: Arc<dyn ScriptCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Canonical project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(&self.config.output.dir)
    }

    /// Number of cached transform results.
    #[must_use]
    pub fn cached_modules(&self) -> usize {
        self.cache.len()
    }

    /// Build everything in memory.
    pub fn build(&self) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let config = &*self.config;
        let minify = config.optimization.minify;
        let span = tracing::info_span!("build", mode = config.mode.as_str(), minify);
        let _guard = span.enter();

        let graph = GraphBuilder {
            root: &self.root,
            rules: &self.rules,
            resolver: &self.resolver,
            ctx: PipelineContext {
                compiler: self.compiler.as_ref(),
                minify,
                mode: config.mode,
            },
            cache: &self.cache,
            pool: &self.pool,
            progress: config.dev.progress,
        }
        .build(&config.entries)?;
        let (cache_hits, cache_misses) = self.cache.take_stats();

        let live: HashSet<PathBuf> = graph.modules().map(|m| m.path.clone()).collect();
        self.cache.retain(&live);

        let chunks = ChunkGraph::split(&graph, config.optimization.split_vendors);
        tracing::debug!(modules = graph.len(), bundles = chunks.bundles().len(), "split");

        let emitted = self.pool.install(|| {
            emit::emit(
                &graph,
                &chunks,
                &EmitOptions {
                    templates: &self.templates,
                    public_path: &config.output.public_path,
                    minify,
                    compiler: self.compiler.as_ref(),
                },
            )
        })?;

        let mut set = ArtifactSet::new();
        for artifact in emitted.artifacts {
            set.insert(artifact)?;
        }
        for artifact in assets::resource_artifacts(&graph) {
            set.insert(artifact)?;
        }
        for artifact in assets::copy_all(&self.root, &config.copy)? {
            set.insert(artifact)?;
        }

        let mut startup: Vec<String> = Vec::new();
        for (name, files) in emitted.entrypoints {
            for file in &files {
                if !startup.contains(file) {
                    startup.push(file.clone());
                }
            }
            set.set_entrypoint(name, files);
        }

        if let Some(html) = &config.html {
            let document = html::render_html(&self.root, html, &config.output.public_path, &startup)?;
            set.insert(
                Artifact::new(html.filename.clone(), document.into_bytes(), ArtifactKind::Html)
                    .with_logical(html.filename.clone()),
            )?;
        }

        if let Some(manifest) = &config.output.manifest {
            let json = set.manifest_json(&config.output.public_path);
            set.insert(Artifact::new(manifest.clone(), json.into_bytes(), ArtifactKind::Manifest))?;
        }

        set.set_sources(graph.source_paths());

        let duration = started.elapsed();
        tracing::info!(
            modules = graph.len(),
            artifacts = set.len(),
            cache_hits,
            cache_misses,
            ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "build finished"
        );

        Ok(BuildOutput {
            artifacts: set,
            bundles: emitted.bundles,
            modules: graph.len(),
            cache_hits,
            cache_misses,
            duration,
        })
    }

    /// Write a built set to the output directory.
    pub fn publish(&self, set: &ArtifactSet) -> Result<PublishReport, BuildError> {
        let options = PublishOptions {
            clean: self.config.output.clean,
            keep: self.config.output.keep.clone(),
        };
        let report = publish::publish(&self.out_dir(), set, &options)?;
        tracing::info!(
            written = report.written.len(),
            unchanged = report.unchanged,
            removed = report.removed.len(),
            "published"
        );
        Ok(report)
    }

    /// Build, then publish. A failed build publishes nothing.
    pub fn build_and_publish(&self) -> Result<BuildReport, BuildError> {
        let output = self.build()?;
        let publish = self.publish(&output.artifacts)?;
        Ok(BuildReport {
            artifacts: Arc::new(output.artifacts),
            publish,
            bundles: output.bundles,
            modules: output.modules,
            cache_hits: output.cache_hits,
            cache_misses: output.cache_misses,
            duration: output.duration,
        })
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("root", &self.root)
            .field("compiler", &self.compiler.name())
            .field("threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_display() {
        let err = BuildError::new(codes::BUILD_SCRIPT_FAILED, "1:5: Expected ';'").with_path("src/app.ts");
        assert_eq!(err.to_string(), "BUILD_SCRIPT_FAILED: 1:5: Expected ';' (src/app.ts)");
        let err = BuildError::new(codes::BUILD_ENTRY_NOT_FOUND, "missing");
        assert_eq!(err.to_string(), "BUILD_ENTRY_NOT_FOUND: missing");
    }

    #[test]
    fn test_builder_rejects_missing_root() {
        let config = PipelineConfig::new(PathBuf::from("/nonexistent/assetpipe/project"));
        let err = Builder::new(config).unwrap_err();
        assert_eq!(err.code(), codes::BUILD_CONFIG_INVALID);
    }
}
