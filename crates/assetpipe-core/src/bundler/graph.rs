//! Module graph discovery.
//!
//! Starting from the entries, the graph grows in waves: every module of the
//! current frontier is read, transformed and scanned in parallel on the
//! build's rayon pool, then the next frontier is collected in frontier order.
//! Module ids are project-relative paths (`./src/app.ts`), so the graph does
//! not depend on which worker finished first.

use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assetpipe_util::fs::to_slash;
use assetpipe_util::hash::blake3_bytes;

use super::codes;
use super::imports::{scan_imports, ImportKind, ImportRef};
use super::pipeline::{run_pipeline, ModuleOutput, PipelineContext};
use super::resolve::Resolver;
use super::rules::RuleSet;
use super::BuildError;
use crate::config::EntryPoint;
use crate::css;

/// Stable module identifier.
pub type ModuleId = String;

/// A resolved edge of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Specifier as written in the importer.
    pub specifier: String,
    pub kind: ImportKind,
    /// `None` only for CommonJS requires that could not be resolved.
    pub target: Option<ModuleId>,
}

/// A transformed module.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    pub path: PathBuf,
    /// Name of the matching rule, `None` for pass-through.
    pub rule: Option<String>,
    pub content_hash: String,
    pub output: Arc<ModuleOutput>,
    pub deps: Vec<Dependency>,
}

impl Module {
    /// Whether this module is third-party code.
    #[must_use]
    pub fn is_vendor(&self) -> bool {
        self.id.split('/').any(|part| part == "node_modules")
    }

    /// Eager dependency targets in import order.
    pub fn static_targets(&self) -> impl Iterator<Item = &ModuleId> {
        self.deps
            .iter()
            .filter(|d| d.kind.is_eager())
            .filter_map(|d| d.target.as_ref())
    }

    /// Dynamic import targets in import order.
    pub fn dynamic_targets(&self) -> impl Iterator<Item = &ModuleId> {
        self.deps
            .iter()
            .filter(|d| d.kind == ImportKind::Dynamic)
            .filter_map(|d| d.target.as_ref())
    }

    /// Target of a specifier written in this module.
    #[must_use]
    pub fn target_of(&self, specifier: &str, kind: ImportKind) -> Option<&ModuleId> {
        self.deps
            .iter()
            .find(|d| d.specifier == specifier && d.kind == kind)
            .and_then(|d| d.target.as_ref())
    }
}

/// The discovered module graph.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    index: HashMap<ModuleId, usize>,
    entries: Vec<(String, ModuleId)>,
}

impl ModuleGraph {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Module> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    /// Modules in discovery order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// `(entry name, module id)` in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[(String, ModuleId)] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Absolute paths of every module, sorted.
    #[must_use]
    pub fn source_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.modules.iter().map(|m| m.path.clone()).collect();
        paths.sort();
        paths
    }

    #[cfg(test)]
    pub(crate) fn from_parts(modules: Vec<Module>, entries: Vec<(String, ModuleId)>) -> Self {
        let mut graph = Self {
            entries,
            ..Self::default()
        };
        for module in modules {
            graph.insert(module);
        }
        graph
    }

    fn insert(&mut self, module: Module) {
        self.index.insert(module.id.clone(), self.modules.len());
        self.modules.push(module);
    }
}

/// Project-relative id of an absolute path; paths outside the root keep
/// their absolute form.
#[must_use]
pub fn module_id(root: &Path, path: &Path) -> ModuleId {
    match path.strip_prefix(root) {
        Ok(rel) => format!("./{}", to_slash(rel)),
        Err(_) => to_slash(path),
    }
}

fn rel_path(id: &str) -> &str {
    id.strip_prefix("./").unwrap_or(id)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    content_hash: String,
    rule: Option<String>,
    output: Arc<ModuleOutput>,
    imports: Arc<Vec<ImportRef>>,
}

/// Transform results keyed by path, reused while the bytes and the matching
/// rule stay the same.
#[derive(Debug, Default)]
pub struct TransformCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl TransformCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, path: &Path, content_hash: &str, rule: Option<&str>) -> Option<CacheEntry> {
        let entries = self.entries.lock();
        let entry = entries
            .get(path)
            .filter(|e| e.content_hash == content_hash && e.rule.as_deref() == rule)
            .cloned();
        drop(entries);

        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    fn put(&self, path: PathBuf, entry: CacheEntry) {
        self.entries.lock().insert(path, entry);
    }

    /// Reset the hit/miss counters, returning their previous values.
    pub fn take_stats(&self) -> (usize, usize) {
        (
            self.hits.swap(0, Ordering::Relaxed),
            self.misses.swap(0, Ordering::Relaxed),
        )
    }

    /// Drop entries for files that are no longer part of the graph.
    pub fn retain(&self, live: &HashSet<PathBuf>) {
        self.entries.lock().retain(|path, _| live.contains(path));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inputs of one graph discovery.
pub struct GraphBuilder<'a> {
    pub root: &'a Path,
    pub rules: &'a RuleSet,
    pub resolver: &'a Resolver,
    pub ctx: PipelineContext<'a>,
    pub cache: &'a TransformCache,
    pub pool: &'a rayon::ThreadPool,
    pub progress: bool,
}

impl GraphBuilder<'_> {
    /// Discover, transform and link every module reachable from `entries`.
    pub fn build(&self, entries: &[EntryPoint]) -> Result<ModuleGraph, BuildError> {
        let mut graph = ModuleGraph::default();
        let mut seen: HashSet<ModuleId> = HashSet::new();
        let mut frontier: Vec<(ModuleId, PathBuf)> = Vec::new();

        for entry in entries {
            let path = self.resolve_entry(entry)?;
            let id = module_id(self.root, &path);
            graph.entries.push((entry.name.clone(), id.clone()));
            if seen.insert(id.clone()) {
                frontier.push((id, path));
            }
        }

        let mut wave = 0usize;
        while !frontier.is_empty() {
            wave += 1;
            if self.progress {
                tracing::info!(wave, modules = frontier.len(), "transforming");
            } else {
                tracing::debug!(wave, modules = frontier.len(), "transforming");
            }

            let results: Vec<Result<Module, BuildError>> = self.pool.install(|| {
                frontier
                    .par_iter()
                    .map(|(id, path)| self.load(id, path))
                    .collect()
            });

            let mut next = Vec::new();
            for result in results {
                let module = result?;
                for dep in &module.deps {
                    if let Some(target) = &dep.target {
                        if seen.insert(target.clone()) {
                            next.push((target.clone(), self.root.join(rel_path(target))));
                        }
                    }
                }
                graph.insert(module);
            }
            frontier = next;
        }

        Ok(graph)
    }

    fn resolve_entry(&self, entry: &EntryPoint) -> Result<PathBuf, BuildError> {
        let import = &entry.import;
        let specifier = if import.starts_with('.') || Path::new(import).is_absolute() {
            import.clone()
        } else {
            format!("./{import}")
        };
        self.resolver
            .resolve(&specifier, &self.root.join("package.json"))
            .map_err(|e| {
                BuildError::new(
                    codes::BUILD_ENTRY_NOT_FOUND,
                    format!("entry `{}`: {e}", entry.name),
                )
                .with_path(import.clone())
            })
    }

    fn load(&self, id: &str, path: &Path) -> Result<Module, BuildError> {
        let rel = rel_path(id);
        let bytes = std::fs::read(path).map_err(|e| {
            BuildError::new(codes::BUILD_READ_FAILED, e.to_string()).with_path(rel)
        })?;
        let content_hash = blake3_bytes(&bytes);
        let rule = self.rules.match_path(rel);
        let rule_name = rule.map(|r| r.name.clone());

        let (output, imports) = match self.cache.get(path, &content_hash, rule_name.as_deref()) {
            Some(entry) => {
                tracing::trace!(module = id, "transform cache hit");
                (entry.output, entry.imports)
            }
            None => {
                let output = Arc::new(run_pipeline(&self.ctx, rule, rel, path, bytes)?);
                let imports = Arc::new(discover_imports(&output));
                if is_cacheable(path, &output) {
                    self.cache.put(
                        path.to_path_buf(),
                        CacheEntry {
                            content_hash: content_hash.clone(),
                            rule: rule_name.clone(),
                            output: Arc::clone(&output),
                            imports: Arc::clone(&imports),
                        },
                    );
                }
                (output, imports)
            }
        };

        let deps = imports
            .iter()
            .map(|import| self.resolve_dependency(id, path, &output, import))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Module {
            id: id.to_string(),
            path: path.to_path_buf(),
            rule: rule_name,
            content_hash,
            output,
            deps,
        })
    }

    fn resolve_dependency(
        &self,
        id: &str,
        path: &Path,
        output: &ModuleOutput,
        import: &ImportRef,
    ) -> Result<Dependency, BuildError> {
        let resolved = if matches!(output, ModuleOutput::Style { .. }) {
            self.resolver
                .resolve_asset(css::url_path(&import.specifier), path)
        } else {
            self.resolver.resolve(&import.specifier, path)
        };

        let target = match resolved {
            Ok(found) => Some(module_id(self.root, &found)),
            Err(e) if import.kind == ImportKind::Require => {
                tracing::warn!(module = id, specifier = %import.specifier, "{e}; left to the runtime");
                None
            }
            Err(e) => {
                return Err(
                    BuildError::new(codes::BUILD_RESOLVE_FAILED, e.to_string()).with_path(rel_path(id))
                );
            }
        };

        Ok(Dependency {
            specifier: import.specifier.clone(),
            kind: import.kind,
            target,
        })
    }
}

fn discover_imports(output: &ModuleOutput) -> Vec<ImportRef> {
    match output {
        ModuleOutput::Script { code } => scan_imports(code),
        ModuleOutput::Style { css, .. } => css::collect_urls(css)
            .into_iter()
            .map(|specifier| ImportRef {
                specifier,
                kind: ImportKind::Static,
            })
            .collect(),
        ModuleOutput::Resource { .. } => Vec::new(),
    }
}

/// Sass files pull in partials the graph never sees, so their output can
/// change while their own bytes do not.
fn is_cacheable(path: &Path, output: &ModuleOutput) -> bool {
    !(matches!(output, ModuleOutput::Style { .. }) && css::sass::is_sass_file(path))
}
