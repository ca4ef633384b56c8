//! Artifact sets and publishing them to the output directory.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assetpipe_util::fs::{list_files, remove_empty_dirs, to_slash, write_if_changed};
use assetpipe_util::hash::content_hash;

use super::codes;
use super::BuildError;

/// What produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Script,
    Stylesheet,
    Resource,
    Copy,
    Html,
    Manifest,
}

/// One output file. Bytes are shared so sets can be cloned cheaply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the output directory, forward slashes.
    pub path: String,
    pub bytes: Arc<Vec<u8>>,
    pub hash: String,
    pub kind: ArtifactKind,
    /// Manifest key, when the artifact has a stable logical name.
    pub logical: Option<String>,
}

impl Artifact {
    #[must_use]
    pub fn new(path: impl Into<String>, bytes: Vec<u8>, kind: ArtifactKind) -> Self {
        Self::shared(path, Arc::new(bytes), kind)
    }

    #[must_use]
    pub fn shared(path: impl Into<String>, bytes: Arc<Vec<u8>>, kind: ArtifactKind) -> Self {
        let hash = content_hash(&bytes);
        Self {
            path: path.into(),
            bytes,
            hash,
            kind,
            logical: None,
        }
    }

    #[must_use]
    pub fn with_logical(mut self, logical: impl Into<String>) -> Self {
        self.logical = Some(logical.into());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The complete output of one build. Never mutated once built.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    artifacts: BTreeMap<String, Artifact>,
    manifest: BTreeMap<String, String>,
    entrypoints: BTreeMap<String, Vec<String>>,
    sources: Vec<PathBuf>,
}

impl ArtifactSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact. The same path with the same bytes is accepted once;
    /// the same path with different bytes is a conflict.
    pub fn insert(&mut self, artifact: Artifact) -> Result<(), BuildError> {
        if let Some(existing) = self.artifacts.get(&artifact.path) {
            if existing.bytes == artifact.bytes {
                return Ok(());
            }
            return Err(BuildError::new(
                codes::BUILD_OUTPUT_CONFLICT,
                format!("two different outputs are named `{}`", artifact.path),
            )
            .with_path(artifact.path));
        }
        if let Some(logical) = &artifact.logical {
            self.manifest.insert(logical.clone(), artifact.path.clone());
        }
        self.artifacts.insert(artifact.path.clone(), artifact);
        Ok(())
    }

    pub fn set_entrypoint(&mut self, name: impl Into<String>, files: Vec<String>) {
        self.entrypoints.insert(name.into(), files);
    }

    pub fn set_sources(&mut self, sources: Vec<PathBuf>) {
        self.sources = sources;
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Artifact> {
        self.artifacts.get(path)
    }

    /// Artifacts ordered by path.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Logical name → output path.
    #[must_use]
    pub fn manifest(&self) -> &BTreeMap<String, String> {
        &self.manifest
    }

    #[must_use]
    pub fn entrypoints(&self) -> &BTreeMap<String, Vec<String>> {
        &self.entrypoints
    }

    /// Source files that fed this build.
    #[must_use]
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Paths whose bytes differ from (or are missing in) `previous`.
    #[must_use]
    pub fn changed_since(&self, previous: &ArtifactSet) -> Vec<String> {
        let mut changed: Vec<String> = self
            .artifacts
            .values()
            .filter(|a| previous.get(&a.path).map_or(true, |p| p.hash != a.hash))
            .map(|a| a.path.clone())
            .collect();
        changed.extend(
            previous
                .artifacts
                .keys()
                .filter(|path| !self.artifacts.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }

    /// Render `asset-manifest.json`.
    #[must_use]
    pub fn manifest_json(&self, public_path: &str) -> String {
        #[derive(Serialize)]
        struct Manifest<'a> {
            files: BTreeMap<&'a str, String>,
            entrypoints: &'a BTreeMap<String, Vec<String>>,
        }
        let files = self
            .manifest
            .iter()
            .map(|(logical, path)| (logical.as_str(), super::emit::public_url(public_path, path)))
            .collect();
        let manifest = Manifest {
            files,
            entrypoints: &self.entrypoints,
        };
        serde_json::to_string_pretty(&manifest).unwrap_or_else(|_| "{}".to_string())
    }
}

/// What publishing did to the output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub written: Vec<String>,
    pub unchanged: usize,
    pub removed: Vec<String>,
}

/// Publishing options.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Remove files that are not part of the set.
    pub clean: bool,
    /// Glob patterns (relative to the output directory) never removed.
    pub keep: Vec<String>,
}

/// Write `set` into `out_dir`.
///
/// Files whose bytes did not change are left alone. HTML documents are
/// written after everything they reference, and stale files are removed
/// only once the new set is completely on disk.
pub fn publish(out_dir: &Path, set: &ArtifactSet, options: &PublishOptions) -> Result<PublishReport, BuildError> {
    let mut report = PublishReport::default();

    let (html, rest): (Vec<&Artifact>, Vec<&Artifact>) = set.iter().partition(|a| a.kind == ArtifactKind::Html);
    for artifact in rest.into_iter().chain(html) {
        let target = out_dir.join(&artifact.path);
        let written = write_if_changed(&target, &artifact.bytes).map_err(|e| {
            BuildError::new(codes::BUILD_WRITE_FAILED, e.to_string()).with_path(artifact.path.clone())
        })?;
        if written {
            tracing::debug!(path = %artifact.path, bytes = artifact.len(), "wrote");
            report.written.push(artifact.path.clone());
        } else {
            report.unchanged += 1;
        }
    }

    if options.clean {
        let keep: Vec<glob::Pattern> = options
            .keep
            .iter()
            .filter_map(|k| glob::Pattern::new(k).ok())
            .collect();
        for rel in list_files(out_dir) {
            let rel = to_slash(&rel);
            if set.get(&rel).is_some() || keep.iter().any(|k| k.matches(&rel)) {
                continue;
            }
            std::fs::remove_file(out_dir.join(&rel)).map_err(|e| {
                BuildError::new(codes::BUILD_WRITE_FAILED, e.to_string()).with_path(rel.clone())
            })?;
            tracing::debug!(path = %rel, "removed stale output");
            report.removed.push(rel);
        }
        remove_empty_dirs(out_dir)
            .map_err(|e| BuildError::new(codes::BUILD_WRITE_FAILED, e.to_string()))?;
    }

    Ok(report)
}
