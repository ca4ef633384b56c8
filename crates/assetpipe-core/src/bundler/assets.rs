//! Static files: copy patterns and resources emitted by the pipeline.

use std::path::Path;
use std::sync::Arc;

use assetpipe_util::fs::{list_files, to_slash};

use super::codes;
use super::graph::ModuleGraph;
use super::naming::stays_inside;
use super::pipeline::ModuleOutput;
use super::publish::{Artifact, ArtifactKind};
use super::BuildError;
use crate::config::CopyPattern;

/// Copy `from` (a directory or a single file, relative to `root`) to `to`
/// (relative to the output directory).
pub fn copy_pattern(root: &Path, pattern: &CopyPattern) -> Result<Vec<Artifact>, BuildError> {
    if !stays_inside(&pattern.to) {
        return Err(BuildError::new(
            codes::BUILD_CONFIG_INVALID,
            format!("copy target `{}` must stay inside the output directory", pattern.to),
        ));
    }

    let source = root.join(&pattern.from);
    let to = pattern.to.trim_matches('/');

    if source.is_file() {
        let bytes = read(&source, &pattern.from)?;
        return Ok(vec![Artifact::new(to, bytes, ArtifactKind::Copy)]);
    }

    if !source.is_dir() {
        if pattern.no_error_on_missing {
            tracing::debug!(from = %pattern.from, "copy source missing, skipped");
            return Ok(Vec::new());
        }
        return Err(
            BuildError::new(codes::BUILD_COPY_FAILED, "copy source does not exist")
                .with_path(pattern.from.clone()),
        );
    }

    let mut artifacts = Vec::new();
    for rel in list_files(&source) {
        let rel = to_slash(&rel);
        let bytes = read(&source.join(&rel), &format!("{}/{rel}", pattern.from))?;
        let path = if to.is_empty() {
            rel
        } else {
            format!("{to}/{rel}")
        };
        artifacts.push(Artifact::new(path, bytes, ArtifactKind::Copy));
    }
    tracing::debug!(from = %pattern.from, to = %pattern.to, files = artifacts.len(), "copied");
    Ok(artifacts)
}

/// Every pattern, in declaration order.
pub fn copy_all(root: &Path, patterns: &[CopyPattern]) -> Result<Vec<Artifact>, BuildError> {
    let mut artifacts = Vec::new();
    for pattern in patterns {
        artifacts.extend(copy_pattern(root, pattern)?);
    }
    Ok(artifacts)
}

/// Files emitted by resource modules, in graph order.
#[must_use]
pub fn resource_artifacts(graph: &ModuleGraph) -> Vec<Artifact> {
    graph
        .modules()
        .filter_map(|module| match module.output.as_ref() {
            ModuleOutput::Resource { path, bytes } => Some(
                Artifact::shared(path.clone(), Arc::clone(bytes), ArtifactKind::Resource)
                    .with_logical(path.clone()),
            ),
            _ => None,
        })
        .collect()
}

fn read(path: &Path, rel: &str) -> Result<Vec<u8>, BuildError> {
    std::fs::read(path)
        .map_err(|e| BuildError::new(codes::BUILD_COPY_FAILED, e.to_string()).with_path(rel.to_string()))
}
