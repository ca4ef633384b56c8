//! Splitting the module graph into bundles.
//!
//! Roots are the entries (declaration order) followed by dynamic import
//! targets (discovery order). Every non-vendor module is owned by the exact
//! set of roots that statically reach it: one root means that root's bundle,
//! several mean the shared bundle of that set (`main~admin`). Vendor modules
//! all go to `vendors`. A module is therefore emitted exactly once.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::graph::{ModuleGraph, ModuleId};

/// Name of the cache-group bundle for `node_modules` code.
pub const VENDORS: &str = "vendors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BundleKind {
    Entry,
    Shared,
    Vendors,
    Async,
}

impl BundleKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Shared => "shared",
            Self::Vendors => "vendors",
            Self::Async => "async",
        }
    }

    /// Entry bundles use the main filename templates, the rest the chunk ones.
    #[must_use]
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::Entry)
    }
}

/// Index into [`ChunkGraph::bundles`].
pub type BundleId = usize;

/// A group of modules emitted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub name: String,
    pub kind: BundleKind,
    /// Modules in depth-first discovery order.
    pub modules: Vec<ModuleId>,
}

/// An entry or dynamic-import target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    pub name: String,
    pub module: ModuleId,
    pub is_entry: bool,
    /// Bundles that must be loaded before `module` can run, in load order:
    /// vendors, shared bundles, then the root's own bundle.
    pub bundles: Vec<BundleId>,
}

/// Result of splitting.
#[derive(Debug, Clone, Default)]
pub struct ChunkGraph {
    bundles: Vec<Bundle>,
    roots: Vec<Root>,
    module_to_bundle: HashMap<ModuleId, BundleId>,
}

impl ChunkGraph {
    /// Split `graph`. With `split_vendors` off, vendor modules are treated
    /// like any other module.
    #[must_use]
    pub fn split(graph: &ModuleGraph, split_vendors: bool) -> Self {
        let roots = collect_roots(graph);
        let order = discovery_order(graph, &roots);

        // Root sets per module, from static reachability
        let mut reached_by: HashMap<&str, Vec<usize>> = HashMap::new();
        for (root_index, (_, module, _)) in roots.iter().enumerate() {
            for id in static_closure(graph, module) {
                reached_by.entry(id).or_default().push(root_index);
            }
        }

        // Group modules by owner, keyed for deterministic bundle order
        #[derive(PartialEq, Eq, PartialOrd, Ord)]
        enum Owner {
            Root(usize),
            Shared(Vec<usize>),
            Vendors,
        }

        let mut groups: BTreeMap<Owner, Vec<&str>> = BTreeMap::new();
        for id in &order {
            let Some(module) = graph.get(id) else { continue };
            let owner = if split_vendors && module.is_vendor() {
                Owner::Vendors
            } else {
                match reached_by.get(id.as_str()).map(Vec::as_slice) {
                    Some([single]) => Owner::Root(*single),
                    Some(many) if !many.is_empty() => Owner::Shared(many.to_vec()),
                    _ => continue,
                }
            };
            groups.entry(owner).or_default().push(id.as_str());
        }

        let mut chunk_graph = ChunkGraph::default();
        let entry_count = roots.iter().filter(|(_, _, is_entry)| *is_entry).count();

        // Entries always get a bundle, even an empty one, since it boots the page
        let mut root_bundle: HashMap<usize, BundleId> = HashMap::new();
        for (index, (name, _, _)) in roots.iter().enumerate().take(entry_count) {
            let modules = groups.remove(&Owner::Root(index)).unwrap_or_default();
            root_bundle.insert(index, chunk_graph.push(name, BundleKind::Entry, &modules));
        }

        let shared: Vec<(Vec<usize>, Vec<&str>)> = groups
            .iter()
            .filter_map(|(owner, modules)| match owner {
                Owner::Shared(set) => Some((set.clone(), modules.clone())),
                _ => None,
            })
            .collect();
        let mut shared_bundles: Vec<(Vec<usize>, BundleId)> = Vec::new();
        for (set, modules) in shared {
            let name = set
                .iter()
                .map(|&i| roots[i].0.as_str())
                .collect::<Vec<_>>()
                .join("~");
            shared_bundles.push((set, chunk_graph.push(&name, BundleKind::Shared, &modules)));
        }

        let vendors = groups
            .remove(&Owner::Vendors)
            .map(|modules| chunk_graph.push(VENDORS, BundleKind::Vendors, &modules));

        for (index, (name, _, _)) in roots.iter().enumerate().skip(entry_count) {
            if let Some(modules) = groups.remove(&Owner::Root(index)) {
                root_bundle.insert(index, chunk_graph.push(name, BundleKind::Async, &modules));
            }
        }

        // What each root needs loaded
        for (index, (name, module, is_entry)) in roots.iter().enumerate() {
            let closure = static_closure(graph, module);
            let mut bundles = Vec::new();
            if let Some(vendors) = vendors {
                if closure
                    .iter()
                    .any(|id| chunk_graph.module_to_bundle.get(*id) == Some(&vendors))
                {
                    bundles.push(vendors);
                }
            }
            for (set, bundle) in &shared_bundles {
                if set.contains(&index) {
                    bundles.push(*bundle);
                }
            }
            if let Some(own) = root_bundle.get(&index) {
                bundles.push(*own);
            }
            chunk_graph.roots.push(Root {
                name: name.clone(),
                module: module.clone(),
                is_entry: *is_entry,
                bundles,
            });
        }

        chunk_graph
    }

    fn push(&mut self, name: &str, kind: BundleKind, modules: &[&str]) -> BundleId {
        let id = self.bundles.len();
        for module in modules {
            self.module_to_bundle.insert((*module).to_string(), id);
        }
        self.bundles.push(Bundle {
            name: name.to_string(),
            kind,
            modules: modules.iter().map(|m| (*m).to_string()).collect(),
        });
        id
    }

    /// Bundles in emission order: entries, shared, vendors, async.
    #[must_use]
    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    #[must_use]
    pub fn bundle(&self, id: BundleId) -> &Bundle {
        &self.bundles[id]
    }

    #[must_use]
    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    /// Entry roots in declaration order.
    pub fn entry_roots(&self) -> impl Iterator<Item = &Root> {
        self.roots.iter().filter(|r| r.is_entry)
    }

    /// Dynamic-import roots in discovery order.
    pub fn async_roots(&self) -> impl Iterator<Item = &Root> {
        self.roots.iter().filter(|r| !r.is_entry)
    }

    #[must_use]
    pub fn bundle_of(&self, module: &str) -> Option<BundleId> {
        self.module_to_bundle.get(module).copied()
    }
}

/// Entries first, then dynamic targets in depth-first discovery order.
///
/// A dynamic target that is itself an entry module stays an entry root.
fn collect_roots(graph: &ModuleGraph) -> Vec<(String, ModuleId, bool)> {
    let mut roots: Vec<(String, ModuleId, bool)> = Vec::new();
    let mut root_modules: HashSet<ModuleId> = HashSet::new();
    let mut names: HashSet<String> = HashSet::new();

    for (name, module) in graph.entries() {
        names.insert(name.clone());
        if root_modules.insert(module.clone()) {
            roots.push((name.clone(), module.clone(), true));
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = graph.entries().iter().rev().map(|(_, m)| m.as_str()).collect();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(module) = graph.get(id) else { continue };

        for target in module.dynamic_targets() {
            if root_modules.insert(target.clone()) {
                let name = unique_name(&chunk_name(target), &mut names);
                roots.push((name, target.clone(), false));
            }
        }

        let next: Vec<&str> = module
            .static_targets()
            .chain(module.dynamic_targets())
            .map(String::as_str)
            .collect();
        stack.extend(next.into_iter().rev());
    }

    roots
}

/// Pre-order DFS over every edge, roots in order.
fn discovery_order(graph: &ModuleGraph, roots: &[(String, ModuleId, bool)]) -> Vec<ModuleId> {
    let mut order = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = roots.iter().rev().map(|(_, m, _)| m.as_str()).collect();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(module) = graph.get(id) else { continue };
        order.push(id.to_string());

        let next: Vec<&str> = module
            .static_targets()
            .chain(module.dynamic_targets())
            .map(String::as_str)
            .collect();
        stack.extend(next.into_iter().rev());
    }
    order
}

/// Modules statically reachable from `start`, `start` included.
fn static_closure<'g>(graph: &'g ModuleGraph, start: &str) -> Vec<&'g str> {
    let mut seen: Vec<&'g str> = Vec::new();
    let mut visited: HashSet<&'g str> = HashSet::new();
    let Some(first) = graph.get(start) else {
        return seen;
    };
    let mut stack: Vec<&'g str> = vec![first.id.as_str()];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        seen.push(id);
        if let Some(module) = graph.get(id) {
            stack.extend(module.static_targets().map(String::as_str));
        }
    }
    seen
}

/// `./src/pages/admin.ts` → `admin`; index files take their directory name.
fn chunk_name(module: &str) -> String {
    let file = module.rsplit('/').next().unwrap_or(module);
    let stem = file.split('.').next().unwrap_or(file);
    let stem = if stem == "index" {
        module.rsplit('/').nth(1).unwrap_or(stem)
    } else {
        stem
    };
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "chunk".to_string()
    } else {
        cleaned
    }
}

fn unique_name(base: &str, names: &mut HashSet<String>) -> String {
    let mut name = base.to_string();
    let mut n = 2;
    while names.contains(&name) || name == VENDORS {
        name = format!("{base}-{n}");
        n += 1;
    }
    names.insert(name.clone());
    name
}
