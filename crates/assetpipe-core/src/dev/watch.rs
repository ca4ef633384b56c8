//! Source watcher.
//!
//! A notify watcher (polling or native) runs on its own thread and forwards
//! batches of relevant paths into a tokio channel. Glob base directories are
//! watched recursively; the directory of any build input they miss is added
//! when the session reports its sources.

use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use regex_lite::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use assetpipe_util::fs::to_slash;

use crate::config::WatchConfig;
use crate::error::Error;

/// Decides which changed paths trigger a rebuild.
#[derive(Debug)]
pub struct WatchFilter {
    root: PathBuf,
    globs: Vec<glob::Pattern>,
    ignored: Regex,
    out_dir: Option<String>,
    /// Source files of the last successful build.
    sources: RwLock<HashSet<PathBuf>>,
    watching: Mutex<Option<Watching>>,
}

impl WatchFilter {
    pub fn new(root: &Path, config: &WatchConfig, out_dir: Option<&str>) -> Result<Self, Error> {
        let globs = config
            .files
            .iter()
            .map(|g| {
                glob::Pattern::new(g)
                    .map_err(|e| Error::InvalidConfig(format!("watch glob `{g}`: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ignored = Regex::new(&config.ignored)
            .map_err(|e| Error::InvalidConfig(format!("watch.ignored `{}`: {e}", config.ignored)))?;

        Ok(Self {
            root: root.to_path_buf(),
            globs,
            ignored,
            out_dir: out_dir
                .map(|d| d.trim_matches('/').to_string())
                .filter(|d| !d.is_empty()),
            sources: RwLock::new(HashSet::new()),
            watching: Mutex::new(None),
        })
    }

    /// Replace the set of build inputs that are always watched, registering
    /// their directories with a running watcher where needed.
    pub fn set_sources(&self, sources: &[PathBuf]) {
        *self.sources.write() = sources.iter().cloned().collect();
        if let Some(watching) = self.watching.lock().as_mut() {
            for source in sources.iter().filter(|s| self.matches(s)) {
                watching.cover(source);
            }
        }
    }

    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return self.sources.read().contains(path);
        };
        let rel = to_slash(rel);
        if self.ignored.is_match(&rel) {
            return false;
        }
        if let Some(out) = &self.out_dir {
            if rel == *out || rel.starts_with(&format!("{out}/")) {
                return false;
            }
        }
        self.globs.iter().any(|g| g.matches(&rel)) || self.sources.read().contains(path)
    }

    /// Directories to register with the watcher: the literal prefix of each
    /// glob that exists, else the root.
    #[must_use]
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for glob in &self.globs {
            let base = glob_base(glob.as_str());
            let dir = self.root.join(base);
            if dir.is_dir() && !dirs.iter().any(|d| dir.starts_with(d)) {
                dirs.retain(|d| !d.starts_with(&dir));
                dirs.push(dir);
            }
        }
        if dirs.is_empty() {
            dirs.push(self.root.clone());
        }
        dirs
    }
}

/// Leading path components of a glob that contain no wildcard.
fn glob_base(pattern: &str) -> &str {
    let mut end = 0;
    for (i, part) in pattern.split('/').enumerate() {
        if part.contains(['*', '?', '[', '{']) {
            break;
        }
        end = if i == 0 { part.len() } else { end + 1 + part.len() };
    }
    // A glob with no wildcard names a file; watch its directory
    let base = &pattern[..end];
    if end == pattern.len() {
        return base.rfind('/').map_or("", |i| &base[..i]);
    }
    base
}

/// Keeps the watcher alive. Dropping it stops the watch thread.
pub struct WatchHandle {
    dirs: Vec<PathBuf>,
    polling: bool,
    filter: Arc<WatchFilter>,
}

impl WatchHandle {
    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.polling
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        // Dropping the backend disconnects the event channel
        self.filter.watching.lock().take();
    }
}

enum Backend {
    Poll(PollWatcher),
    Native(RecommendedWatcher),
}

impl Backend {
    fn watch(&mut self, dir: &Path, mode: RecursiveMode) -> notify::Result<()> {
        match self {
            Self::Poll(w) => w.watch(dir, mode),
            Self::Native(w) => w.watch(dir, mode),
        }
    }
}

/// A registered backend and the directories it covers.
struct Watching {
    backend: Backend,
    recursive: Vec<PathBuf>,
    single: HashSet<PathBuf>,
}

impl std::fmt::Debug for Watching {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watching")
            .field("recursive", &self.recursive)
            .field("single", &self.single)
            .finish_non_exhaustive()
    }
}

impl Watching {
    /// Watch the directory of `source` unless it is already covered.
    fn cover(&mut self, source: &Path) {
        let Some(dir) = source.parent() else {
            return;
        };
        if self.recursive.iter().any(|d| source.starts_with(d)) || self.single.contains(dir) {
            return;
        }
        match self.backend.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                tracing::debug!(dir = %dir.display(), "watching source dir");
                self.single.insert(dir.to_path_buf());
            }
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "cannot watch source dir"),
        }
    }
}

/// Start watching. Batches of changed paths arrive on `tx`, at most one
/// batch per `debounce_ms`.
pub fn spawn_watcher(
    config: &WatchConfig,
    filter: Arc<WatchFilter>,
    tx: mpsc::Sender<Vec<PathBuf>>,
) -> Result<WatchHandle, Error> {
    let (events_tx, events_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();

    let mut backend = match config.poll_ms {
        Some(ms) => Backend::Poll(PollWatcher::new(
            events_tx,
            Config::default().with_poll_interval(Duration::from_millis(ms)),
        )?),
        None => Backend::Native(RecommendedWatcher::new(events_tx, Config::default())?),
    };

    let dirs = filter.watch_dirs();
    for dir in &dirs {
        backend.watch(dir, RecursiveMode::Recursive)?;
        tracing::info!(dir = %dir.display(), poll_ms = ?config.poll_ms, "watching");
    }

    let mut watching = Watching {
        backend,
        recursive: dirs.clone(),
        single: HashSet::new(),
    };
    let known: Vec<PathBuf> = filter.sources.read().iter().cloned().collect();
    for source in known.iter().filter(|s| filter.matches(s)) {
        watching.cover(source);
    }
    *filter.watching.lock() = Some(watching);

    let debounce = Duration::from_millis(config.debounce_ms);
    let polling = config.poll_ms.is_some();
    let thread_filter = Arc::clone(&filter);
    std::thread::Builder::new()
        .name("assetpipe-watch".to_string())
        .spawn(move || forward_events(&events_rx, &thread_filter, &tx, debounce))?;

    Ok(WatchHandle {
        dirs,
        polling,
        filter,
    })
}

fn forward_events(
    rx: &std::sync::mpsc::Receiver<notify::Result<Event>>,
    filter: &WatchFilter,
    tx: &mpsc::Sender<Vec<PathBuf>>,
    debounce: Duration,
) {
    let mut pending: Vec<PathBuf> = Vec::new();
    loop {
        let next = if pending.is_empty() {
            rx.recv().map_err(|_| std::sync::mpsc::RecvTimeoutError::Disconnected)
        } else {
            rx.recv_timeout(debounce)
        };

        match next {
            Ok(Ok(event)) => {
                if !is_change(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if filter.matches(&path) && !pending.contains(&path) {
                        tracing::trace!(path = %path.display(), "changed");
                        pending.push(path);
                    }
                }
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "watch error"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                pending.sort();
                if tx.blocking_send(std::mem::take(&mut pending)).is_err() {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("watcher stopped");
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn filter(root: &Path) -> WatchFilter {
        WatchFilter::new(root, &WatchConfig::default(), Some("public")).unwrap()
    }

    #[test]
    fn test_filter_globs_and_ignored() {
        let dir = tempdir().unwrap();
        let f = filter(dir.path());
        assert!(f.matches(&dir.path().join("src/app.ts")));
        assert!(f.matches(&dir.path().join("src/styles/main.scss")));
        assert!(!f.matches(&dir.path().join("README.md")));
        assert!(!f.matches(&dir.path().join("src/node_modules/x/index.js")));
        assert!(!f.matches(Path::new("/elsewhere/src/app.ts")));
    }

    #[test]
    fn test_filter_excludes_output_dir() {
        let dir = tempdir().unwrap();
        let config = WatchConfig {
            files: vec!["**/*".to_string()],
            ..WatchConfig::default()
        };
        let f = WatchFilter::new(dir.path(), &config, Some("public")).unwrap();
        assert!(f.matches(&dir.path().join("src/app.ts")));
        assert!(!f.matches(&dir.path().join("public/js/main.js")));
    }

    #[test]
    fn test_filter_sources_always_watched() {
        let dir = tempdir().unwrap();
        let f = filter(dir.path());
        let extra = dir.path().join("shared/theme.ts");
        assert!(!f.matches(&extra));
        f.set_sources(&[extra.clone()]);
        assert!(f.matches(&extra));
    }

    #[test]
    fn test_glob_base() {
        assert_eq!(glob_base("src/**/*"), "src");
        assert_eq!(glob_base("**/*.ts"), "");
        assert_eq!(glob_base("src/styles/*.scss"), "src/styles");
        assert_eq!(glob_base("src/index.html"), "src");
    }

    #[test]
    fn test_watch_dirs_fall_back_to_root() {
        let dir = tempdir().unwrap();
        let f = filter(dir.path());
        assert_eq!(f.watch_dirs(), vec![dir.path().to_path_buf()]);

        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        assert_eq!(f.watch_dirs(), vec![dir.path().join("src")]);
    }

    #[tokio::test]
    async fn test_polling_watcher_reports_change() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/app.ts"), "export {};").unwrap();

        let config = WatchConfig {
            poll_ms: Some(50),
            debounce_ms: 20,
            ..WatchConfig::default()
        };
        let filter = Arc::new(WatchFilter::new(&root, &config, Some("public")).unwrap());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn_watcher(&config, filter, tx).unwrap();
        assert!(handle.is_polling());

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(root.join("src/app.ts"), "export const changed = true;").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(batch.contains(&root.join("src/app.ts")));
    }

    #[tokio::test]
    async fn test_source_outside_globs_reports_change() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("shared")).unwrap();
        std::fs::write(root.join("src/app.ts"), "import \"../shared/theme\";").unwrap();
        std::fs::write(root.join("shared/theme.ts"), "export const dark = false;").unwrap();

        let config = WatchConfig {
            poll_ms: Some(50),
            debounce_ms: 20,
            ..WatchConfig::default()
        };
        let filter = Arc::new(WatchFilter::new(&root, &config, Some("public")).unwrap());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn_watcher(&config, Arc::clone(&filter), tx).unwrap();
        assert_eq!(handle.dirs(), [root.join("src")]);

        filter.set_sources(&[root.join("src/app.ts"), root.join("shared/theme.ts")]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(root.join("shared/theme.ts"), "export const dark = true;").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(batch.contains(&root.join("shared/theme.ts")));
    }

    #[test]
    fn test_filter_sources_outside_root() {
        let dir = tempdir().unwrap();
        let f = filter(&dir.path().join("app"));
        let linked = dir.path().join("lib/index.ts");
        assert!(!f.matches(&linked));
        f.set_sources(&[linked.clone()]);
        assert!(f.matches(&linked));
    }
}
