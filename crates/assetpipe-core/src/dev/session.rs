//! Dev session: the current artifact set and the rebuild loop.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use super::watch::WatchFilter;
use crate::bundler::{ArtifactSet, BuildError, Builder};

/// Capacity of the client event channel; slow clients skip old events.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevPhase {
    Idle,
    Building,
    Serving,
}

/// A build failure as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&BuildError> for ErrorPayload {
    fn from(err: &BuildError) -> Self {
        Self {
            code: err.code.to_string(),
            message: err.message.clone(),
            path: err.path.clone(),
        }
    }
}

/// Messages pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DevEvent {
    Connected { build: u64 },
    Building,
    /// Rebuilt, nothing changed.
    Ok { build: u64 },
    Reload { build: u64, changed: Vec<String> },
    Error(ErrorPayload),
}

impl DevEvent {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string())
    }
}

/// Snapshot for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DevStatus {
    pub phase: DevPhase,
    pub builds: u64,
    pub artifacts: usize,
    pub sources: usize,
    pub last_error: Option<ErrorPayload>,
}

/// What one successful rebuild did.
#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    pub build: u64,
    pub changed: Vec<String>,
    pub modules: usize,
    pub cache_hits: usize,
    pub duration: Duration,
}

#[derive(Debug)]
struct State {
    phase: DevPhase,
    builds: u64,
    last_error: Option<ErrorPayload>,
}

/// Process-wide dev state shared by the server and the rebuild loop.
pub struct DevSession {
    builder: Builder,
    write_to_disk: bool,
    state: RwLock<State>,
    artifacts: RwLock<Arc<ArtifactSet>>,
    events: broadcast::Sender<DevEvent>,
    filter: Option<Arc<WatchFilter>>,
    /// Held for the duration of a build.
    building: Mutex<()>,
}

impl DevSession {
    #[must_use]
    pub fn new(builder: Builder) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            builder,
            write_to_disk: true,
            state: RwLock::new(State {
                phase: DevPhase::Idle,
                builds: 0,
                last_error: None,
            }),
            artifacts: RwLock::new(Arc::new(ArtifactSet::new())),
            events,
            filter: None,
            building: Mutex::new(()),
        }
    }

    /// Keep artifacts in memory only.
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.write_to_disk = false;
        self
    }

    /// Refresh this filter's source list after every successful build.
    #[must_use]
    pub fn with_watch_filter(mut self, filter: Arc<WatchFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    /// The set currently served.
    #[must_use]
    pub fn artifacts(&self) -> Arc<ArtifactSet> {
        Arc::clone(&*self.artifacts.read())
    }

    #[must_use]
    pub fn phase(&self) -> DevPhase {
        self.state.read().phase
    }

    #[must_use]
    pub fn status(&self) -> DevStatus {
        let artifacts = self.artifacts();
        let state = self.state.read();
        DevStatus {
            phase: state.phase,
            builds: state.builds,
            artifacts: artifacts.len(),
            sources: artifacts.sources().len(),
            last_error: state.last_error.clone(),
        }
    }

    /// Source files of the current set.
    #[must_use]
    pub fn watch_list(&self) -> Vec<PathBuf> {
        self.artifacts().sources().to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DevEvent> {
        self.events.subscribe()
    }

    /// Event sent to a client right after it connects.
    #[must_use]
    pub fn greeting(&self) -> DevEvent {
        let state = self.state.read();
        match &state.last_error {
            Some(err) => DevEvent::Error(err.clone()),
            None => DevEvent::Connected { build: state.builds },
        }
    }

    fn broadcast(&self, event: DevEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: DevPhase) {
        self.state.write().phase = phase;
    }

    /// Build, publish and swap in the new set. Blocking.
    ///
    /// On failure the previous set stays active and the error is recorded
    /// and broadcast.
    pub fn rebuild(&self) -> Result<RebuildOutcome, BuildError> {
        let _building = self.building.lock();
        self.set_phase(DevPhase::Building);
        self.broadcast(DevEvent::Building);

        let result = self.builder.build().and_then(|output| {
            if self.write_to_disk {
                self.builder.publish(&output.artifacts)?;
            }
            Ok(output)
        });

        match result {
            Ok(output) => {
                let set = Arc::new(output.artifacts);
                let previous = std::mem::replace(&mut *self.artifacts.write(), Arc::clone(&set));
                let changed = set.changed_since(&previous);
                if let Some(filter) = &self.filter {
                    filter.set_sources(set.sources());
                }

                let build = {
                    let mut state = self.state.write();
                    state.builds += 1;
                    state.last_error = None;
                    state.phase = DevPhase::Serving;
                    state.builds
                };

                tracing::info!(build, changed = changed.len(), "serving");
                if changed.is_empty() {
                    self.broadcast(DevEvent::Ok { build });
                } else {
                    self.broadcast(DevEvent::Reload {
                        build,
                        changed: changed.clone(),
                    });
                }

                Ok(RebuildOutcome {
                    build,
                    changed,
                    modules: output.modules,
                    cache_hits: output.cache_hits,
                    duration: output.duration,
                })
            }
            Err(err) => {
                tracing::error!(code = err.code, path = ?err.path, "{}", err.message);
                let payload = ErrorPayload::from(&err);
                {
                    let mut state = self.state.write();
                    state.last_error = Some(payload.clone());
                    state.phase = DevPhase::Serving;
                }
                self.broadcast(DevEvent::Error(payload));
                Err(err)
            }
        }
    }

    /// Rebuild on every batch of changes until `rx` closes.
    ///
    /// Batches that arrive while a build runs are merged into one follow-up
    /// build.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Vec<PathBuf>>) {
        while let Some(mut changed) = rx.recv().await {
            let mut batches = 1usize;
            while let Ok(more) = rx.try_recv() {
                changed.extend(more);
                batches += 1;
            }
            changed.sort();
            changed.dedup();
            tracing::info!(files = changed.len(), batches, "change detected");
            for path in &changed {
                tracing::debug!(path = %path.display(), "changed");
            }

            let session = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || session.rebuild()).await {
                tracing::error!(error = %e, "rebuild task failed");
            }
        }
        tracing::debug!("rebuild loop stopped");
    }
}

impl std::fmt::Debug for DevSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevSession")
            .field("builder", &self.builder)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompilerError, ScriptCompiler, SwcCompiler};
    use crate::config::PipelineConfig;
    use std::path::Path;
    use std::sync::mpsc as std_mpsc;
    use tempfile::tempdir;

    /// Holds the first transpile until released.
    struct GatedCompiler {
        inner: SwcCompiler,
        entered: Mutex<Option<std_mpsc::Sender<()>>>,
        release: Mutex<Option<std_mpsc::Receiver<()>>>,
    }

    impl ScriptCompiler for GatedCompiler {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn transpile(&self, path: &Path, source: &str) -> Result<String, CompilerError> {
            let entered = self.entered.lock().take();
            if let Some(entered) = entered {
                let _ = entered.send(());
                let release = self.release.lock().take();
                if let Some(release) = release {
                    let _ = release.recv();
                }
            }
            self.inner.transpile(path, source)
        }

        fn normalize(&self, path: &Path, source: &str) -> Result<String, CompilerError> {
            self.inner.normalize(path, source)
        }

        fn minify(&self, name: &str, code: &str) -> Result<String, CompilerError> {
            self.inner.minify(name, code)
        }
    }

    fn project(root: &Path) -> Builder {
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/app.ts"), "export const answer: number = 42;\n").unwrap();
        let config = PipelineConfig::new(root.to_path_buf())
            .with_minify(false)
            .with_max_parallel(2);
        Builder::new(config).unwrap()
    }

    #[test]
    fn test_event_json() {
        assert_eq!(DevEvent::Building.to_json(), r#"{"type":"building"}"#);
        assert_eq!(DevEvent::Ok { build: 2 }.to_json(), r#"{"type":"ok","build":2}"#);
        let err = DevEvent::Error(ErrorPayload {
            code: "BUILD_SCRIPT_FAILED".into(),
            message: "bad".into(),
            path: None,
        });
        assert_eq!(err.to_json(), r#"{"type":"error","code":"BUILD_SCRIPT_FAILED","message":"bad"}"#);
    }

    #[test]
    fn test_rebuild_moves_to_serving() {
        let dir = tempdir().unwrap();
        let session = DevSession::new(project(dir.path())).in_memory();
        assert_eq!(session.phase(), DevPhase::Idle);

        let outcome = session.rebuild().unwrap();
        assert_eq!(outcome.build, 1);
        assert!(!outcome.changed.is_empty());
        assert_eq!(session.phase(), DevPhase::Serving);
        assert_eq!(session.watch_list().len(), 1);
        assert!(!dir.path().join("public").exists());

        let again = session.rebuild().unwrap();
        assert!(again.changed.is_empty());
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_set() {
        let dir = tempdir().unwrap();
        let session = DevSession::new(project(dir.path())).in_memory();
        session.rebuild().unwrap();
        let before = session.artifacts();
        let mut events = session.subscribe();

        std::fs::write(dir.path().join("src/app.ts"), "export const = ;\n").unwrap();
        let err = session.rebuild().unwrap_err();
        assert_eq!(err.code, crate::bundler::codes::BUILD_SCRIPT_FAILED);

        assert!(Arc::ptr_eq(&before, &session.artifacts()));
        let status = session.status();
        assert_eq!(status.builds, 1);
        assert_eq!(status.phase, DevPhase::Serving);
        assert_eq!(status.last_error.unwrap().code, "BUILD_SCRIPT_FAILED");

        assert_eq!(events.try_recv().unwrap(), DevEvent::Building);
        assert!(matches!(events.try_recv().unwrap(), DevEvent::Error(_)));
        assert!(matches!(session.greeting(), DevEvent::Error(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pending_batches_coalesce_into_one_build() {
        let dir = tempdir().unwrap();
        let session = Arc::new(DevSession::new(project(dir.path())).in_memory());

        let (tx, rx) = mpsc::channel(16);
        for i in 0..5 {
            tx.send(vec![dir.path().join(format!("src/{i}.ts"))]).await.unwrap();
        }
        drop(tx);

        Arc::clone(&session).run(rx).await;
        assert_eq!(session.status().builds, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batches_during_build_coalesce_into_one_followup() {
        let dir = tempdir().unwrap();
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let compiler = Arc::new(GatedCompiler {
            inner: SwcCompiler::new(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let builder = project(dir.path()).with_compiler(compiler);
        let session = Arc::new(DevSession::new(builder).in_memory());

        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(Arc::clone(&session).run(rx));
        tx.send(vec![dir.path().join("src/app.ts")]).await.unwrap();

        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.phase(), DevPhase::Building);

        for i in 0..3 {
            tx.send(vec![dir.path().join(format!("src/{i}.ts"))]).await.unwrap();
        }
        drop(tx);
        release_tx.send(()).unwrap();

        run.await.unwrap();
        assert_eq!(session.status().builds, 2);
    }
}
