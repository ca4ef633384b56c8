//! `assetpipe dev` command implementation.
//!
//! Builds once, then serves the current artifact set from memory while the
//! watcher feeds changes into the session's rebuild loop. Connected browsers
//! get build events over a WebSocket and reload when the set changes.
//!
//! ```text
//! notify thread ──batches──▶ DevSession::run ──rebuild──▶ artifact set
//!                                   │                         │
//!                                   └──broadcast──▶ /__assetpipe/ws
//!                                                   GET /* ◀──┘
//! ```

use assetpipe_core::dev::client::{client_script, inject_client, CLIENT_PATH, SOCKET_PATH, STATUS_PATH};
use assetpipe_core::dev::{spawn_watcher, DevSession, WatchFilter};
use assetpipe_core::{Builder, PipelineConfig};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tower_http::{compression::CompressionLayer, cors::CorsLayer};

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    /// Project directory.
    pub cwd: PathBuf,
    /// Explicit config file.
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    /// `Some(None)` switches to native events, `Some(Some(ms))` sets the
    /// poll interval.
    pub poll: Option<Option<u64>>,
    pub no_minify: bool,
}

/// Shared server state.
struct DevServer {
    session: Arc<DevSession>,
    out_dir: PathBuf,
    /// Public path without surrounding slashes.
    public_prefix: String,
    index: String,
    hot: bool,
    overlay_errors: bool,
    overlay_warnings: bool,
}

type AppState = Arc<DevServer>;

/// Run the dev server until ctrl+c.
pub async fn run(action: DevAction) -> Result<()> {
    let config = configure(&action).into_diagnostic()?;
    let dev = config.dev.clone();
    let out_dir_name = config.output.dir.clone();
    let public_prefix = config.output.public_path.trim_matches('/').to_string();
    let index = config
        .html
        .as_ref()
        .map_or_else(|| "index.html".to_string(), |h| h.filename.clone());

    let builder = Builder::new(config).into_diagnostic()?;
    let out_dir = builder.out_dir();
    let filter = Arc::new(WatchFilter::new(builder.root(), &dev.watch, Some(&out_dir_name)).into_diagnostic()?);
    let session = Arc::new(DevSession::new(builder).with_watch_filter(Arc::clone(&filter)));

    // Initial build; a failure is shown in the overlay and retried on change
    let initial = Arc::clone(&session);
    match tokio::task::spawn_blocking(move || initial.rebuild())
        .await
        .into_diagnostic()?
    {
        Ok(outcome) => tracing::info!(
            modules = outcome.modules,
            duration = ?outcome.duration,
            "initial build"
        ),
        Err(e) => tracing::warn!(code = e.code, "initial build failed: {}", e.message),
    }

    let (tx, rx) = mpsc::channel::<Vec<PathBuf>>(16);
    let watcher = spawn_watcher(&dev.watch, filter, tx).into_diagnostic()?;
    tokio::spawn(Arc::clone(&session).run(rx));

    let state = Arc::new(DevServer {
        session,
        out_dir,
        public_prefix,
        index,
        hot: dev.hot,
        overlay_errors: dev.overlay.errors,
        overlay_warnings: dev.overlay.warnings,
    });

    let app = Router::new()
        .route(CLIENT_PATH, get(serve_client))
        .route(SOCKET_PATH, get(events_websocket))
        .route(STATUS_PATH, get(serve_status))
        .route("/", get(serve_root))
        .route("/*path", get(serve_path))
        .layer(CorsLayer::permissive())
        .with_state(state);
    let app = if dev.compress {
        app.layer(CompressionLayer::new())
    } else {
        app
    };

    let host_ip = if dev.host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        dev.host.clone()
    };
    let addr: SocketAddr = format!("{host_ip}:{}", dev.port).parse().into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;

    println!();
    println!("  Dev server running at http://{}:{}", dev.host, dev.port);
    if watcher.is_polling() {
        println!(
            "  Watching {} dir(s), polling every {}ms",
            watcher.dirs().len(),
            dev.watch.poll_ms.unwrap_or_default()
        );
    } else {
        println!("  Watching {} dir(s)", watcher.dirs().len());
    }
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .into_diagnostic()?;

    drop(watcher);
    Ok(())
}

fn configure(action: &DevAction) -> Result<PipelineConfig, assetpipe_core::Error> {
    let mut config = PipelineConfig::load(&action.cwd, action.config.as_deref())?;
    if let Some(port) = action.port {
        config = config.with_port(port);
    }
    if let Some(host) = &action.host {
        config = config.with_host(host.clone());
    }
    if let Some(poll) = action.poll {
        config = config.with_poll_ms(poll);
    }
    if action.no_minify {
        config = config.with_minify(false);
    }
    Ok(config)
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn serve_client(State(state): State<AppState>) -> Response {
    let script = client_script(state.overlay_errors, state.overlay_warnings);
    no_cache(StatusCode::OK, "application/javascript; charset=utf-8", script.into_bytes())
}

async fn serve_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.status())
}

async fn serve_root(State(state): State<AppState>) -> Response {
    let index = state.index.clone();
    serve_file(&state, &index).await
}

async fn serve_path(State(state): State<AppState>, AxumPath(path): AxumPath<String>) -> Response {
    let Some(rel) = artifact_path(&state.public_prefix, &path, &state.index) else {
        return not_found(&path);
    };
    serve_file(&state, &rel).await
}

/// Map a request path to a path inside the output directory.
fn artifact_path(public_prefix: &str, request: &str, index: &str) -> Option<String> {
    let request = request.trim_start_matches('/');
    let rel = if public_prefix.is_empty() {
        request
    } else {
        let rest = request.strip_prefix(public_prefix)?;
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        rest.trim_start_matches('/')
    };
    if Path::new(rel)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    if rel.is_empty() || rel.ends_with('/') {
        Some(format!("{rel}{index}"))
    } else {
        Some(rel.to_string())
    }
}

async fn serve_file(state: &DevServer, rel: &str) -> Response {
    let artifacts = state.session.artifacts();
    let bytes = match artifacts.get(rel) {
        Some(artifact) => artifact.bytes.as_ref().clone(),
        // Files outside the set, e.g. ones kept from earlier builds
        None => match tokio::fs::read(state.out_dir.join(rel)).await {
            Ok(bytes) => bytes,
            Err(_) => return not_found(rel),
        },
    };

    let content_type = content_type(rel);
    if state.hot && content_type.starts_with("text/html") {
        let html = inject_client(&String::from_utf8_lossy(&bytes));
        return no_cache(StatusCode::OK, content_type, html.into_bytes());
    }
    no_cache(StatusCode::OK, content_type, bytes)
}

fn no_cache(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

fn not_found(path: &str) -> Response {
    tracing::debug!(path, "not found");
    (StatusCode::NOT_FOUND, format!("Not found: {path}")).into_response()
}

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map_or("", |(_, ext)| ext);
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ogg" => "video/ogg",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// WebSocket events
// ============================================================================

async fn events_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.session.subscribe();

    if socket
        .send(Message::Text(state.session.greeting().to_json()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if socket.send(Message::Text(event.to_json())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "client lagged");
                }
                Err(RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path() {
        assert_eq!(artifact_path("", "js/main.js", "index.html").as_deref(), Some("js/main.js"));
        assert_eq!(artifact_path("", "docs/", "index.html").as_deref(), Some("docs/index.html"));
        assert_eq!(
            artifact_path("static", "static/css/a.css", "index.html").as_deref(),
            Some("css/a.css")
        );
        assert_eq!(artifact_path("static", "other/a.css", "index.html"), None);
        assert_eq!(artifact_path("static", "statics/a.css", "index.html"), None);
        assert_eq!(artifact_path("", "../secret", "index.html"), None);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("js/main.abc.js"), "application/javascript; charset=utf-8");
        assert_eq!(content_type("assets/fonts/a.WOFF2"), "font/woff2");
        assert_eq!(content_type("assets/fonts/legacy.eot"), "application/vnd.ms-fontobject");
        assert_eq!(content_type("media/intro.mov"), "video/quicktime");
        assert_eq!(content_type("media/intro.ogg"), "video/ogg");
        assert_eq!(content_type("LICENSE"), "application/octet-stream");
    }

    #[test]
    fn test_configure_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let action = DevAction {
            cwd: dir.path().to_path_buf(),
            config: None,
            port: Some(4321),
            host: Some("127.0.0.1".into()),
            poll: Some(None),
            no_minify: true,
        };
        let config = configure(&action).unwrap();
        assert_eq!(config.dev.port, 4321);
        assert_eq!(config.dev.host, "127.0.0.1");
        assert_eq!(config.dev.watch.poll_ms, None);
        assert!(!config.optimization.minify);
    }
}
