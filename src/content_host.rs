//! Static content host
//!
//! Serves the content root over HTTP on a free loopback port for the length
//! of a run, so pages load their assets the way they would on a real site.

use crate::WebsnapError;
use axum::body::{Body, Bytes};
use axum::extract::{Path as RoutePath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bind the first free loopback port at or above `starting_from`.
///
/// The listener is returned still bound so nothing else can take the port
/// before the server starts. `0` asks the OS for any free port.
pub fn reserve_free_port(starting_from: u16) -> Result<(u16, TcpListener), WebsnapError> {
    for port in starting_from..=u16::MAX {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                return Ok((port, listener));
            }
            Err(e) => debug!("Port {} unavailable: {}", port, e),
        }
    }

    Err(WebsnapError::PortUnavailable(starting_from))
}

pub struct ContentHost {
    port: u16,
    base_url: String,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
}

impl ContentHost {
    pub async fn start(root: impl Into<PathBuf>, base_port: u16) -> Result<Self, WebsnapError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(WebsnapError::ContentRoot(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let (port, listener) = reserve_free_port(base_port)?;
        listener
            .set_nonblocking(true)
            .map_err(|e| WebsnapError::ContentHost(e.to_string()))?;
        let listener = tokio::net::TcpListener::from_std(listener)
            .map_err(|e| WebsnapError::ContentHost(e.to_string()))?;

        let router = Router::new()
            .route("/", get(serve_root))
            .route("/{*path}", get(serve_path))
            .with_state(Arc::new(root));

        let (shutdown, shutdown_signal) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_signal.await;
                })
                .await
        });

        let base_url = format!("http://{}:{}", Ipv4Addr::LOCALHOST, port);
        info!("Started local server at {}", base_url);

        Ok(Self {
            port,
            base_url,
            shutdown,
            server,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting connections and wait for in-flight responses.
    pub async fn shutdown(self) -> Result<(), WebsnapError> {
        let _ = self.shutdown.send(());

        match self.server.await {
            Ok(Ok(())) => {
                debug!("Local server on port {} stopped", self.port);
                Ok(())
            }
            Ok(Err(e)) => Err(WebsnapError::ContentHost(e.to_string())),
            Err(e) => Err(WebsnapError::ContentHost(e.to_string())),
        }
    }
}

async fn serve_root(State(root): State<Arc<PathBuf>>) -> Response {
    serve_file(&root, "").await
}

async fn serve_path(State(root): State<Arc<PathBuf>>, RoutePath(path): RoutePath<String>) -> Response {
    serve_file(&root, &path).await
}

async fn serve_file(root: &Path, request_path: &str) -> Response {
    let Some(mut path) = resolve_request_path(root, request_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
        path.push("index.html");
    }

    match tokio::fs::read(&path).await {
        Ok(contents) => build_response(&path, Bytes::from(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Map a decoded request path onto the content root. `None` for paths that
/// try to leave it.
fn resolve_request_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();

    for segment in request_path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains(':') => return None,
            s => path.push(s),
        }
    }

    if request_path.is_empty() || request_path.ends_with('/') {
        path.push("index.html");
    }

    Some(path)
}

fn build_response(path: &Path, bytes: Bytes) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}
