//! HTTP endpoints for canopy-server.
//!
//! - `GET /` - JSON array of mount names
//! - `GET /{mount}/` - the mount's manifest, streamed as newline-delimited JSON
//! - `/{mount}/{path}` - the file endpoint, see [`files`]

pub mod files;
pub mod stream;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Path};
use axum::http::{header, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Extension, Json, Router};
use canopy_core::{BlockDelta, DeltaEngine};

use crate::config::{Config, ConfigError, MountTable};
use crate::error::{FileError, ServerError};
use crate::scan::{write_manifest, Scanner};

/// State shared by every request. Immutable after startup.
pub struct AppState {
    /// Configured mounts.
    pub mounts: MountTable,
    /// Engine behind the `rdiff` operations.
    pub engine: Arc<dyn DeltaEngine>,
    /// Forced flush period for manifest streams.
    pub flush_interval: Duration,
}

impl AppState {
    /// State from explicit parts.
    pub fn new(mounts: MountTable, engine: Arc<dyn DeltaEngine>, flush_interval: Duration) -> Self {
        Self {
            mounts,
            engine,
            flush_interval,
        }
    }

    /// Validate `config` and build the state it describes.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mounts = MountTable::from_config(&config.mounts)?;
        let engine = BlockDelta::with_block_size(config.delta.block_size)?;
        tracing::debug!("Delta block size {} bytes", engine.block_size());
        Ok(Self::new(
            mounts,
            Arc::new(engine),
            config.server.flush_interval(),
        ))
    }
}

/// Build the HTTP router with all endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/:mount", any(manifest_handler))
        .route("/:mount/", any(manifest_handler))
        .route("/:mount/*path", any(files::file_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(Extension(state))
}

/// Bind `addr` and serve `state` until `shutdown` completes.
pub async fn serve<F>(state: AppState, addr: &str, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    tracing::info!("Listening for web requests on {}", listener.local_addr()?);

    axum::serve(listener, build_router(Arc::new(state)))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// List mount names.
async fn index_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.mounts.names())
}

/// Stream the manifest of one mount.
async fn manifest_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
    method: Method,
) -> Result<Response, FileError> {
    let mount = state
        .mounts
        .get(&name)
        .ok_or_else(|| FileError::UnknownMount(name.clone()))?;
    if method != Method::GET {
        return Err(FileError::MethodNotAllowed(method.to_string()));
    }

    tracing::info!("Listing {}", mount.root.display());
    let scanner = Scanner::for_mount(mount);
    let interval = state.flush_interval;
    let body = stream::blocking_body(format!("listing of {}", mount.name), move |out| {
        let count = write_manifest(scanner.records(), out, interval)?;
        tracing::debug!("Listed {} entries", count);
        Ok(())
    });
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::MountConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use canopy_types::{Manifest, ManifestDecoder};
    use std::collections::BTreeMap;
    use tower::util::ServiceExt;

    /// Router over two mounts: `src` (read-only, hashed) and `dest` (writable).
    pub(crate) struct Fixture {
        pub dir: tempfile::TempDir,
        pub app: Router,
    }

    impl Fixture {
        pub fn src(&self) -> std::path::PathBuf {
            self.dir.path().join("src")
        }

        pub fn dest(&self) -> std::path::PathBuf {
            self.dir.path().join("dest")
        }
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/sub")).unwrap();
        std::fs::create_dir_all(dir.path().join("dest")).unwrap();
        std::fs::write(dir.path().join("src/a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("src/sub/b.txt"), b"bravo!").unwrap();

        let mut mounts = BTreeMap::new();
        mounts.insert(
            "src".to_string(),
            MountConfig {
                path: dir.path().join("src"),
                writable: false,
                checksum: true,
            },
        );
        mounts.insert(
            "dest".to_string(),
            MountConfig {
                path: dir.path().join("dest"),
                writable: true,
                checksum: false,
            },
        );
        let config = Config {
            mounts,
            ..Config::default()
        };
        let state = AppState::from_config(&config).unwrap();
        Fixture {
            dir,
            app: build_router(Arc::new(state)),
        }
    }

    pub(crate) async fn send(app: &Router, method: &str, uri: &str, body: Body) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub(crate) async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn index_lists_mounts_sorted() {
        let fx = fixture();
        let response = send(&fx.app, "GET", "/", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let names: Vec<String> = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(names, vec!["dest", "src"]);
    }

    #[tokio::test]
    async fn manifest_streams_records() {
        let fx = fixture();
        let response = send(&fx.app, "GET", "/src/", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );

        let bytes = body_bytes(response).await;
        let mut manifest = Manifest::new();
        let mut decoder = ManifestDecoder::new();
        decoder.feed(&bytes, &mut manifest).unwrap();
        decoder.finish().unwrap();

        assert_eq!(manifest.paths().collect::<Vec<_>>(), vec!["a.txt", "sub/b.txt"]);
        let a = manifest.get("a.txt").unwrap();
        assert_eq!(a.size, 5);
        assert_eq!(a.hash, canopy_core::content_hash(&b"alpha"[..]).unwrap());
    }

    #[tokio::test]
    async fn manifest_without_trailing_slash() {
        let fx = fixture();
        let response = send(&fx.app, "GET", "/dest", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_mount_is_not_found() {
        let fx = fixture();
        let response = send(&fx.app, "GET", "/nope/", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manifest_rejects_other_methods() {
        let fx = fixture();
        let response = send(&fx.app, "DELETE", "/dest/", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let state = AppState::new(
            MountTable::default(),
            Arc::new(BlockDelta::default()),
            Duration::from_secs(1),
        );
        serve(state, "127.0.0.1:0", async {}).await.unwrap();
    }

    #[tokio::test]
    async fn serve_reports_bind_failure() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let state = AppState::new(
            MountTable::default(),
            Arc::new(BlockDelta::default()),
            Duration::from_secs(1),
        );
        assert!(matches!(
            serve(state, &addr, async {}).await,
            Err(ServerError::Bind { .. })
        ));
    }

    #[test]
    fn bad_block_size_fails_startup() {
        let mut config = Config::default();
        config.delta.block_size = 0;
        assert!(matches!(
            AppState::from_config(&config),
            Err(ConfigError::Delta(_))
        ));
    }
}
