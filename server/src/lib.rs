use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, trace::TraceLayer,
};
use tracing::Span;
use utoipa::OpenApi;

pub mod archive;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod file_reply;
mod handlers;
pub mod progress;
pub mod range;
pub mod reader_stream;
pub mod service;
pub mod store;
pub mod sweeper;

#[cfg(test)] // <-- not needed in integration tests
extern crate rstest;

pub use crate::config::{Config, ConfigError};
pub use crate::error::TransferError;
pub use crate::service::TransferService;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

extern crate tokio;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::upload_group,
        handlers::get_group,
        handlers::download_group,
        handlers::delete_group,
        handlers::download_file,
        handlers::get_file_info,
        handlers::stream_file,
        handlers::delete_file,
        handlers::progress_events,
    ),
    components(schemas(
        kernel::FileSummary,
        kernel::GroupSummary,
        kernel::UploadSummary,
        kernel::ProgressEvent,
        kernel::TransferKind,
        kernel::DeleteResult
    )),
    tags(
        (name = "groups", description = "Uploading and downloading groups of files"),
        (name = "files", description = "Single files of a group"),
        (name = "progress", description = "Transfer progress notifications")
    )
)]
pub struct ApiDoc;

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "server=debug,gdrop=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Serves until Ctrl+C or SIGTERM, then stops the retention sweeper.
pub async fn run(config: Config) -> std::io::Result<()> {
    let service = TransferService::open(&config)
        .await
        .map_err(std::io::Error::other)?;
    let service = Arc::new(service);
    let sweeper = service.sweeper().start();

    let socket = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(socket).await?;
    tracing::debug!("listening on {socket}");
    tracing::info!(
        "data in {}, files kept {:?}",
        config.data_dir.display(),
        config.file_retention
    );

    let app = create_routes(Arc::clone(&service), config.request_body_limit());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.stop().await;
    served
}

pub fn create_routes(service: Arc<TransferService>, body_limit: usize) -> Router {
    Router::new()
        .route("/api/upload", post(handlers::upload_group))
        .route(
            "/api/group/:id",
            get(handlers::get_group).delete(handlers::delete_group),
        )
        .route("/api/group/:id/download", get(handlers::download_group))
        .route(
            "/api/file/:id",
            delete(handlers::delete_file).get(handlers::download_file),
        )
        .route("/api/file/:id/meta", get(handlers::get_file_info))
        .route("/api/file/:id/stream", get(handlers::stream_file))
        .route("/api/progress", get(handlers::progress_events))
        .route("/api-docs/openapi.json", get(handlers::openapi))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        tracing::error!("Server error: {error}");
                    },
                ))
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(body_limit))
                .into_inner(),
        )
        .with_state(service)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
