//! # Server Configuration
//!
//! Router assembly, OpenAPI document and the process lifecycle: HTTP API,
//! chunk executor and stall watchdog sharing one shutdown token.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::chunk_executor::ChunkExecutor;
use crate::config::AppConfig;
use crate::dispatcher::ChunkDispatcher;
use crate::handlers;
use crate::sources::SourceRegistry;
use crate::telemetry;
use crate::watchdog::StallWatchdog;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub dispatcher: Arc<ChunkDispatcher>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection, registry: Arc<SourceRegistry>) -> Self {
        let dispatcher = Arc::new(ChunkDispatcher::new(db.clone(), config.clone(), registry));
        Self {
            config,
            db,
            dispatcher,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/import-jobs", post(handlers::jobs::create_import_job))
        .route("/deletion-jobs", post(handlers::jobs::create_deletion_job))
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}/cancel", post(handlers::jobs::cancel_job))
        .route("/suggestions", get(handlers::suggestions::list_suggestions))
        .route(
            "/suggestions/{id}/confirm",
            post(handlers::suggestions::confirm_suggestion),
        )
        .route(
            "/suggestions/{id}/reject",
            post(handlers::suggestions::reject_suggestion),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(telemetry::trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Starts the HTTP API plus background workers and runs until ctrl-c.
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    registry: Arc<SourceRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let state = AppState::new(config.clone(), db.clone(), registry);

    let shutdown = CancellationToken::new();

    let executor = ChunkExecutor::new(db.clone(), state.dispatcher.clone(), config.worker.clone());
    let executor_handle = tokio::spawn(executor.run(shutdown.child_token()));

    let watchdog = StallWatchdog::new(config.clone(), db);
    let watchdog_handle = tokio::spawn(watchdog.run(shutdown.child_token()));

    let app = create_app(state);

    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    for handle in [executor_handle, watchdog_handle] {
        if let Err(e) = handle.await {
            error!(error = %e, "Background worker did not stop cleanly");
        }
    }

    info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::jobs::create_import_job,
        crate::handlers::jobs::create_deletion_job,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::cancel_job,
        crate::handlers::suggestions::list_suggestions,
        crate::handlers::suggestions::confirm_suggestion,
        crate::handlers::suggestions::reject_suggestion,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::error::SourceFailure,
            crate::handlers::jobs::CreateImportJobRequest,
            crate::handlers::jobs::CreateDeletionJobRequest,
            crate::handlers::jobs::JobAccepted,
            crate::handlers::jobs::JobStatusView,
            crate::handlers::suggestions::ReviewRequest,
            crate::handlers::suggestions::SuggestionView,
            crate::handlers::suggestions::SuggestionsResponse,
            crate::handlers::suggestions::MatchLinkView,
            crate::jobs::JobOptions,
            crate::jobs::DeletionTarget,
            crate::jobs::TargetEntity,
            crate::models::job::JobKind,
            crate::models::job::JobStatus,
            crate::models::job::ErrorEntry,
            crate::models::job::ErrorKind,
            crate::models::match_link::LinkType,
            crate::models::match_link::LinkOrigin,
            crate::models::match_suggestion::SuggestionStatus,
            crate::sources::SourceDescriptor,
            crate::sources::SourceSettings,
        )
    ),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "jobs", description = "Chunked import and cascading deletion jobs"),
        (name = "suggestions", description = "Manual review of match suggestions"),
    ),
    info(
        title = "Catalog Sync API",
        description = "Resumable chunked catalog imports, entity matching and cascading deletions",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
