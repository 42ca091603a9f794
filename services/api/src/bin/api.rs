//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, MemoryDb, OpenAiContentGenerator, OpenAiMarkingAdapter},
    config::{Config, MarkingMode},
    error::ApiError,
    web::{build_router, rest::ApiDoc, AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method},
    Router,
};
use revision_core::{
    clock::SystemClock, marking::KeywordMarker, ContentGenerationService, DatabaseService,
    EngineSettings, MarkingService, StudyEngine,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to the Store & Run Migrations ---
    let db: Arc<dyn DatabaseService> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; using the in-memory store. Data is lost on restart.");
            Arc::new(MemoryDb::new())
        }
    };

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let generator: Arc<dyn ContentGenerationService> = Arc::new(OpenAiContentGenerator::new(
        openai_client.clone(),
        config.generator_model.clone(),
    ));

    let marker: Option<Arc<dyn MarkingService>> = match config.marking_mode {
        MarkingMode::Keyword => Some(Arc::new(KeywordMarker)),
        MarkingMode::Llm => Some(Arc::new(OpenAiMarkingAdapter::new(
            openai_client.clone(),
            config.marking_model.clone(),
        ))),
        MarkingMode::Review => None,
    };
    info!(marking_mode = ?config.marking_mode, graders = config.grader_ids.len(), "Answer marking configured");

    // --- 4. Build the Engine & Shared AppState ---
    let settings = EngineSettings {
        generator_timeout: config.generator_timeout,
        max_items_per_request: config.max_items_per_request,
    };
    let engine = Arc::new(StudyEngine::new(
        db,
        generator,
        marker,
        Arc::new(SystemClock),
        settings,
    ));
    let app_state = Arc::new(AppState::new(engine, config.clone()));
    let shutdown = app_state.shutdown.clone();

    // --- 5. Create the Web Router ---
    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<HeaderValue>().map_err(|e| {
            ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
        })?)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-user-id")]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(build_router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Cancels the token on Ctrl+C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections...");
    token.cancel();
}
