//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{ChatModelAdapter, DbAdapter, OllamaEmbeddingAdapter, RemoteEmbeddingAdapter},
    config::{Config, EmbeddingProviderKind},
    error::ApiError,
    web::{rest::ApiDoc, router, state::AppState},
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::Router;
use inbox_assistant_core::ports::{EmbeddingService, LanguageModelService, MessageStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
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

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = DbAdapter::new(db_pool);
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");
    let store: Arc<dyn MessageStore> = Arc::new(db_adapter);

    // --- 3. Initialize Model Adapters (priority order) ---
    let mut models: Vec<Arc<dyn LanguageModelService>> = Vec::new();
    for provider in &config.chat_providers {
        let adapter = ChatModelAdapter::from_config(provider, &config.ollama.base_url)?;
        info!(provider = provider.kind.as_str(), "Chat provider enabled.");
        models.push(Arc::new(adapter));
    }

    let mut embedders: Vec<Arc<dyn EmbeddingService>> = Vec::new();
    for kind in &config.embedding_providers {
        match kind {
            EmbeddingProviderKind::Ollama => embedders.push(Arc::new(OllamaEmbeddingAdapter::new(
                &config.ollama.base_url,
                &config.ollama.embed_model,
            )?)),
            EmbeddingProviderKind::Remote => {
                let remote = config
                    .remote_embedding
                    .as_ref()
                    .ok_or_else(|| ApiError::Internal("EMBEDDING_BASE_URL is required".to_string()))?;
                embedders.push(Arc::new(RemoteEmbeddingAdapter::new(remote)?));
            }
        }
    }
    info!(
        chat_providers = models.len(),
        embedding_providers = embedders.len(),
        "Model adapters initialized."
    );

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(config.clone(), store, models, embedders));

    // --- 5. Configure CORS ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static("x-user-id")]);

    // --- 6. Create the Web Router ---
    let app = Router::new()
        .merge(router(app_state))
        .layer(cors)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
