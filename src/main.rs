use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod chat_store;
mod classifier;
mod config;
mod confidence;
mod conversation;
mod db;
mod errors;
mod gemini_client;
mod handlers;
mod middleware;
mod models;
mod symptoms;

use classifier::{DiseaseMapping, DiseaseModel, OnnxDiseaseModel};
use symptoms::SymptomVocabulary;

/// Shared per-process state: the pool, the artifacts loaded at startup, and
/// the optional LLM client. Immutable after construction.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub config: config::AppConfig,
    pub vocabulary: SymptomVocabulary,
    pub disease_mapping: DiseaseMapping,
    pub model: Arc<dyn DiseaseModel>,
    pub chat_store: chat_store::ChatStore,
    pub gemini_client: Option<gemini_client::GeminiClient>,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let app_config = config::AppConfig::from_env();

    // Create the database connection pool (runs migrations)
    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");

    // Model artifacts are required; refuse to serve without them.
    let vocabulary = SymptomVocabulary::load(&app_config.symptoms_path)
        .expect("Failed to load symptom vocabulary");
    let disease_mapping = DiseaseMapping::load(&app_config.disease_mapping_path)
        .expect("Failed to load disease mapping");
    let model: Arc<dyn DiseaseModel> = Arc::new(
        OnnxDiseaseModel::load(&app_config.model_path).expect("Failed to load disease model"),
    );
    tracing::info!(
        "🩺 Loaded {} symptoms and {} disease classes",
        vocabulary.len(),
        disease_mapping.len()
    );

    // Initialize Gemini client if an API key is provided
    let gemini_client = match std::env::var("GEMINI_API_KEY").ok() {
        Some(api_key) if !api_key.is_empty() => {
            tracing::info!("Initializing Gemini AI client (2.0 Flash)...");
            Some(gemini_client::GeminiClient::new(api_key))
        }
        _ => {
            tracing::warn!("GEMINI_API_KEY not found. Chat assistant will be disabled.");
            None
        }
    };

    let chat_store = chat_store::ChatStore::new(db_pool.clone());
    let bind_addr = app_config.bind_addr.clone();

    let shared_state = Arc::new(AppState {
        db_pool,
        config: app_config,
        vocabulary,
        disease_mapping,
        model,
        chat_store,
        gemini_client,
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::auth::auth_routes())
        .merge(handlers::profile::profile_routes())
        .merge(handlers::predict::predict_routes())
        .merge(handlers::chat::chat_routes())
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,medibot=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,medibot=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // JSON logging for aggregation in production, human-readable otherwise
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("🩺 Medibot starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    Ok(())
}
