//! Receipt Processor - Main entry point.
//!
//! Starts the Actix-web server, the retry queue worker and the configured
//! extraction adapter.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use actix_cors::Cors;
use actix_files::{Files, NamedFile};
use actix_web::{App, HttpRequest, HttpServer, Result as ActixResult, http::header, web};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use receipt_processor_lib::api::{self, ApiDoc, AppState, UploadLimits};
use receipt_processor_lib::config::Config;
use receipt_processor_lib::db::{DbPool, FileRecordRepository, ReceiptRepository};
use receipt_processor_lib::middleware::RequestLogger;
use receipt_processor_lib::services::{
    ExtractionOrchestrator, GeminiExtractor, IngestService, QueueWorker, ReceiptExtractor,
    RetryPolicy, WorkerSettings,
};

/// SPA fallback handler - serves index.html for client-side routing.
async fn spa_fallback(req: HttpRequest) -> ActixResult<NamedFile> {
    let static_dir = req
        .app_data::<web::Data<PathBuf>>()
        .ok_or_else(|| actix_web::error::ErrorNotFound("Static dir not configured"))?;
    Ok(NamedFile::open(static_dir.join("index.html"))?)
}

/// Directory holding a file-backed SQLite database, if the URL names one.
fn sqlite_parent_dir(database_url: &str) -> Option<&Path> {
    let path = database_url
        .strip_prefix("sqlite://")?
        .split('?')
        .next()
        .filter(|p| !p.is_empty() && !p.starts_with(':'))?;
    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, DATABASE_URL and GEMINI_API_KEY must be set");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  Receipt Processor");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
    }
    if config.extraction.api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; every extraction attempt will fail");
    }

    // Create data directories
    tokio::fs::create_dir_all(&config.upload_dir).await?;
    if let Some(dir) = sqlite_parent_dir(&config.database_url) {
        tokio::fs::create_dir_all(dir).await?;
    }

    // Initialize database
    let pool = match DbPool::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };
    info!("Database connection established");

    if let Err(e) = pool.run_migrations().await {
        error!("Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    // Wire the pipeline
    let files: Arc<dyn FileRecordRepository> = Arc::new(pool.clone());
    let receipts: Arc<dyn ReceiptRepository> = Arc::new(pool.clone());

    let extractor: Arc<dyn ReceiptExtractor> = match GeminiExtractor::new(&config.extraction) {
        Ok(extractor) => Arc::new(extractor),
        Err(e) => {
            error!("Failed to initialize extraction client: {}", e);
            std::process::exit(1);
        }
    };
    info!("Extraction model: {}", config.extraction.model);

    let orchestrator = Arc::new(ExtractionOrchestrator::new(
        files.clone(),
        receipts,
        extractor,
        RetryPolicy::from_settings(&config.queue),
        config.extraction.timeout,
    ));

    let ingest = IngestService::new(files.clone(), config.upload_dir.clone());

    // Start the retry queue worker
    let worker = Arc::new(QueueWorker::new(
        files,
        orchestrator.clone(),
        WorkerSettings::from_queue(&config.queue),
    ));

    // Nothing can be in flight yet, so every `processing` row was abandoned
    if let Err(e) = worker.recover_on_startup().await {
        error!("Failed to requeue interrupted receipts: {}", e);
        std::process::exit(1);
    }
    let worker_handle = worker.start();

    // Prepare shared state
    let bind_address = config.bind_address();
    let max_upload_size = config.max_upload_size;
    let static_dir = config.static_dir.clone();
    let is_development = config.is_development();

    let state = AppState {
        pool,
        ingest,
        orchestrator,
        limits: UploadLimits { max_upload_size },
    };

    info!("Upload limit: {}MB per receipt", max_upload_size / 1024 / 1024);

    if static_dir.is_some() {
        info!("Static file serving enabled from {:?}", static_dir);
    }

    let worker_count = if is_development {
        info!(
            "Starting server at http://{} (4 workers - development mode)",
            bind_address
        );
        4
    } else {
        let cpus = num_cpus::get();
        info!(
            "Starting server at http://{} ({} workers)",
            bind_address, cpus
        );
        cpus
    };

    let openapi = ApiDoc::openapi();

    // Start HTTP server
    let server = HttpServer::new(move || {
        // Configure CORS
        let cors = if is_development {
            // Permissive CORS for the development UI
            Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600)
        } else {
            // Restrictive CORS for production (same-origin only)
            Cors::default()
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600)
        };

        let mut app = App::new()
            // Add CORS middleware (must be before other middleware)
            .wrap(cors)
            // Add request logging middleware
            .wrap(RequestLogger)
            // Swagger UI must be registered before the /api scope claims the prefix
            .service(
                SwaggerUi::new("/api/docs/{_:.*}").url("/api/openapi.json", openapi.clone()),
            )
            .configure(|cfg| state.configure(cfg));

        // Serve the SPA when RP_STATIC_DIR is set, otherwise answer `/` with a liveness message
        if let Some(ref dir) = static_dir {
            app = app
                .app_data(web::Data::new(dir.clone()))
                .service(Files::new("/assets", dir.join("assets")).prefer_utf8(true))
                .default_service(web::route().to(spa_fallback));
        } else {
            app = app.route("/", web::get().to(api::health::root));
        }

        app
    });

    let result = server
        .workers(worker_count)
        .bind(&bind_address)?
        .run()
        .await;

    // Stop scheduling retries once the server has shut down
    worker_handle.stop().await;
    info!("Shutdown complete");

    result
}
