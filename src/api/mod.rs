//! API endpoint modules.

pub mod health;
pub mod openapi;
pub mod receipts;

pub use health::configure_health_routes;
pub use openapi::ApiDoc;
pub use receipts::{UploadLimits, configure_routes as configure_receipt_routes};

use std::sync::Arc;

use actix_web::web;

use crate::db::{DbPool, FileRecordRepository, ReceiptRepository};
use crate::services::{ExtractionOrchestrator, IngestService};

/// Shared state handed to every worker of the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub ingest: IngestService,
    pub orchestrator: Arc<ExtractionOrchestrator>,
    pub limits: UploadLimits,
}

impl AppState {
    /// Register the shared state and mount every API route under `/api`.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        let files: Arc<dyn FileRecordRepository> = Arc::new(self.pool.clone());
        let receipts: Arc<dyn ReceiptRepository> = Arc::new(self.pool.clone());

        cfg.app_data(web::Data::new(self.pool.clone()))
            .app_data(web::Data::new(self.ingest.clone()))
            .app_data(web::Data::from(self.orchestrator.clone()))
            .app_data(web::Data::from(files))
            .app_data(web::Data::from(receipts))
            .app_data(web::Data::new(self.limits))
            .service(
                web::scope("/api")
                    .configure(configure_health_routes)
                    .configure(configure_receipt_routes),
            );
    }
}
