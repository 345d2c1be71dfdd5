//! Receipt processor library.
//!
//! Ingests scanned receipts, extracts their structured data through an
//! external extraction service, archives the files by purchase year and
//! retries rate-limited extractions in the background.

pub mod api;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod middleware;
pub mod migration;
pub mod models;
pub mod services;
