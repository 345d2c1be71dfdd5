//! Receipt pipeline integration suite.
//!
//! Runs against an in-memory SQLite database and a scripted extractor, so no
//! external services are needed.
//!
//! Run with: cargo test --test pipeline

mod mock_extractor;

mod test_ingest;
mod test_process;
mod test_queue;
