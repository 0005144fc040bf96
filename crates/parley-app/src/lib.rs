#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Parley request layer and process bootstrap.
//!
//! Layout: `store.rs` (in-memory records), `service.rs` (chat queries, mutation
//! and subscription), `config.rs` (environment configuration), `bootstrap.rs`
//! (service wiring and shutdown), `error.rs` (error types).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Environment configuration.
pub mod config;
/// Application and service error types.
pub mod error;
/// Chat service facade over the store and the event core.
pub mod service;
/// In-memory record store.
pub mod store;

pub use bootstrap::run_app;
pub use config::AppConfig;
pub use error::{AppError, AppResult, ServiceError, ServiceResult};
pub use service::ChatService;
pub use store::{Channel, MemoryStore, User};
