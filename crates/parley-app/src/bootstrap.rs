//! Process bootstrap: configuration, logging, service wiring and the shutdown sweep.

use std::future::Future;
use std::io;

use parley_events::{EventBus, SessionHub};
use parley_telemetry::GlobalContextGuard;
use tracing::info;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::service::ChatService;
use crate::store::MemoryStore;

/// Entry point for the Parley boot sequence.
///
/// Runs until the process receives Ctrl-C, then closes every open subscription.
///
/// # Errors
///
/// Returns an error if configuration, logging setup, or signal handling fails.
pub async fn run_app() -> AppResult<()> {
    let config = AppConfig::from_env()?;
    parley_telemetry::init_logging(&config.logging())
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("server");

    info!(
        log_level = %config.log_level,
        session_capacity = ?config.session_capacity,
        "Parley bootstrap starting"
    );
    let service = build_service(&config)?;
    let _closed = serve_until(&service, tokio::signal::ctrl_c()).await?;
    Ok(())
}

/// Build the chat service, seeding demo records when configured.
pub(crate) fn build_service(config: &AppConfig) -> AppResult<ChatService> {
    let store = if config.seed_demo {
        MemoryStore::seeded().map_err(|err| AppError::service("store.seed", err))?
    } else {
        MemoryStore::new()
    };
    let hub = SessionHub::with_bus(EventBus::new(), config.session_config());
    Ok(ChatService::new(store, hub))
}

/// Wait for `shutdown`, then run the shutdown sweep; returns how many sessions it closed.
pub(crate) async fn serve_until<F>(service: &ChatService, shutdown: F) -> AppResult<usize>
where
    F: Future<Output = io::Result<()>>,
{
    info!("Parley event core ready; waiting for shutdown signal");
    shutdown
        .await
        .map_err(|err| AppError::io("signal.ctrl_c", err))?;
    info!(
        open = service.open_subscriptions(),
        "Shutdown requested; closing subscriptions"
    );
    Ok(service.shutdown())
}
