//! Stackwatch: discovery, reconciliation and realtime monitoring for a fleet
//! of Docker Compose projects on one host.
//!
//! The scanner finds compose definition files under configured roots, the
//! fleet manager merges them with live daemon state into one authoritative
//! project map, and the hub pushes status and stats to connected websocket
//! clients. Lifecycle operations shell out to `docker compose`; everything
//! else talks to the daemon socket directly.

use std::sync::Arc;
use std::time::Duration;

pub mod api;
pub mod config;
pub mod error;
pub mod fleet;
pub mod hub;
pub mod model;
pub mod protection;
pub mod runtime;
pub mod scanner;
pub mod store;

use error::ResultOkLogExt;
use fleet::FleetManager;
use hub::{Message, MessageType};
use protection::ProtectionPolicy;
use runtime::Runtime;
use runtime::compose::{self, DockerCompose};
use scanner::Scanner;
use store::PreferenceStore;

const STATS_STREAM_INTERVAL: Duration = Duration::from_secs(2);

/// Runs the service until ctrl-c.
///
/// # Errors
///
/// Fails fast when the daemon socket is unreachable or the listen address
/// cannot be bound. A missing preference store or a failing initial scan are
/// degraded-mode conditions, not startup failures.
pub async fn run(config: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::connect(&config.docker.socket)?;
    if let Err(err) = runtime.ping().await {
        return Err(format!(
            "docker daemon is not reachable at {}: {err}",
            config.docker.socket
        )
        .into());
    }

    if !compose::is_compose_installed().await {
        log::warn!("`docker compose` is not available; lifecycle operations will fail");
    }

    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent).ok_log();
    }
    let store = match PreferenceStore::connect(&config.store.path).await {
        Ok(store) => Some(store),
        Err(err) => {
            log::warn!("preference store unavailable: {err}; display names and hidden flags will not persist");
            None
        }
    };

    let scanner = Arc::new(Scanner::new(
        config.scan.paths.clone(),
        config.scan.exclude.clone(),
    ));
    let policy = ProtectionPolicy::new(
        config.protection.patterns.clone(),
        config.protection.projects.clone(),
    );
    let manager = Arc::new(FleetManager::new(
        scanner,
        runtime,
        policy,
        store,
        DockerCompose,
    ));

    if let Err(err) = manager.refresh().await {
        log::warn!("initial refresh failed: {err}");
    } else {
        log::info!("tracking {} projects", manager.project_count());
    }

    let (hub, driver) = hub::new();
    tokio::spawn(driver.run());

    {
        let manager = Arc::clone(&manager);
        let hub = hub.clone();
        let interval = Duration::from_secs(config.scan.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = manager.refresh().await {
                    log::warn!("periodic refresh failed: {err}");
                    continue;
                }
                if hub.client_count() > 0 {
                    if let Some(payload) =
                        serde_json::to_value(manager.list_projects()).ok_log()
                    {
                        hub.broadcast(Message::new(MessageType::ProjectList, Some(payload)))
                            .await;
                    }
                }
            }
        });
    }

    tokio::spawn(hub::run_stats_streamer(
        hub.clone(),
        Arc::clone(&manager),
        STATS_STREAM_INTERVAL,
    ));

    let state = api::AppState { manager, hub };
    api::APIServer::new(state)
        .listen(config.bind_addr(), shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to install ctrl-c handler: {err}");
        return;
    }
    log::info!("shutting down");
}
