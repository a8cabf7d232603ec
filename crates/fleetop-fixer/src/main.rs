//! Fixer: consumes dispatched actions from the message bus and applies
//! them against the control plane, recording the terminal outcome on the
//! incident record.

mod app;
mod control_plane;
mod routes;

use app::AppState;
use fleetop_config::FleetConfig;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("fleetop_fixer=info".parse()?))
        .init();

    let config = match FleetConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return Err(e.into());
        }
    };

    tracing::info!(
        project_id = %config.project_id,
        region = %config.region,
        dry_run = config.dry_run_mode,
        "fixer starting"
    );

    let port = config.port;
    let state = Arc::new(AppState::new(config));
    state.audit.log(
        "fixer",
        fleetop_observe::OperationKind::ConfigLoad,
        None,
        fleetop_observe::OperationOutcome::Success,
        None,
        std::collections::HashMap::new(),
    );

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
