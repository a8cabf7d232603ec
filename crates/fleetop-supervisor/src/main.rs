//! Supervisor: scans the fleet, reasons about anomalies, persists
//! incidents, and dispatches remediation actions to the Fixer over the
//! message bus.

mod app;
mod bus;
mod model;
mod revision;
mod routes;
mod telemetry;

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
        .with(EnvFilter::from_default_env().add_directive("fleetop_supervisor=info".parse()?))
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
        targets = config.targets.len(),
        dry_run = config.dry_run_mode,
        "fleet supervisor starting"
    );

    let port = config.port;
    let state = Arc::new(AppState::new(config));
    state.audit.log(
        "supervisor",
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
