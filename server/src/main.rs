use std::net::SocketAddr;
use tokio::net::TcpListener;

use ridelink_server::config::{generate_config_template, Config};
use ridelink_server::{hub, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ridelink_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ridelink_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("RideLink hub v{} starting", env!("CARGO_PKG_VERSION"));

    // Build application state: connection registry + live location table
    let app_state = state::AppState::new(config.realtime.clone());

    // Spawn the staleness reaper for driver location records
    hub::reaper::spawn_stale_location_reaper(
        app_state.locations.clone(),
        config.realtime.stale_after(),
        config.realtime.reap_interval(),
    );

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
