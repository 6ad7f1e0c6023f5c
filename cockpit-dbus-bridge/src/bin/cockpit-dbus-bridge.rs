//! Cockpit D-Bus bridge
//!
//! Serves the in-process bus over WebSocket at `/dbus`. With `--test-service`
//! it exports the DBusTests objects used by the client test suites.

use anyhow::Result;
use clap::Parser;
use cockpit_dbus_bridge::{init_logging, server, test_service, BridgeConfig, Bus};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = BridgeConfig::parse();
    init_logging(&config)?;

    let bus = Bus::with_config(&config);
    if config.test_service {
        test_service::install(&bus, &config.names)?;
        info!("test service exported at {}", test_service::FROBBER_PATH);
    }

    info!("Starting cockpit-dbus-bridge on {}", config.addr());
    if let Err(e) = server::run(&config, bus).await {
        error!("Bridge error: {}", e);
        return Err(e.into());
    }
    Ok(())
}
