//! Serial Sensor Bridge
//!
//! Discovers room sensors and doorbells on the host's serial ports, keeps a
//! link open to each one, and logs their readings.
//!
//! Usage: `serialthing [SETTINGS.json]`

mod bridge;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use bridge::Bridge;
use sensor_detect::SerialTransport;
use settings::Settings;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "serialthing=info,sensor_protocol=info,sensor_detect=info,sensor_link=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting serialthing");

    let settings = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => Settings::load_from(&path)?,
        None => Settings::load(),
    };

    let transport = Arc::new(SerialTransport::with_config(settings.scanner.clone()));
    let bridge = Bridge::new(transport, settings);

    let result = bridge
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("serialthing stopped");
    result
}
