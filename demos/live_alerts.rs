//! Live alert feed for one client.
//!
//! Connects to the alert service, subscribes to a set of areas and prints every
//! alert and notification until Ctrl-C.
//!
//! ```sh
//! NAGAR_ALERT_CLIENT_ID=user-42 NAGAR_ALERT_AREAS=Sector4,Ward7 \
//!     RUST_LOG=info cargo run --example live_alerts
//! ```
//!
//! Set `NAGAR_ALERT_ENDPOINT` to point at another deployment.

use std::time::Duration;

use futures::StreamExt as _;
use nagar_alert_realtime::realtime::{Client, DEFAULT_ENDPOINT};
use nagar_alert_realtime::{Config, HeartbeatConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let endpoint =
        std::env::var("NAGAR_ALERT_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());
    let client_id = std::env::var("NAGAR_ALERT_CLIENT_ID").unwrap_or_else(|_| "demo".to_owned());
    let areas: Vec<String> = std::env::var("NAGAR_ALERT_AREAS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|area| !area.is_empty())
        .map(str::to_owned)
        .collect();

    let config = Config::builder()
        .heartbeat(
            HeartbeatConfig::builder()
                .interval(Duration::from_secs(25))
                .timeout(Duration::from_secs(60))
                .build(),
        )
        .connect_timeout(Duration::from_secs(15))
        .build();
    let client = Client::new(&endpoint, config)?;

    let notifications = client.on_notification(|data| info!(%data, "notification"));

    let mut states = client.state_receiver();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(?state, "connection state");
        }
    });

    client.connect(&client_id, areas.iter().cloned())?;
    info!(%endpoint, %client_id, ?areas, "listening for alerts, Ctrl-C to stop");

    let mut alerts = Box::pin(client.alerts());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            alert = alerts.next() => match alert {
                Some(Ok(alert)) => info!(
                    area = %alert.area,
                    issue_type = ?alert.issue_type,
                    message = ?alert.message,
                    target_count = ?alert.target_count,
                    "alert"
                ),
                Some(Err(e)) => warn!(error = %e, "alert stream"),
                None => break,
            },
        }
    }

    notifications.remove();
    client.disconnect();
    Ok(())
}
