use color_eyre::{eyre::eyre, Result};
use lightstrip_controller::bridge::{BridgeController, BridgeEvent};
use lightstrip_controller::config::AppConfig;
use lightstrip_controller::demo;
use lightstrip_controller::mqtt::MqttHandler;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = AppConfig::load_or_create().await?;
    info!("Using MQTT broker {}", config.mqtt.server);

    let transport = Arc::new(MqttHandler::new(config.mqtt.clone()));
    let bridge = BridgeController::new(
        transport,
        config.mqtt.server.clone(),
        config.bridge_settings(),
    );

    let _event_log = tokio::spawn(log_events(bridge.clone()));

    if config.seed_demo_devices {
        demo::seed_demo_devices(&bridge)
            .await
            .map_err(|e| eyre!("Failed to seed demo devices: {}", e))?;
        let _presence = demo::schedule_demo_presence(&bridge);
    }

    match bridge.connect().await {
        Ok(status) => info!("{}", status),
        Err(e) => warn!("{}, continuing offline", e),
    }
    bridge.list_devices().await;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutting down");

    if let Err(e) = bridge.disconnect().await {
        error!("Disconnect failed: {}", e);
    }
    bridge.list_devices().await;
    Ok(())
}

/// Stand-in for a presentation layer: logs every bridge event.
async fn log_events(bridge: Arc<BridgeController>) {
    let mut events = bridge.subscribe();
    loop {
        match events.recv().await {
            Ok(BridgeEvent::Status(line)) => info!("Status: {}", line),
            Ok(BridgeEvent::OnlineChanged { device_id, online }) => {
                info!("{} is {}", device_id, if online { "online" } else { "offline" })
            }
            Ok(event) => match event.device_id() {
                Some(id) => debug!("{}: {:?}", id, event),
                None => debug!("Bridge event: {:?}", event),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
