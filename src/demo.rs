//! Demonstration devices for running without real strips.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bridge::{BridgeController, BridgeError};
use crate::device::Rgb;

const RED: Rgb = Rgb::new(255, 0, 0);
const GREEN: Rgb = Rgb::new(0, 255, 0);
const BLUE: Rgb = Rgb::new(0, 0, 255);

/// Registers `test1`, `test2` and `test3`, all offline.
pub async fn seed_demo_devices(bridge: &BridgeController) -> Result<(), BridgeError> {
    bridge.add_device("test1", 6).await?;

    bridge.add_device("test2", 2).await?;
    bridge.update_light("test2", 0, RED).await?;
    bridge.update_light("test2", 1, GREEN).await?;

    bridge.add_device("test3", 12).await?;
    for (index, color) in [RED, GREEN, BLUE].into_iter().cycle().take(12).enumerate() {
        bridge.update_light("test3", index, color).await?;
    }

    info!("Seeded demo devices test1, test2, test3");
    Ok(())
}

/// When each seeded device comes online after startup.
pub const DEMO_PRESENCE: [(&str, Duration); 2] = [
    ("test3", Duration::from_secs(4)),
    ("test2", Duration::from_secs(15)),
];

/// Brings `test3` online after 4 s and `test2` after 15 s.
pub fn schedule_demo_presence(bridge: &Arc<BridgeController>) -> Vec<JoinHandle<()>> {
    schedule_presence(bridge, &DEMO_PRESENCE)
}

fn schedule_presence(
    bridge: &Arc<BridgeController>,
    schedule: &[(&'static str, Duration)],
) -> Vec<JoinHandle<()>> {
    schedule
        .iter()
        .map(|&(id, delay)| {
            let bridge = Arc::clone(bridge);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match bridge.set_device_online(id, true).await {
                    Ok(_) => info!("Demo device {} is now online", id),
                    Err(e) => warn!("Demo device {} could not go online: {}", id, e),
                }
            })
        })
        .collect()
}
