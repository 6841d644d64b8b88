//! Monitor-mode interface control and channel hopping, driven through
//! `iw`/`ip` like the rest of the Linux wireless tooling.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Cycles the monitor interface through the configured channels so probes
/// on every channel get a chance to be heard.
pub struct ChannelHopper {
    interface: String,
    channels: Vec<u8>,
    hop_interval_ms: u64,
}

impl ChannelHopper {
    pub fn new(interface: String, channels: Vec<u8>, hop_interval_ms: u64) -> Self {
        ChannelHopper {
            interface,
            channels,
            hop_interval_ms,
        }
    }

    pub async fn run(&self, running: Arc<AtomicBool>) -> Result<()> {
        if self.channels.is_empty() {
            warn!("No channels configured, staying on the interface's current channel");
            return Ok(());
        }

        info!(
            "Hopping {} across channels {:?} every {}ms",
            self.interface, self.channels, self.hop_interval_ms
        );

        let mut idx = 0;
        while running.load(Ordering::SeqCst) {
            let channel = self.channels[idx];
            if let Err(e) = self.set_channel(channel) {
                error!("Failed to set channel {}: {}", channel, e);
            } else {
                debug!("Switched to channel {}", channel);
            }
            idx = (idx + 1) % self.channels.len();
            sleep(Duration::from_millis(self.hop_interval_ms)).await;
        }

        info!("Channel hopper stopped");
        Ok(())
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        let output = Command::new("iw")
            .args(["dev", &self.interface, "set", "channel", &channel.to_string()])
            .output()
            .context("Failed to execute iw command")?;

        if !output.status.success() {
            anyhow::bail!("iw command failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }
}

/// Put an interface into monitor mode: down, retype, up.
pub fn set_monitor_mode(interface: &str) -> Result<()> {
    info!("Setting {} to monitor mode", interface);

    let output = Command::new("ip")
        .args(["link", "set", interface, "down"])
        .output()
        .context("Failed to bring interface down")?;
    if !output.status.success() {
        warn!("Failed to bring interface down: {:?}", output.stderr);
    }

    let output = Command::new("iw")
        .args(["dev", interface, "set", "type", "monitor"])
        .output()
        .context("Failed to set monitor mode")?;
    if !output.status.success() {
        anyhow::bail!(
            "Failed to set monitor mode: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let output = Command::new("ip")
        .args(["link", "set", interface, "up"])
        .output()
        .context("Failed to bring interface up")?;
    if !output.status.success() {
        anyhow::bail!(
            "Failed to bring interface up: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    info!("Interface {} is now in monitor mode", interface);
    Ok(())
}

pub fn is_monitor_mode(interface: &str) -> Result<bool> {
    let output = Command::new("iw")
        .args(["dev", interface, "info"])
        .output()
        .context("Failed to get interface info")?;

    Ok(String::from_utf8_lossy(&output.stdout).contains("type monitor"))
}

/// First interface `iw dev` reports in monitor mode, if any.
pub fn find_monitor_interface() -> Result<Option<String>> {
    let output = Command::new("iw")
        .args(["dev"])
        .output()
        .context("Failed to list wireless devices")?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut current: Option<String> = None;

    for line in stdout.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("Interface ") {
            current = Some(name.to_string());
        } else if line.starts_with("type ") && line.contains("monitor") {
            if let Some(iface) = current.take() {
                info!("Found monitor mode interface: {}", iface);
                return Ok(Some(iface));
            }
        }
    }

    Ok(None)
}
