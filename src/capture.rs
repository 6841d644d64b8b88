use crate::config::Config;
use crate::database::{Database, TIMESTAMP_FMT};
use crate::fingerprint::{self, NO_STABLE_IES};
use crate::iface::ChannelHopper;
use crate::mqtt::ProbePublisher;
use crate::notify::{evaluate_arrival, Notifier};
use crate::oui::OuiResolver;
use crate::parser::{self, DecodeError};
use crate::probe::Probe;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use pcap::Capture;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Append-only CSV mirror of every accepted sighting.
pub struct ProbeLog {
    file: std::fs::File,
}

impl ProbeLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("Failed to open probe log: {:?}", path.as_ref()))?;
        Ok(ProbeLog { file })
    }

    fn append(&mut self, probe: &Probe) {
        if let Err(e) = writeln!(self.file, "{}", probe.to_csv()) {
            warn!("Failed to write probe log: {}", e);
        }
    }
}

/// The ingest path: pulls frames off the monitor interface and runs each
/// through decode → trusted filter → fingerprint → persist → arrival gate.
pub struct CaptureEngine {
    config: Config,
    db: Database,
    oui: OuiResolver,
    notifier: Arc<dyn Notifier>,
    publisher: Option<ProbePublisher>,
    probe_log: Option<ProbeLog>,
    running: Arc<AtomicBool>,
    frames: u64,
    accepted: u64,
    decode_errors: u64,
    store_errors: u64,
}

impl CaptureEngine {
    pub fn new(
        config: Config,
        db: Database,
        oui: OuiResolver,
        notifier: Arc<dyn Notifier>,
        running: Arc<AtomicBool>,
    ) -> Self {
        CaptureEngine {
            config,
            db,
            oui,
            notifier,
            publisher: None,
            probe_log: None,
            running,
            frames: 0,
            accepted: 0,
            decode_errors: 0,
            store_errors: 0,
        }
    }

    pub fn with_publisher(mut self, publisher: ProbePublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_probe_log(mut self, probe_log: ProbeLog) -> Self {
        self.probe_log = Some(probe_log);
        self
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub async fn run(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let interface = self.config.capture.interface.clone();
        info!("Starting capture on interface: {}", interface);

        let cap_builder = Capture::from_device(interface.as_str())
            .context("Failed to open capture device")?
            .promisc(true)
            .snaplen(65535)
            .timeout(1000);
        let mut cap = cap_builder.open().map_err(|e| {
            error!("Failed to activate capture: {}", e);
            error!("Make sure you're running as root (sudo) and the interface exists");
            anyhow::anyhow!("Failed to activate capture: {}", e)
        })?;

        // Management frames, subtype 4. If the driver rejects the filter we
        // still discard non-probe frames in software.
        if let Err(e) = cap.filter("type mgt subtype probe-req", true) {
            warn!("Failed to set BPF filter, will filter in software: {}", e);
        }

        let hopper = ChannelHopper::new(
            interface.clone(),
            self.config.capture.channels.clone(),
            self.config.capture.hop_interval_ms,
        );
        let hopper_running = self.running.clone();
        let hopper_handle = tokio::spawn(async move {
            if let Err(e) = hopper.run(hopper_running).await {
                error!("Channel hopper error: {}", e);
            }
        });

        info!("Capture started. Press Ctrl+C to stop.");

        let mut capture_failure = None;
        while self.running.load(Ordering::SeqCst) {
            match cap.next_packet() {
                Ok(packet) => self.handle_frame(packet.data),
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!("Capture error: {}", e);
                        capture_failure = Some(e);
                    }
                    break;
                }
            }
        }

        info!(
            "Capture stopped. Frames: {}, sightings: {}, decode errors: {}, store errors: {}",
            self.frames, self.accepted, self.decode_errors, self.store_errors
        );

        hopper_handle.abort();
        if let Some(publisher) = &self.publisher {
            publisher.shutdown().await;
        }

        match capture_failure {
            Some(e) => Err(anyhow::anyhow!("Capture failed: {}", e)),
            None => Ok(()),
        }
    }

    /// Process one captured packet end to end. Every failure mode recovers
    /// here; nothing a single frame does can take the loop down.
    pub fn handle_frame(&mut self, data: &[u8]) {
        self.frames += 1;

        let frame = match parser::parse_probe_request(data) {
            Ok(frame) => frame,
            Err(DecodeError::NotProbeRequest) => return,
            Err(e) => {
                self.decode_errors += 1;
                error!(
                    "Frame decode failed ({} bytes, sha256:{}): {}",
                    data.len(),
                    frame_digest(data),
                    e
                );
                return;
            }
        };

        // Trusted devices are dropped before any write.
        if self.oui.is_trusted(&frame.source_mac) {
            debug!("Trusted device seen: {}", frame.source_mac);
            return;
        }

        let probe = Probe {
            timestamp: Utc::now().format(TIMESTAMP_FMT).to_string(),
            dbm: frame.dbm,
            channel: frame.channel,
            mac: frame.source_mac.clone(),
            oui: self.oui.resolve(&frame.source_mac),
            ssid: frame.ssid.clone(),
            ie_fingerprint: fingerprint::fingerprint(&frame.ies),
            ie_data: fingerprint::ie_dump(&frame.ies),
        };

        info!(
            "Probe: MAC={} SSID={:?} Signal={}dBm OUI={}",
            probe.mac, probe.ssid, probe.dbm, probe.oui
        );

        if let Some(log) = &mut self.probe_log {
            log.append(&probe);
        }
        if let Some(publisher) = &self.publisher {
            publisher.publish(&probe);
        }

        let old_fingerprint = match self.db.log_sighting(&probe.to_sighting()) {
            Ok(old) => old,
            Err(e) => {
                self.store_errors += 1;
                error!("Failed to store sighting from {}: {}", probe.mac, e);
                return;
            }
        };
        self.accepted += 1;

        // No fingerprint row, no arrival to detect.
        if probe.ie_fingerprint == NO_STABLE_IES {
            return;
        }

        if let Some(kind) = evaluate_arrival(old_fingerprint.as_ref(), Utc::now()) {
            // Returning devices report their pre-update row so the notifier
            // can show the real last-seen gap; new devices have only the
            // freshly inserted row.
            let snapshot = match old_fingerprint {
                Some(fingerprint) => Some(fingerprint),
                None => self
                    .db
                    .get_fingerprint(&probe.ie_fingerprint)
                    .unwrap_or_default(),
            };
            if let Some(fingerprint) = snapshot {
                self.notifier.notify(&fingerprint, &probe, kind);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&mut self) -> &mut Database {
        &mut self.db
    }
}

/// Short digest identifying an offending frame in the error log.
fn frame_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())[..8].to_string()
}
