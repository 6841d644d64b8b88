use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wuds::capture::{CaptureEngine, ProbeLog};
use wuds::config::Config;
use wuds::database::Database;
use wuds::iface::{find_monitor_interface, is_monitor_mode, set_monitor_mode};
use wuds::mqtt::ProbePublisher;
use wuds::notify::{LogNotifier, Notifier, WebhookNotifier};
use wuds::oui::OuiResolver;

#[derive(Parser)]
#[command(name = "wuds")]
#[command(version = "0.2.0")]
#[command(about = "Passive Wi-Fi probe request sensor with IE fingerprinting")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Database file (overrides config and DATABASE_PATH)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sniff probe requests on a monitor-mode interface
    Capture {
        /// Monitor mode interface
        #[arg(short = 'm', long)]
        monitor: String,

        /// Put the interface into monitor mode first
        #[arg(long)]
        set_monitor: bool,
    },

    /// List sighted devices
    Devices {
        /// Only trusted devices
        #[arg(long)]
        trusted: bool,
    },

    /// List sightings, newest first
    Sightings {
        /// Filter by device MAC
        #[arg(long)]
        mac: Option<String>,

        #[arg(long, default_value = "50")]
        limit: u32,

        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// List device fingerprints by sighting count
    Fingerprints {
        #[arg(long, default_value = "50")]
        limit: u32,

        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// List labeled device identities
    Identities,

    /// Show store statistics
    Stats,

    /// Label a fingerprint (creates or renames its identity)
    Alias {
        /// Fingerprint id
        fingerprint: String,

        /// User-friendly device name
        alias: String,
    },

    /// Stop notifications for a fingerprint
    Silence {
        /// Fingerprint id
        fingerprint: String,
    },

    /// Mark a device MAC as trusted so its probes are dropped
    Trust {
        /// Device MAC address
        mac: String,

        /// Optional friendly name
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    let mut config = if cli.config.exists() {
        Config::load(&cli.config).context("Failed to load config")?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };
    config.apply_env();

    if let Some(database) = cli.database {
        config.capture.database = database.to_string_lossy().to_string();
    }

    match cli.command {
        Commands::Capture {
            monitor,
            set_monitor,
        } => handle_capture(config, monitor, set_monitor).await,
        Commands::Devices { trusted } => handle_devices(config, trusted),
        Commands::Sightings { mac, limit, offset } => {
            handle_sightings(config, mac, limit, offset)
        }
        Commands::Fingerprints { limit, offset } => handle_fingerprints(config, limit, offset),
        Commands::Identities => handle_identities(config),
        Commands::Stats => handle_stats(config),
        Commands::Alias { fingerprint, alias } => handle_alias(config, fingerprint, alias),
        Commands::Silence { fingerprint } => handle_silence(config, fingerprint),
        Commands::Trust { mac, name } => handle_trust(config, mac, name),
    }
}

async fn handle_capture(mut config: Config, monitor: String, set_monitor: bool) -> Result<()> {
    config.capture.interface = monitor;
    let interface = config.capture.interface.clone();

    if set_monitor {
        set_monitor_mode(&interface)?;
    } else if !is_monitor_mode(&interface)? {
        match find_monitor_interface()? {
            Some(found) => {
                info!("{} is not in monitor mode, using {}", interface, found);
                config.capture.interface = found;
            }
            None => {
                error!(
                    "Interface {} is not in monitor mode and no monitor interface found. \
                     Use --set-monitor.",
                    interface
                );
                std::process::exit(1);
            }
        }
    }
    info!("Using interface: {}", config.capture.interface);

    let db = Database::open(&config.capture.database).context("Failed to open database")?;

    // Trusted full MACs get seeded into the OUI map and dropped on sight.
    let trusted = db.get_trusted_devices()?;
    let oui = OuiResolver::load(&config.capture.oui_file, &trusted)
        .context("Failed to load OUI table")?;
    info!(
        "OUI table loaded: {} entries ({} trusted devices)",
        oui.len(),
        trusted.len()
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping capture...");
        r.store(false, Ordering::SeqCst);
    })?;

    let notifier: Arc<dyn Notifier> = if config.notify.enabled && !config.notify.webhook_url.is_empty()
    {
        Arc::new(WebhookNotifier::new(
            config.notify.webhook_url.clone(),
            config.notify.timeout_secs,
        )?)
    } else {
        info!("No notifier webhook configured, arrivals go to the log only");
        Arc::new(LogNotifier)
    };

    let mut engine = CaptureEngine::new(config.clone(), db, oui, notifier, running);

    if config.mqtt.enabled {
        engine = engine.with_publisher(ProbePublisher::connect(&config.mqtt));
    }

    match ProbeLog::open(&config.capture.probe_log) {
        Ok(probe_log) => engine = engine.with_probe_log(probe_log),
        Err(e) => warn!("Probe log disabled: {}", e),
    }

    if let Err(e) = engine.run().await {
        error!("Capture failed: {}", e);
        std::process::exit(1);
    }

    // Force exit to ensure all background tasks terminate
    info!("Exiting...");
    std::process::exit(0);
}

fn handle_devices(config: Config, trusted: bool) -> Result<()> {
    let db = Database::open(&config.capture.database).context("Failed to open database")?;
    let filter = if trusted { Some(true) } else { None };
    let devices = db.get_all_devices(filter)?;

    println!("Found {} devices", devices.len());
    println!();
    for device in &devices {
        println!("MAC: {}", device.mac);
        if let Some(name) = &device.name {
            println!("  Name: {}", name);
        }
        if device.is_trusted {
            println!("  Trusted: yes");
        }
        println!("  First seen: {}", device.first_seen);
        println!("  Last seen:  {}", device.last_seen);
        println!();
    }
    Ok(())
}

fn handle_sightings(config: Config, mac: Option<String>, limit: u32, offset: u32) -> Result<()> {
    let db = Database::open(&config.capture.database).context("Failed to open database")?;
    let (sightings, total) = db.get_sightings(mac.as_deref(), limit, offset, false)?;

    println!("Showing {} of {} sightings", sightings.len(), total);
    println!();
    for s in &sightings {
        println!(
            "{}  {}  {}  {}  {}  fp={}",
            s.timestamp,
            s.mac,
            s.rssi.as_deref().unwrap_or("?"),
            s.oui.as_deref().unwrap_or("?"),
            s.ssid.as_deref().unwrap_or("?"),
            s.ie_fingerprint.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn handle_fingerprints(config: Config, limit: u32, offset: u32) -> Result<()> {
    let db = Database::open(&config.capture.database).context("Failed to open database")?;
    let (fingerprints, total) = db.list_fingerprints(limit, offset)?;

    println!("Showing {} of {} fingerprints", fingerprints.len(), total);
    println!();
    for fp in &fingerprints {
        println!("Fingerprint: {}", fp.fingerprint_id);
        println!("  Sightings: {}", fp.sighting_count);
        println!("  First seen: {}", fp.first_seen);
        println!("  Last seen:  {}", fp.last_seen);
        if let Some(identity) = &fp.identity_id {
            println!("  Identity: {}", identity);
        }
        if !fp.notification_enabled {
            println!("  Notifications: silenced");
        }
        let ssids = db.fingerprint_ssid_signature(&fp.fingerprint_id)?;
        if !ssids.is_empty() {
            println!("  Probes for: {}", ssids.join(", "));
        }
        println!();
    }
    Ok(())
}

fn handle_identities(config: Config) -> Result<()> {
    let db = Database::open(&config.capture.database).context("Failed to open database")?;
    let identities = db.get_all_identities()?;

    println!("Found {} identities", identities.len());
    println!();
    for identity in &identities {
        println!("Identity: {}", identity.identity_id);
        println!(
            "  Alias: {}",
            identity.alias.as_deref().unwrap_or("<unlabeled>")
        );
        println!("  Last seen: {}", identity.last_seen);
        println!();
    }
    Ok(())
}

fn handle_stats(config: Config) -> Result<()> {
    let db = Database::open(&config.capture.database).context("Failed to open database")?;

    println!("Database: {}", config.capture.database);
    println!("  Devices:      {}", db.count_devices()?);
    println!("  Sightings:    {}", db.count_sightings()?);
    println!("  Fingerprints: {}", db.count_fingerprints()?);
    println!("  Identities:   {}", db.count_identities()?);
    Ok(())
}

fn handle_alias(config: Config, fingerprint: String, alias: String) -> Result<()> {
    let mut db = Database::open(&config.capture.database).context("Failed to open database")?;
    let identity_id = db.set_fingerprint_alias(&fingerprint, &alias)?;
    println!("Set alias {:?} on identity {}", alias, identity_id);
    Ok(())
}

fn handle_silence(config: Config, fingerprint: String) -> Result<()> {
    let db = Database::open(&config.capture.database).context("Failed to open database")?;
    db.disable_fingerprint_notifications(&fingerprint)?;
    println!("Notifications disabled for {}", fingerprint);
    Ok(())
}

fn handle_trust(config: Config, mac: String, name: Option<String>) -> Result<()> {
    let db = Database::open(&config.capture.database).context("Failed to open database")?;
    let mac = mac.to_lowercase();
    db.add_device(&mac, name.as_deref(), true)?;
    println!("{} marked trusted; its probes will be dropped on next capture start", mac);
    Ok(())
}
