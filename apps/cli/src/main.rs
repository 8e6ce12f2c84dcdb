use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use v2midi_core::firmware::{FirmwareIndex, TransferState, index_url};
use v2midi_core::ports::{DeviceDescriptor, DeviceFilter, find_by_name};
use v2midi_core::session::{DeviceSession, SessionConfig};
use v2midi_core::{
    DeviceEvent, DeviceObserver, DeviceSnapshot, FirmwareImage, MidiBackend, Severity,
    TracingObserver,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Configure and update MIDI devices", long_about = None)]
struct Args {
    /// Session configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List MIDI devices
    List {
        /// Include unpaired inputs and output-only devices
        #[arg(long)]
        all: bool,
    },
    /// Print the device state as JSON
    Info { device: String },
    /// Write configuration values, e.g. '{"midi": {"channel": 2}}'
    Configure { device: String, json: String },
    /// Send a raw JSON message
    Send { device: String, json: String },
    /// Reboot the device
    Reboot {
        device: String,
        /// Request the number of ports the device announces
        #[arg(long)]
        ports: bool,
    },
    /// Erase the configuration and reboot
    Erase { device: String },
    /// Install a firmware image
    Update {
        device: String,
        file: PathBuf,
        /// Install even if the image looks wrong for the device
        #[arg(long)]
        force: bool,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Show the metadata of a firmware image
    Inspect { file: PathBuf },
    /// List the images of a firmware index file
    Index {
        file: PathBuf,
        /// Only this firmware id
        #[arg(long)]
        id: Option<String>,
        /// Only this board
        #[arg(long)]
        board: Option<String>,
        /// Download location to resolve image URLs against
        #[arg(long)]
        base: Option<String>,
    },
    /// Stay connected and print incoming notes and controllers
    Monitor {
        /// Device to follow; defaults to the configured auto-connect name
        device: Option<String>,
    },
    /// Write the active configuration to a TOML file
    SaveConfig { file: PathBuf },
}

/// Prints progress and notices, logs everything else.
struct ConsoleObserver;

impl DeviceObserver for ConsoleObserver {
    fn on_event(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::Progress { offset, total } => {
                let pct = if *total > 0 { offset * 100 / total } else { 0 };
                eprint!("\rUpdating firmware: {:3}%", pct);
                if offset == total {
                    eprintln!();
                }
            }
            DeviceEvent::Notice { severity, message } => println!("[{}] {}", severity, message),
            DeviceEvent::Midi(message) => println!("{}", message),
            other => TracingObserver.on_event(other),
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Unable to load {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match args.command {
        Command::List { all } => list(config, all),
        Command::Info { device } => {
            let mut session = open_session(config)?;
            let snapshot = connect(&mut session, &device)?;
            println!("{}", serde_json::to_string_pretty(&snapshot.to_value())?);
            session.disconnect();
            Ok(())
        }
        Command::Configure { device, json } => {
            let configuration: serde_json::Value =
                serde_json::from_str(&json).context("Invalid configuration JSON")?;
            let mut session = open_session(config)?;
            connect(&mut session, &device)?;
            session.write_configuration(configuration)?;
            let timeout = session.config().write_timeout() + Duration::from_millis(500);
            session.run_until(timeout, |s| !s.is_write_pending());
            session.disconnect();
            Ok(())
        }
        Command::Send { device, json } => {
            let mut session = open_session(config)?;
            connect(&mut session, &device)?;
            session.send_json(&json)?;
            session.run_until(session.config().write_timeout(), |_| false);
            if let Some(snapshot) = session.snapshot() {
                println!("{}", serde_json::to_string_pretty(&snapshot.to_value())?);
            }
            session.disconnect();
            Ok(())
        }
        Command::Reboot { device, ports } => {
            let mut session = open_session(config)?;
            connect(&mut session, &device)?;
            if ports {
                session.send_reboot_with_ports()?;
            } else {
                session.send_reboot()?;
            }
            info!("Reboot requested");
            Ok(())
        }
        Command::Erase { device } => {
            let mut session = open_session(config)?;
            connect(&mut session, &device)?;
            session.erase_configuration()?;
            info!("Configuration erased");
            Ok(())
        }
        Command::Update {
            device,
            file,
            force,
            timeout,
        } => update(config, &device, &file, force, Duration::from_secs(timeout)),
        Command::Inspect { file } => inspect(&file),
        Command::Index {
            file,
            id,
            board,
            base,
        } => index(&file, id.as_deref(), board.as_deref(), base.as_deref()),
        Command::Monitor { device } => monitor(config, device),
        Command::SaveConfig { file } => {
            config.save_to_file(&file)?;
            info!(path = %file.display(), "Configuration saved");
            Ok(())
        }
    }
}

#[cfg(feature = "midir")]
fn open_session(
    config: SessionConfig,
) -> Result<DeviceSession<v2midi_core::MidirBackend, ConsoleObserver>> {
    let backend = v2midi_core::MidirBackend::new(config.client_name.clone());
    Ok(DeviceSession::with_observer(backend, config, Arc::new(ConsoleObserver)))
}

#[cfg(not(feature = "midir"))]
fn open_session(
    _config: SessionConfig,
) -> Result<DeviceSession<v2midi_core::MockBackend, ConsoleObserver>> {
    bail!("v2midi was built without MIDI support, rebuild with `--features midir`")
}

fn list(config: SessionConfig, all: bool) -> Result<()> {
    let mut session = open_session(config)?;
    session.refresh_ports()?;
    let filter = if all { DeviceFilter::All } else { DeviceFilter::Paired };

    let devices = session.devices(filter);
    if devices.is_empty() {
        println!("No devices found.");
    }
    for device in devices {
        let kind = match (&device.input, &device.output) {
            (Some(_), Some(_)) => "",
            (Some(_), None) => " (input only)",
            _ => " (output only)",
        };
        println!("{}{}", device.name, kind);
    }
    Ok(())
}

fn find_device<B: MidiBackend, O: DeviceObserver>(
    session: &mut DeviceSession<B, O>,
    name: &str,
) -> Result<DeviceDescriptor> {
    session.refresh_ports()?;
    let devices = session.devices(DeviceFilter::Paired);
    find_by_name(&devices, name)
        .or_else(|| devices.iter().find(|d| d.id == name))
        .cloned()
        .with_context(|| format!("No device named '{}'", name))
}

/// Connect and wait for the first snapshot.
fn connect<B: MidiBackend, O: DeviceObserver>(
    session: &mut DeviceSession<B, O>,
    name: &str,
) -> Result<DeviceSnapshot> {
    let device = find_device(session, name)?;
    session.connect(&device)?;

    let timeout = session.config().connect_timeout() + Duration::from_millis(500);
    session.run_until(timeout, |s| s.snapshot().is_some() || s.device().is_none());
    session
        .snapshot()
        .cloned()
        .with_context(|| format!("No response from '{}'", device.name))
}

fn update(
    config: SessionConfig,
    name: &str,
    file: &Path,
    force: bool,
    timeout: Duration,
) -> Result<()> {
    let image = FirmwareImage::load(file)
        .with_context(|| format!("Unable to load {}", file.display()))?;

    let mut session = open_session(config)?;
    let snapshot = connect(&mut session, name)?;

    let assessment = image.assess(&snapshot);
    println!("[{}] {}", assessment.severity(), assessment);
    if assessment.severity() == Severity::Error {
        bail!("Refusing to install firmware for another board");
    }
    if !assessment.is_installable() && !force {
        bail!("Use --force to install anyway");
    }

    session.start_firmware_update(image)?;
    session.run_until(timeout, |s| {
        s.device().is_none() || matches!(s.transfer_state(), Some(TransferState::Failed { .. }))
    });

    match session.transfer_state() {
        Some(TransferState::Done) => Ok(()),
        Some(TransferState::Failed { offset }) => bail!("Firmware update failed at offset {}", offset),
        _ => bail!("Firmware update did not complete"),
    }
}

/// Poll the ports and keep the device connected across replugs.
fn monitor(mut config: SessionConfig, device: Option<String>) -> Result<()> {
    if device.is_some() {
        config.auto_connect = device;
    }
    let Some(name) = config.auto_connect.clone() else {
        bail!("No device given and no auto-connect name configured");
    };

    let poll = config.port_poll_interval();
    let mut session = open_session(config)?;
    info!(device = %name, "Waiting for device, press Ctrl-C to stop");
    loop {
        session.refresh_ports()?;
        if session.auto_connect()? {
            info!(device = %name, "Connecting");
        }
        session.wait(poll);
    }
}

fn inspect(file: &Path) -> Result<()> {
    let image = FirmwareImage::load(file)
        .with_context(|| format!("Unable to load {}", file.display()))?;
    let metadata = image.metadata();

    println!("Firmware: {}", metadata.id);
    if let Some(board) = &metadata.board {
        println!("Board:    {}", board);
    }
    println!("Version:  {}", metadata.version);
    println!("Size:     {} bytes", image.len());
    println!("SHA-1:    {}", image.hash());
    Ok(())
}

fn index(file: &Path, id: Option<&str>, board: Option<&str>, base: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Unable to read {}", file.display()))?;
    let index = FirmwareIndex::from_json(&text)?;
    if let Some(base) = base {
        info!(url = %index_url(base), "Index location");
    }

    let ids: Vec<&str> = match id {
        Some(id) => vec![id],
        None => index.firmware_ids().collect(),
    };
    for id in ids {
        println!("{}", id);
        for entry in index.updates_for(id, board) {
            let location = match base {
                Some(base) => entry.url(base),
                None => entry.file.clone(),
            };
            println!(
                "  {:>6}  {:<16} {}",
                entry.version,
                entry.board.as_deref().unwrap_or("-"),
                location
            );
        }
    }
    Ok(())
}
