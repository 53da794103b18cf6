//! CLI Entry Point for sonia-serial
//!
//! Small bench tool around the `sonia_common` serial transport:
//! - `list`: enumerate serial devices on the host
//! - `monitor`: stream lines from a port through a capture pipeline
//! - `send`: write a string and optionally wait for a reply line
//!
//! Port settings come from the configuration file (`config/sonia.toml` by
//! default, overridable with `SONIA_` environment variables); `--port` and
//! `--baud` override them.
//!
//! # Usage
//!
//! ```bash
//! sonia-serial list
//! sonia-serial monitor --port /dev/ttyUSB0 --baud 115200 --count 10
//! sonia-serial send --port /dev/ttyUSB0 "PING" --reply
//! ```

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sonia_common::config::{SerialConfig, SoniaConfig, DEFAULT_CONFIG_PATH};
use sonia_common::io::serial::{
    available_ports, PortKind, Serial, Timeout, DEFAULT_MAX_LINE_LENGTH,
};
use sonia_common::io::serial_frames::SerialLineSource;
use sonia_common::io::Capture;
use sonia_common::logging;
use sonia_common::pattern::Observer;
use tracing::info;

/// Line read budget used when the configuration leaves reads non-blocking.
const MONITOR_READ_TIMEOUT_MS: u32 = 100;

#[derive(Parser)]
#[command(name = "sonia-serial")]
#[command(about = "Inspect and exercise serial devices", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PortArgs {
    /// Device path (overrides the configuration)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate (overrides the configuration)
    #[arg(long)]
    baud: Option<u32>,

    /// End-of-line marker
    #[arg(long, default_value = "\n")]
    eol: String,
}

impl PortArgs {
    fn open(&self, base: &SerialConfig) -> Result<Serial> {
        let mut config = base.clone();
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.settings.baudrate = baud;
        }
        if config.port.is_empty() {
            bail!("no serial port configured; pass --port or set serial.port");
        }
        config
            .open()
            .with_context(|| format!("opening {}", config.port))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List serial devices present on this host
    List,

    /// Print lines received on a port
    Monitor {
        #[command(flatten)]
        port: PortArgs,

        /// Stop after this many lines
        #[arg(long)]
        count: Option<u64>,

        /// Maximum line rate in Hz (0 = unbounded)
        #[arg(long, default_value_t = 0.0)]
        rate: f64,
    },

    /// Write a string to a port
    Send {
        #[command(flatten)]
        port: PortArgs,

        /// Text to send; the end-of-line marker is appended
        text: String,

        /// Wait for one reply line and print it
        #[arg(long)]
        reply: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SoniaConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::List => list(),
        Commands::Monitor { port, count, rate } => monitor(&config, &port, count, rate),
        Commands::Send { port, text, reply } => send(&config, &port, &text, reply),
    }
}

fn list() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        match port.kind {
            PortKind::Usb {
                vid,
                pid,
                manufacturer,
                product,
                ..
            } => println!(
                "{}  USB {vid:04x}:{pid:04x} {} {}",
                port.path,
                manufacturer.unwrap_or_default(),
                product.unwrap_or_default()
            ),
            PortKind::Pci => println!("{}  PCI", port.path),
            PortKind::Bluetooth => println!("{}  Bluetooth", port.path),
            PortKind::Unknown => println!("{}", port.path),
        }
    }
    Ok(())
}

fn monitor(config: &SoniaConfig, args: &PortArgs, count: Option<u64>, rate: f64) -> Result<()> {
    let serial = Arc::new(args.open(&config.serial)?);
    if serial.timeout() == Timeout::default() {
        serial.set_timeout(Timeout::simple(MONITOR_READ_TIMEOUT_MS));
    }
    info!(port = %serial.port(), settings = %serial.settings(), "monitoring");

    let source = SerialLineSource::new(Arc::clone(&serial)).with_eol(args.eol.clone());
    let capture = Capture::new("monitor", source);
    capture.set_max_framerate(rate)?;

    let (tx, rx) = mpsc::channel::<String>();
    let printer = Observer::from_fn(move |line: &String| {
        if !line.is_empty() {
            tx.send(line.clone())?;
        }
        Ok(())
    });
    printer.observe(capture.subject())?;

    capture.set_streaming_mode(true);
    capture.start()?;

    let mut received = 0u64;
    for line in rx {
        print!("{line}");
        if !line.ends_with(&args.eol) {
            println!();
        }
        received += 1;
        if count.is_some_and(|limit| received >= limit) {
            break;
        }
    }
    capture.stop();
    Ok(())
}

fn send(config: &SoniaConfig, args: &PortArgs, text: &str, reply: bool) -> Result<()> {
    let serial = args.open(&config.serial)?;
    let payload = format!("{text}{}", args.eol);
    let written = serial.write_str(&payload)?;
    if written < payload.len() {
        bail!("short write: {written} of {} bytes", payload.len());
    }
    info!(port = %serial.port(), bytes = written, "sent");

    if reply {
        let line = serial.read_line(DEFAULT_MAX_LINE_LENGTH, &args.eol)?;
        if line.is_empty() {
            bail!("no reply before timeout");
        }
        print!("{line}");
    }
    Ok(())
}
