//! open-deck CLI: HID discovery and Stream Deck control from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use open_deck_core::comm::check_device_status;
use open_deck_core::config::TransportConfig;
use open_deck_core::deck::{pressed_keys, StreamDeck};
use open_deck_core::platform::HidHost;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "open-deck",
    version,
    about = "Open-source HID discovery and Stream Deck control"
)]
struct Cli {
    /// Transport configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected HID interfaces.
    List {
        /// Vendor ID filter (decimal or 0x-prefixed hex; 0 matches any).
        #[arg(long, value_parser = parse_id)]
        vid: Option<u16>,
        /// Product ID filter (decimal or 0x-prefixed hex; 0 matches any).
        #[arg(long, value_parser = parse_id)]
        pid: Option<u16>,
        /// Print identities as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the first connected Stream Deck.
    Info,
    /// Set display brightness (0-100 percent).
    Brightness {
        /// Brightness in percent; larger values are clamped to 100.
        percent: u8,
    },
    /// Show the logo screen and clear every key.
    Reset,
    /// Print pressed keys as input reports arrive.
    Keys {
        /// Number of reads before exiting.
        #[arg(long, default_value_t = 10)]
        polls: u32,
    },
    /// Upload a pre-encoded image to one key.
    SetKey {
        /// Key index, row-major from the top left.
        key: usize,
        /// Image file, already encoded for the model (JPEG on V2 decks).
        file: PathBuf,
    },
    /// Dump the firmware feature report.
    Feature,
}

fn parse_id(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid id '{s}': {e}"))
}

#[cfg_attr(not(windows), allow(dead_code))]
fn load_config(path: Option<&Path>) -> Result<TransportConfig> {
    match path {
        Some(path) => TransportConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(TransportConfig::default()),
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg_attr(not(windows), allow(dead_code))]
fn run<H: HidHost>(host: &H, cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List { vid, pid, json } => {
            let devices = open_deck_core::enumerate::discover(
                host,
                vid.unwrap_or(config.vendor_id),
                pid.unwrap_or(config.product_id),
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No HID interfaces found.");
            } else {
                for dev in &devices {
                    println!(
                        "{} (VID: 0x{:04X}, PID: 0x{:04X}, bus: {}, interface: {}, path: {})",
                        dev.display_name(),
                        dev.vendor_id,
                        dev.product_id,
                        dev.bus_type,
                        dev.interface_number,
                        dev.path
                    );
                }
            }
        }
        Commands::Info => {
            let deck = StreamDeck::open(host, &config)?;
            let layout = deck.layout();
            let identity = deck.handle().identity().clone();
            println!("Model: {}", deck.model());
            println!("  Serial: {}", identity.serial_number);
            println!("  Keys: {} ({}x{})", layout.key_count(), layout.rows, layout.cols);
            println!("  Path: {}", identity.path);
            match deck.firmware_version() {
                Ok(version) => println!("  Firmware: {version}"),
                Err(e) => println!("  Firmware: unavailable ({e})"),
            }
            println!("  Status: {:?}", check_device_status(&deck));
            deck.close();
        }
        Commands::Brightness { percent } => {
            let deck = StreamDeck::open(host, &config)?;
            deck.set_brightness(percent)?;
            println!(
                "Brightness set to {}%",
                open_deck_core::safety::clamp_brightness(percent)
            );
            deck.close();
        }
        Commands::Reset => {
            let deck = StreamDeck::open(host, &config)?;
            deck.reset()?;
            println!("{} reset", deck.model());
            deck.close();
        }
        Commands::Keys { polls } => {
            let deck = StreamDeck::open(host, &config)?;
            for _ in 0..polls {
                match deck.read_key_states()? {
                    Some(mask) => println!("Pressed: {:?}", pressed_keys(mask)),
                    None => println!("(no report within {} ms)", config.read_timeout_ms),
                }
            }
            deck.close();
        }
        Commands::SetKey { key, file } => {
            let image = std::fs::read(&file)
                .with_context(|| format!("reading image {}", file.display()))?;
            let deck = StreamDeck::open(host, &config)?;
            let chunks = deck.set_key_image(key, &image)?;
            println!("Key {key} image sent in {chunks} report(s)");
            deck.close();
        }
        Commands::Feature => {
            let deck = StreamDeck::open(host, &config)?;
            let report = deck.firmware_report()?;
            println!("{}", hex(&report));
            deck.close();
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    #[cfg(windows)]
    {
        run(&open_deck_core::native_host(), cli)
    }

    #[cfg(not(windows))]
    {
        let _ = cli;
        anyhow::bail!("no native HID host backend on this platform")
    }
}
