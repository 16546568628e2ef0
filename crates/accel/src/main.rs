//! Accelerator firmware demo
//!
//! Runs the full accelerator lifecycle against the simulated board: power
//! up, DFU download of the runtime image, attach handshake, then a batch of
//! inference invocations through the manager.

use accel::sim::{SimBoard, SimOptions};
use accel::{AccelConfig, AcceleratorSystem, FirmwareImage};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use protocol::{Executable, ExecutableKind, PerformanceMode, encode_package};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "accel-firmware")]
#[command(
    author,
    version,
    about = "Accelerator firmware - bring up a USB inference accelerator and run packages"
)]
#[command(long_about = "
Drives a USB inference accelerator from power-off to running inference:
power sequencing, DFU download of the runtime image with read-back
verification, the vendor attach handshake and package execution.
This build runs against a simulated board.

EXAMPLES:
    # Run the built-in demo packages
    accel-firmware

    # Run compiled packages ten times each in max performance mode
    accel-firmware --package model.apkg --invocations 10 --mode max

    # Watch the DFU read-back check reject a corrupted image
    accel-firmware --corrupt-readback --log-level debug

CONFIGURATION:
    The firmware looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/accel-firmware/accel.toml
    3. /etc/accel-firmware/accel.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Compiled package to run (repeatable)
    #[arg(short, long, value_name = "PATH")]
    package: Vec<PathBuf>,

    /// Invocations per package
    #[arg(short = 'n', long, default_value_t = 3)]
    invocations: u32,

    /// Performance mode (low, medium, high, max)
    #[arg(short, long, default_value = "high")]
    mode: PerformanceMode,

    /// Make the simulated boot ROM serve a corrupted read-back
    #[arg(long)]
    corrupt_readback: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = AccelConfig::default();
        let path = AccelConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        AccelConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        AccelConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.firmware.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("Accelerator firmware v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    // Everything below blocks on task replies.
    tokio::task::spawn_blocking(move || run(config, args))
        .await
        .context("Workload thread panicked")?
}

fn run(config: AccelConfig, args: Args) -> Result<()> {
    let image = match config.firmware_path() {
        Some(path) => FirmwareImage::load(&path)?,
        None => {
            warn!("No runtime image configured, using a placeholder");
            FirmwareImage::placeholder(config.board.placeholder_image_size)
        }
    };

    let options = SimOptions {
        corrupt_readback: args.corrupt_readback,
        ..config.board.sim_options()
    };
    let board = SimBoard::start(options, config.tasks.queue_depth)
        .context("Failed to start simulated board")?;
    let system = AcceleratorSystem::start(&config, image, board.io())
        .context("Failed to start firmware tasks")?;
    board.bind(system.event_sink());

    let manager = system.manager();
    let Some(context) = manager.open_device(args.mode) else {
        error!(
            "Accelerator did not come up (attach {}, dfu {})",
            system.attach().state(),
            system.dfu().state()
        );
        return Err(anyhow!("failed to open the accelerator"));
    };
    info!("Opened accelerator {} in {} mode", context.device(), context.mode());

    let buffers = if args.package.is_empty() {
        demo_packages()?
    } else {
        args.package
            .iter()
            .map(|path| {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read package: {}", path.display()))?;
                Ok(&*Box::leak(bytes.into_boxed_slice()))
            })
            .collect::<Result<Vec<&'static [u8]>>>()?
    };

    for buffer in buffers {
        let Some(package) = manager.register_package(buffer) else {
            warn!("Skipping invalid package");
            continue;
        };

        for _ in 0..args.invocations {
            manager
                .invoke(&package, &context)
                .with_context(|| format!("Invocation of {} failed", package.key()))?;
        }
        info!("Ran {} {} time(s)", package.key(), args.invocations);
    }

    if let Some(temperature) = manager.get_temperature() {
        info!("Die temperature {:.1} C", temperature);
    }
    let cache = manager.cache_stats();
    info!(
        "Parameter cache: token {:?}, {} resident, {} eviction(s)",
        cache.token,
        cache.resident.len(),
        cache.evictions
    );

    drop(context);

    let stats = board.stats();
    info!(
        "Board: {} power cycle(s), {} enumeration(s), {} image(s) flashed, {} bytes down, {} bytes up",
        stats.power_cycles,
        stats.enumerations,
        stats.images_flashed,
        stats.bytes_downloaded,
        stats.bytes_uploaded
    );
    Ok(())
}

/// A stand-alone package and a cached-parameter pair sharing one token
fn demo_packages() -> Result<Vec<&'static [u8]>> {
    let stand_alone = encode_package(&[Executable {
        kind: ExecutableKind::StandAlone,
        caching_token: 0,
        instructions: &[0x10, 0x20, 0x30, 0x40],
        parameters: &[0xa5; 64],
    }])?;

    let cached = encode_package(&[
        Executable {
            kind: ExecutableKind::ParameterCaching,
            caching_token: 0x5eed,
            instructions: &[0x11, 0x22],
            parameters: &[0x5a; 256],
        },
        Executable {
            kind: ExecutableKind::ExecutionOnly,
            caching_token: 0x5eed,
            instructions: &[0x33, 0x44, 0x55],
            parameters: &[],
        },
    ])?;

    Ok(vec![
        &*Box::leak(stand_alone.into_boxed_slice()),
        &*Box::leak(cached.into_boxed_slice()),
    ])
}
