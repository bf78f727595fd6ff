//! Glitcher CLI - Command-line interface
//!
//! Runs parameter sweeps against the glitcher FPGA (or a simulated one) and
//! summarizes recorded results.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glitcher_core::cli::{print_exit_codes, CliResult, ExitCodes};
use glitcher_core::config::{AppConfig, LoggingConfig};
use glitcher_core::core::protocol::glitch::{encode_reset, encode_trigger_enable};
use glitcher_core::core::results::{hit_counts, read_records};
use glitcher_core::core::transport::list_ports;
use glitcher_core::{
    encode_config_packet, run_sweep, Channel, Combo, ComboList, ComboSource, DeviceSession,
    GridSweep, HitPredicate, JsonLinesSink, ParamRange, RandomSweep, SerialChannel, SerialConfig,
    SessionConfig, SimulatedDevice,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Glitcher CLI
#[derive(Parser, Debug)]
#[command(
    name = "glitcher",
    version,
    about = "Fault-injection parameter sweeps over a serial-attached glitcher",
    long_about = None
)]
struct Cli {
    /// Verbose output (wire traffic)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long, env = "GLITCHER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Parameters shared by `sweep` and `simulate`
#[derive(Args, Debug)]
struct SweepArgs {
    /// Trigger counts, START[:END[:STEP]]
    #[arg(long, default_value = "0")]
    trigger_count: ParamRange,

    /// Delays in cycles, START[:END[:STEP]]
    #[arg(long, default_value = "1:1000")]
    delay: ParamRange,

    /// Pulse durations in cycles, START[:END[:STEP]]
    #[arg(long, default_value = "1:10")]
    duration: ParamRange,

    /// Try only this many grid points, picked at random
    #[arg(long)]
    samples: Option<usize>,

    /// JSON file with an explicit list of combos (overrides the grid)
    #[arg(long, conflicts_with = "samples")]
    combos: Option<PathBuf>,

    /// Glitch output shorts VDD to ground
    #[arg(long)]
    crowbar: bool,

    /// Cut target power between attempts
    #[arg(long)]
    power_reset: bool,

    /// Shuffle combo order before sweeping
    #[arg(long)]
    randomize: bool,

    /// Seed for shuffling and sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Attempts per combo
    #[arg(long)]
    repeats: Option<u32>,

    /// Combos between progress reports
    #[arg(long)]
    progress_interval: Option<u32>,

    /// Stop after this many consecutive transport faults
    #[arg(long)]
    max_consecutive_faults: Option<u32>,

    /// Results file (JSON lines)
    #[arg(short = 'o', long)]
    results: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Sweep glitch parameters against a device
    Sweep {
        /// Serial port name (e.g., /dev/ttyUSB0)
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// Run a sweep against a simulated device
    Simulate {
        /// Delays the simulated target glitches at
        #[arg(long, default_value = "500:520")]
        hit_delay: ParamRange,

        /// Durations the simulated target glitches at
        #[arg(long, default_value = "3:5")]
        hit_duration: ParamRange,

        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// Return the device to its safe idle state
    Reset {
        /// Serial port name
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Glitch output shorts VDD to ground
        #[arg(long)]
        crowbar: bool,

        /// Cut target power between attempts
        #[arg(long)]
        power_reset: bool,
    },

    /// Print the bytes sent for one combo
    Encode {
        /// Trigger edges before arming
        #[arg(long, default_value = "0")]
        trigger_count: u32,

        /// Delay in cycles
        #[arg(long)]
        delay: u32,

        /// Pulse duration in cycles
        #[arg(long)]
        duration: u32,

        /// Glitch output shorts VDD to ground
        #[arg(long)]
        crowbar: bool,

        /// Cut target power between attempts
        #[arg(long)]
        power_reset: bool,
    },

    /// Summarize a results file by combo
    Report {
        /// Results file (defaults to the configured one)
        file: Option<PathBuf>,

        /// Show at most this many combos
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,
    },

    /// Print the exit code table
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return CliResult::from(e).to_exit_code();
        }
    };

    let _log_guard = init_logging(&cli, &config.logging);
    tracing::debug!("glitcher v{}", glitcher_core::VERSION);

    let result = run(&cli, config).await;
    match &result {
        CliResult::Success(Some(msg)) if !cli.quiet => println!("{}", msg),
        CliResult::Error(code, msg) => eprintln!("Error ({}): {}", code, msg),
        _ => {}
    }
    result.to_exit_code()
}

fn init_logging(
    cli: &Cli,
    logging: &LoggingConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut guard = None;
    let file_layer = logging
        .file_logging
        .then(|| logging.resolved_directory())
        .flatten()
        .and_then(|dir| match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&dir, "glitcher.log");
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard = Some(worker);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
            }
            Err(e) => {
                eprintln!("Cannot create log directory {}: {}", dir.display(), e);
                None
            }
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

async fn run(cli: &Cli, mut config: AppConfig) -> CliResult {
    match &cli.command {
        Commands::ListPorts => show_ports(),
        Commands::Sweep { port, baud, sweep } => {
            if let Some(baud) = baud {
                config.serial.baud_rate = *baud;
            }
            let (source, sink) = match prepare_sweep(&mut config, sweep) {
                Ok(prepared) => prepared,
                Err(result) => return result,
            };
            match SerialChannel::open(SerialConfig::new(port, config.serial.baud_rate)) {
                Ok(channel) => execute_sweep(channel, &config, source.as_ref(), sink).await,
                Err(e) => e.into(),
            }
        }
        Commands::Simulate {
            hit_delay,
            hit_duration,
            sweep,
        } => {
            let (source, sink) = match prepare_sweep(&mut config, sweep) {
                Ok(prepared) => prepared,
                Err(result) => return result,
            };
            let device =
                SimulatedDevice::new().with_hit(HitPredicate::window(*hit_delay, *hit_duration));
            execute_sweep(device, &config, source.as_ref(), sink).await
        }
        Commands::Reset {
            port,
            baud,
            crowbar,
            power_reset,
        } => {
            let baud = baud.unwrap_or(config.serial.baud_rate);
            let session_config = config
                .session
                .clone()
                .crowbar(config.session.crowbar || *crowbar)
                .power_reset(config.session.power_reset || *power_reset);
            match SerialChannel::open(SerialConfig::new(port, baud)) {
                Ok(channel) => match DeviceSession::new(channel, session_config).shutdown().await {
                    Ok(()) => CliResult::success(),
                    Err(e) => e.into(),
                },
                Err(e) => e.into(),
            }
        }
        Commands::Encode {
            trigger_count,
            delay,
            duration,
            crowbar,
            power_reset,
        } => {
            let session = SessionConfig::new().crowbar(*crowbar).power_reset(*power_reset);
            show_encoding(&Combo::new(*trigger_count, *delay, *duration), &session)
        }
        Commands::Report { file, top } => {
            let path = file.clone().unwrap_or_else(|| config.results.path.clone());
            show_report(&path, *top)
        }
        Commands::ExitCodes => {
            print_exit_codes();
            CliResult::success()
        }
    }
}

/// Apply flag overrides, then build the combo source and open the results file
fn prepare_sweep(
    config: &mut AppConfig,
    args: &SweepArgs,
) -> Result<(Box<dyn ComboSource>, JsonLinesSink), CliResult> {
    let session = &mut config.session;
    session.crowbar |= args.crowbar;
    session.power_reset |= args.power_reset;
    session.randomize |= args.randomize;
    if args.seed.is_some() {
        session.seed = args.seed;
    }
    if let Some(repeats) = args.repeats {
        session.repeats_per_combo = repeats;
    }
    if let Some(interval) = args.progress_interval {
        session.progress_interval = interval;
    }
    if args.max_consecutive_faults.is_some() {
        session.max_consecutive_faults = args.max_consecutive_faults;
    }
    if let Some(path) = &args.results {
        config.results.path = path.clone();
    }
    config.validate().map_err(CliResult::from)?;

    let source: Box<dyn ComboSource> = if let Some(path) = &args.combos {
        let list = load_combos(path)
            .map_err(|e| CliResult::error(ExitCodes::INVALID_ARGS, format!("{:#}", e)))?;
        Box::new(list)
    } else {
        let grid = GridSweep::new(args.trigger_count, args.delay, args.duration)
            .map_err(CliResult::from)?;
        match args.samples {
            Some(samples) => {
                let seed = config.session.seed.unwrap_or_else(rand::random);
                Box::new(RandomSweep::new(grid, samples, seed))
            }
            None => Box::new(grid),
        }
    };

    let sink = JsonLinesSink::open(&config.results.path).map_err(CliResult::from)?;
    tracing::info!("Recording results to {}", sink.path().display());

    Ok((source, sink))
}

fn load_combos(path: &Path) -> anyhow::Result<ComboList> {
    ComboList::load(path).with_context(|| format!("Cannot load combos from {}", path.display()))
}

async fn execute_sweep<C: Channel>(
    channel: C,
    config: &AppConfig,
    source: &dyn ComboSource,
    mut sink: JsonLinesSink,
) -> CliResult {
    let mut session = DeviceSession::new(channel, config.session.clone())
        .with_read_timeout(config.serial.read_timeout());

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!("Ctrl+C handler unavailable: {}", e);
    }

    match run_sweep(&mut session, &mut sink, source, cancel).await {
        Ok(summary) => CliResult::from_summary(&summary),
        Err(e) => e.into(),
    }
}

fn show_ports() -> CliResult {
    match list_ports() {
        Ok(ports) if ports.is_empty() => CliResult::success_with_message("No serial ports found."),
        Ok(ports) => {
            for port in &ports {
                println!("{} [{:?}]", port.port_name, port.port_type);
            }
            CliResult::success()
        }
        Err(e) => e.into(),
    }
}

fn show_encoding(combo: &Combo, session: &SessionConfig) -> CliResult {
    let packet = match encode_config_packet(combo, session.resting_power()) {
        Ok(packet) => packet,
        Err(e) => return e.into(),
    };
    let spaced = |bytes: &[u8]| {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    };

    println!("{}", combo);
    println!("  reset   {}", spaced(&[encode_reset(session.resting_power())]));
    println!("  config  {}", spaced(&packet));
    println!("  trigger {}", spaced(&[encode_trigger_enable(session.crowbar)]));
    println!("  idle    {}", spaced(&[encode_reset(session.safe_power())]));
    CliResult::success()
}

fn show_report(path: &Path, top: usize) -> CliResult {
    let records = match read_records(path) {
        Ok(records) => records,
        Err(e) => return e.into(),
    };

    let counts = hit_counts(&records);
    println!("{} results over {} combos in {}", records.len(), counts.len(), path.display());
    for (combo, hits) in counts.iter().take(top) {
        println!("  {:>5}  {}", hits, combo);
    }
    CliResult::success()
}
