//! Switchboard daemon entry point.
//!
//! Runs the switchboard application under the periodic dispatcher on a
//! simulated board, with signal handling, an optional simulated push button,
//! and fault reporting.

mod signals;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sb_common::config::DispatcherConfig;
use sb_common::pin::PinId;
use sb_common::tier::Tier;
use sb_runtime::realtime::init_realtime;
use sb_runtime::scheduler::{Dispatcher, DispatcherBuilder};
use sb_runtime::sim::SimBoard;
use sb_tasks::switchboard::SwitchBoard;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::signals::SignalHandler;

/// How long a simulated press holds the input low before release.
const PRESS_HOLD: Duration = Duration::from_millis(20);

/// Longest the edge simulator sleeps before rechecking the stop flag.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Switchboard daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "sb-daemon",
    about = "Switchboard daemon - fixed-rate periodic dispatcher with edge-triggered pulse output",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum base ticks to run (0 = infinite).
    #[arg(long, default_value = "0")]
    max_ticks: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Simulate a button press on the edge input at this interval (e.g. "750ms").
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    edge_every: Option<Duration>,

    /// Contact bounces per simulated press.
    #[arg(long, default_value = "3")]
    bounce: u32,

    /// Disable the 1 kHz tier (10 ms base tick).
    #[arg(long)]
    no_1khz: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting switchboard daemon");

    let mut config = load_config(&args)?;
    if args.no_1khz {
        config.run_1khz = false;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        base_hz = config.base_hz(),
        output = %config.switchboard.pulse_output,
        input = %config.switchboard.edge_input,
        "Configuration loaded"
    );

    let signals = SignalHandler::install().context("Failed to set up signal handlers")?;

    run_daemon(config, &args, signals)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("sb_daemon={level},sb_runtime={level},sb_tasks={level},sb_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_names(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `SWITCHBOARD_CONFIG` environment variable
/// 3. `/etc/switchboard/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<DispatcherConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return DispatcherConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("SWITCHBOARD_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from SWITCHBOARD_CONFIG");
            return DispatcherConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from SWITCHBOARD_CONFIG={env_path}"));
        }
        warn!(
            path = %env_path,
            "SWITCHBOARD_CONFIG set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/switchboard/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return DispatcherConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {path}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(DispatcherConfig::default())
}

/// Spawn the dispatcher thread and wait for it to finish.
fn run_daemon(config: DispatcherConfig, args: &Args, signals: SignalHandler) -> Result<()> {
    let board = SimBoard::new();
    let stop = signals.shutdown_flag();
    let max_ticks = (args.max_ticks > 0).then_some(args.max_ticks);

    let edge_sim = match args.edge_every {
        Some(every) => Some(spawn_edge_simulator(
            board.clone(),
            config.switchboard.edge_input,
            every,
            args.bounce,
            stop,
        )?),
        None => None,
    };

    let dispatch_thread = thread::Builder::new()
        .name("sb-dispatch".into())
        .stack_size(config.realtime.stack_size)
        .spawn(move || dispatch(&config, board, stop, max_ticks))
        .context("Failed to spawn dispatcher thread")?;

    let outcome = dispatch_thread
        .join()
        .map_err(|_| anyhow!("Dispatcher thread panicked"))?;

    let stopped_by = if signals.shutdown_requested() {
        "signal"
    } else {
        "dispatcher"
    };

    // Dispatch is over either way; release the button simulator
    signals.request_shutdown();
    if let Some(handle) = edge_sim {
        if handle.join().is_err() {
            warn!("Edge simulator thread panicked");
        }
    }

    info!(
        stopped_by,
        signals = signals.signal_count(),
        last_signal = ?signals.last_signal(),
        "Daemon shutdown complete"
    );
    outcome
}

/// Body of the dispatcher thread.
fn dispatch(
    config: &DispatcherConfig,
    mut board: SimBoard,
    stop: &'static AtomicBool,
    max_ticks: Option<u64>,
) -> Result<()> {
    init_realtime(&config.realtime).context("Real-time setup failed")?;

    let app = SwitchBoard::new(Box::new(board.indicators()), config.switchboard.clone());
    let mut dispatcher = DispatcherBuilder::new(app)
        .config(config.clone())
        .watchdog_timeout(config.watchdog_timeout)
        .on_watchdog_expire(on_watchdog_expired)
        .build();

    let result = dispatcher
        .initialize(&mut board)
        .and_then(|()| dispatcher.start())
        .and_then(|()| dispatcher.run(stop, max_ticks));

    log_final_stats(&dispatcher);

    if let Err(e) = result {
        if let (Some(report), Some(path)) = (dispatcher.last_fault(), &config.fault_report) {
            if let Err(write_err) = report.write_json(path) {
                error!(error = %write_err, "Failed to write fault report");
            }
        }
        return Err(e).context(format!("Dispatch stopped in state {}", dispatcher.state()));
    }

    Ok(())
}

/// The dispatcher stopped kicking the watchdog: a tier is stuck and will
/// never return, so exit the way a board would reset.
fn on_watchdog_expired() {
    error!("Watchdog expired: dispatcher hung, exiting");
    std::process::exit(2);
}

/// Press and release the edge input every `every` until `stop` is raised.
fn spawn_edge_simulator(
    board: SimBoard,
    pin: PinId,
    every: Duration,
    bounces: u32,
    stop: &'static AtomicBool,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("sb-edge-sim".into())
        .spawn(move || {
            info!(
                %pin,
                every = %humantime::format_duration(every),
                bounces,
                "Simulating button presses"
            );
            let mut next = Instant::now() + every;
            while !stop.load(Ordering::Acquire) {
                let now = Instant::now();
                if now < next {
                    // Short naps so a stop request is seen promptly
                    thread::sleep((next - now).min(STOP_POLL));
                    continue;
                }
                next += every;

                board.press(pin, bounces);
                thread::sleep(PRESS_HOLD.min(every / 2));
                board.release(pin);
            }
        })
        .context("Failed to spawn edge simulator thread")
}

fn log_final_stats(dispatcher: &Dispatcher<SwitchBoard>) {
    for tier in Tier::DISPATCH_ORDER {
        if !dispatcher.enabled_tiers().contains(tier) {
            continue;
        }
        let snapshot = dispatcher.metrics(tier).map(|m| m.snapshot());
        info!(
            %tier,
            invocations = dispatcher.counter(tier),
            mean_us = snapshot.and_then(|s| s.mean_ns).map_or(0, |ns| ns / 1000),
            max_us = snapshot.and_then(|s| s.max_ns).map_or(0, |ns| ns / 1000),
            p99_us = snapshot.and_then(|s| s.p99_ns).map_or(0, |ns| ns / 1000),
            overruns = snapshot.map_or(0, |s| s.overrun_count),
            "Tier statistics"
        );
    }

    match serde_json::to_string(&dispatcher.tasks().stats()) {
        Ok(json) => info!(
            ticks = dispatcher.tick(),
            resyncs = dispatcher.resyncs(),
            final_state = %dispatcher.state(),
            stats = %json,
            "Switchboard statistics"
        ),
        Err(e) => warn!(error = %e, "Failed to serialize statistics"),
    }
}
