//! BMU host simulator: Main Entry Point
//!
//! Runs the application core against a simulated cell stack, with a
//! background thread standing in for the 1 kHz timer interrupt.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SimulatedPack          LogEventSink / JSON lines  MemoryStore │
//! │  (Measurement+Balancing (EventSink)                (Storage)   │
//! │   +Fault+Protection)                                           │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (pure logic)                   │    │
//! │  │  FSM · Safety · Cells · Balancing · Aging              │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  TickCountdown (static) ◀── timer thread                       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

// ── Imports ───────────────────────────────────────────────────
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use bmu::adapters::log_sink::LogEventSink;
use bmu::adapters::memory_store::MemoryStore;
use bmu::adapters::sim_pack::{LoadProfile, SimulatedPack};
use bmu::app::commands::AppCommand;
use bmu::app::events::AppEvent;
use bmu::app::ports::{EventSink, StoragePort};
use bmu::app::service::AppService;
use bmu::config::BmuConfig;
use bmu::estimation::aging::{AGING_KEY, AGING_NAMESPACE, AGING_RECORD_MAX_BYTES};
use bmu::fsm::StateId;
use bmu::tick_timer::TickCountdown;

// ── Timer ─────────────────────────────────────────────────────

static COUNTDOWN: TickCountdown = TickCountdown::new();
static TIMER_RUNNING: AtomicBool = AtomicBool::new(true);

/// Decrement the countdown once per simulated millisecond.
fn spawn_tick_timer(speed: u32) -> thread::JoinHandle<()> {
    let period = Duration::from_micros(1000 / u64::from(speed.max(1)));
    thread::spawn(move || {
        while TIMER_RUNNING.load(Ordering::Acquire) {
            thread::sleep(period);
            COUNTDOWN.on_timer_interrupt();
        }
    })
}

// ── Command line ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    Discharge,
    Charge,
    Cycle,
}

impl From<Profile> for LoadProfile {
    fn from(p: Profile) -> Self {
        match p {
            Profile::Discharge => Self::Discharge,
            Profile::Charge => Self::Charge,
            Profile::Cycle => Self::Cycle,
        }
    }
}

/// Simulate a series Li-ion pack under the BMU core.
#[derive(Debug, Parser)]
#[command(name = "bmu-sim", version)]
struct Args {
    /// JSON configuration file; missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cells in series (7 or 14).  Overrides the configuration file.
    #[arg(long)]
    cells: Option<u8>,

    /// Control ticks to run.
    #[arg(long, default_value_t = 3000)]
    ticks: u64,

    /// Load current profile.
    #[arg(long, value_enum, default_value_t = Profile::Cycle)]
    profile: Profile,

    /// Load current magnitude (mA).
    #[arg(long, default_value_t = 2500)]
    load_ma: i32,

    /// Initial state of charge of the simulated cells (0.0 ..= 1.0).
    #[arg(long, default_value_t = 0.6)]
    soc: f64,

    /// Initial SOC spread between neighbouring cells.
    #[arg(long, default_value_t = 0.02)]
    spread: f64,

    /// Turn balancing on at startup.
    #[arg(long)]
    balancing: bool,

    /// Emit events as JSON lines on stdout instead of log records.
    #[arg(long)]
    json: bool,

    /// Make conversions fail starting at this conversion index.
    #[arg(long)]
    fail_at: Option<u64>,

    /// Number of consecutive failing conversions.
    #[arg(long, default_value_t = 3)]
    fail_count: u64,

    /// Acknowledge a fault after this many ticks in `Fault`.
    #[arg(long)]
    ack_after: Option<u64>,

    /// File holding the aging record between runs.
    #[arg(long)]
    aging_file: Option<PathBuf>,

    /// Simulation speed relative to real time.
    #[arg(long, default_value_t = 100)]
    speed: u32,
}

// ── Event sinks ───────────────────────────────────────────────

/// One JSON object per event on stdout.
struct JsonLinesSink {
    out: std::io::Stdout,
}

impl EventSink for JsonLinesSink {
    fn emit(&mut self, event: &AppEvent) {
        match serde_json::to_string(event) {
            Ok(line) => {
                if let Err(e) = writeln!(self.out.lock(), "{}", line) {
                    warn!("stdout write failed: {}", e);
                }
            }
            Err(e) => warn!("event serialisation failed: {}", e),
        }
    }
}

enum SimSink {
    Log(LogEventSink),
    Json(JsonLinesSink),
}

impl EventSink for SimSink {
    fn emit(&mut self, event: &AppEvent) {
        match self {
            Self::Log(s) => s.emit(event),
            Self::Json(s) => s.emit(event),
        }
    }
}

// ── Configuration and persistence ─────────────────────────────

fn load_config(args: &Args) -> Result<BmuConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => BmuConfig::default(),
    };
    if let Some(cells) = args.cells {
        config.cell_count = cells;
        config.max_balanced_cells = config.max_balanced_cells.min(cells);
        if config.reference_cell >= cells {
            config.reference_cell = 0;
        }
    }
    Ok(config)
}

fn load_aging_file(path: &Path, store: &mut MemoryStore) -> Result<()> {
    if !path.exists() {
        info!("No aging file at {}", path.display());
        return Ok(());
    }
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if let Err(e) = store.write(AGING_NAMESPACE, AGING_KEY, &bytes) {
        bail!("staging aging record: {}", e);
    }
    Ok(())
}

fn save_aging_file(path: &Path, store: &MemoryStore) -> Result<()> {
    let mut buf = [0u8; AGING_RECORD_MAX_BYTES];
    match store.read(AGING_NAMESPACE, AGING_KEY, &mut buf) {
        Ok(len) => {
            fs::write(path, &buf[..len]).with_context(|| format!("writing {}", path.display()))?;
            info!("Aging record written to {}", path.display());
        }
        Err(e) => info!("No aging record to write ({})", e),
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("╔══════════════════════════════════════╗");
    info!("║  BMU simulator v{}                ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 1. Configuration ──────────────────────────────────────
    let config = load_config(&args)?;
    let mut app = AppService::new(config.clone()).context("invalid configuration")?;

    // ── 2. Adapters ───────────────────────────────────────────
    let mut pack = SimulatedPack::with_spread(&config, args.soc, args.spread);
    if let Some(from) = args.fail_at {
        pack.fail_conversions(from, args.fail_count);
    }
    let mut store = MemoryStore::new();
    if let Some(path) = &args.aging_file {
        load_aging_file(path, &mut store)?;
    }
    let mut sink = if args.json {
        SimSink::Json(JsonLinesSink { out: std::io::stdout() })
    } else {
        SimSink::Log(LogEventSink::new())
    };

    // ── 3. Start ──────────────────────────────────────────────
    let timer = spawn_tick_timer(args.speed);
    app.start(&mut pack, &mut sink).context("initial conversion failed")?;
    app.restore_aging(&store);
    if args.balancing {
        app.handle_command(AppCommand::SetBalancing(true), &mut pack)
            .context("enabling balancing")?;
    }

    // ── 4. Control loop ───────────────────────────────────────
    let profile = LoadProfile::from(args.profile);
    let mut ticks_in_fault: u64 = 0;
    for tick in 0..args.ticks {
        pack.set_load_ma(profile.current_ma(tick, args.load_ma));
        if let Err(e) = app.run_cycle(&COUNTDOWN, &mut pack, &mut sink) {
            warn!("Tick {} failed: {}", tick, e);
        }

        if app.state() == StateId::Fault {
            ticks_in_fault += 1;
            if args.ack_after.is_some_and(|n| ticks_in_fault >= n) {
                app.handle_command(AppCommand::AcknowledgeFault, &mut pack)?;
                ticks_in_fault = 0;
            }
        } else {
            ticks_in_fault = 0;
        }

        app.save_aging_if_needed(&mut store);
    }

    TIMER_RUNNING.store(false, Ordering::Release);
    if timer.join().is_err() {
        warn!("Timer thread panicked");
    }

    // ── 5. Summary ────────────────────────────────────────────
    let telemetry = app.build_telemetry();
    let soc_min = telemetry.soc_permille.iter().min().copied().unwrap_or(0);
    let soc_max = telemetry.soc_permille.iter().max().copied().unwrap_or(0);
    info!(
        "Done: {} ticks, state={:?}, SOC {}..{}\u{2030}, EFC={:.3}",
        app.tick_count(),
        app.state(),
        soc_min,
        soc_max,
        app.aggregate().efc_counter
    );

    if let Some(path) = &args.aging_file {
        save_aging_file(path, &store)?;
    }
    Ok(())
}
