//! # CNC Motion Simulator
//!
//! Runs the motion core against simulated hardware on a simulated clock.
//!
//! - The job file (`--job`) plays the part of the program producer.
//! - Bytes on stdin are fed to the realtime dispatcher the way a serial
//!   receive interrupt would (`!` feed hold, `~` cycle start, `?` status,
//!   0x18 reset, override bytes...).
//! - Ctrl-C requests a reset and ends the job.
//!
//! Reports are printed to stdout as JSON lines; logs go to stderr.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use cnc_common::config::{ConfigLoader, LogLevel};
use cnc_common::consts::DEFAULT_CONFIG_PATH;
use cnc_common::realtime::RealtimeCommand;
use cnc_motion::config::{ControllerConfig, load_config};
use cnc_motion::controller::{Controller, PollObserver};
use cnc_motion::error::ControlError;
use cnc_motion::job::Job;
use cnc_motion::realtime::{ByteDisposition, RealtimeHandle};
use cnc_motion::report::Report;
use cnc_motion::sim::SimHal;
use cnc_motion::system::ExecState;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// CNC motion core simulator
#[derive(Parser, Debug)]
#[command(name = "cnc_motion")]
#[command(version)]
#[command(about = "Run a job through the motion core on simulated hardware")]
struct Args {
    /// Path to the machine configuration TOML.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Path to a job TOML. Without one the controller only powers up.
    #[arg(long)]
    job: Option<PathBuf>,

    /// Pace the simulated clock to wall-clock time.
    #[arg(long)]
    pace: bool,

    /// Emit a status report every N polls (0 = only on request).
    #[arg(long, default_value_t = 0)]
    status_every: u32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let config = load_config(&args.config);
    let log_level = config
        .as_ref()
        .map_or(LogLevel::default(), |config| config.shared.log_level);
    setup_tracing(&args, log_level);

    info!("CNC motion simulator v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = config
        .map_err(Into::into)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("CNC motion simulator shutdown complete");
}

fn run(args: &Args, config: ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        path = %args.config.display(),
        machine = %config.shared.machine_name,
        "Config OK"
    );
    let pulse_hz = config.timing.pulse_frequency_hz;

    let job = match &args.job {
        Some(path) => {
            let job = Job::load(path)?;
            info!(name = %job.name, steps = job.steps.len(), "Job loaded");
            job
        }
        None => Job::default(),
    };

    let mut controller = Controller::new(config, SimHal::new())?;
    let realtime = controller.realtime();
    controller.set_observer(Box::new(ReportPrinter::new(
        realtime.clone(),
        args.status_every,
        args.pace.then_some(pulse_hz),
    )));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let realtime = realtime.clone();
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            realtime.execute(RealtimeCommand::Reset);
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }
    spawn_serial_reader(realtime);

    for (index, step) in job.steps.iter().enumerate() {
        if shutdown.load(Ordering::SeqCst) {
            warn!(step = index, "Job interrupted");
            break;
        }
        debug!(step = index, ?step, "Executing");
        if let Err(err) = step.execute(&mut controller) {
            warn!(step = index, %err, "Step failed");
            if let Some(code) = err.status_code() {
                print_report(&Report::error(code));
            }
            if matches!(err, ControlError::Aborted | ControlError::Locked(_)) {
                break;
            }
        }
    }

    if let Err(err) = controller.buffer_synchronize() {
        warn!(%err, "Final synchronize cut short");
    }
    for report in controller.drain_reports() {
        print_report(&report);
    }
    print_report(&Report::Status(controller.snapshot()));

    info!(
        state = controller.state().name(),
        seconds = controller.elapsed_seconds(),
        pulses = controller.hal().total_pulses(),
        "Job finished"
    );
    Ok(())
}

/// Feed stdin to the realtime dispatcher, one byte at a time.
fn spawn_serial_reader(realtime: RealtimeHandle) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for byte in stdin.lock().bytes() {
            let Ok(byte) = byte else {
                break;
            };
            // Program text has no consumer here; only realtime bytes matter.
            if let ByteDisposition::Realtime(command) = realtime.dispatch_byte(byte) {
                debug!(?command, "Realtime command");
            }
        }
    });
}

fn print_report(report: &Report) {
    match serde_json::to_string(report) {
        Ok(line) => {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{line}");
        }
        Err(e) => warn!("Report serialization failed: {e}"),
    }
}

/// Streams reports after every poll, requests periodic status and paces
/// the simulated clock.
struct ReportPrinter {
    realtime: RealtimeHandle,
    status_every: u32,
    polls: u32,
    pace: Option<(Instant, u32)>,
}

impl ReportPrinter {
    fn new(realtime: RealtimeHandle, status_every: u32, pace_hz: Option<u32>) -> Self {
        Self {
            realtime,
            status_every,
            polls: 0,
            pace: pace_hz.map(|hz| (Instant::now(), hz)),
        }
    }
}

impl PollObserver for ReportPrinter {
    fn after_poll(&mut self, elapsed_ticks: u64, reports: &mut dyn Iterator<Item = Report>) {
        for report in reports {
            print_report(&report);
        }

        if self.status_every > 0 {
            self.polls += 1;
            if self.polls >= self.status_every {
                self.polls = 0;
                self.realtime
                    .system()
                    .exec_state
                    .set(ExecState::STATUS_REPORT);
            }
        }

        if let Some((start, hz)) = self.pace {
            let simulated = Duration::from_secs_f64(elapsed_ticks as f64 / f64::from(hz));
            if let Some(ahead) = simulated.checked_sub(start.elapsed()) {
                thread::sleep(ahead);
            }
        }
    }
}

/// Setup tracing subscriber. `RUST_LOG` wins, then `--verbose`, then the
/// configured log level.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let default_directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        log_level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
