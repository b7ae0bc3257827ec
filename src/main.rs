// Pipeline binary: one deadline-aware producer feeding a dispatching side over a
// bounded channel, with per-task latencies appended to a results log.
//
// A refused CPU reservation is fatal: the failure is logged and the process exits
// non-zero without emitting a single task. Every other failure only shows up in
// the log stream while the run continues to its sample budget.

use std::process;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use taskpipe::pipeline::{Pipeline, PipelineConfig};
use taskpipe::sched::SchedulingReservation;

/// Command-line options parsed from program arguments.
struct CliOptions {
    /// Scheduling policy for the producing side.
    reservation: SchedulingReservation,
    /// Tasks to emit and measure; `None` runs until Ctrl+C.
    samples: Option<u64>,
    /// Scenario identifier naming the channel and the results file.
    scenario: String,
    /// Channel capacity in undelivered messages.
    capacity: usize,
    /// Raise log verbosity to DEBUG.
    debug: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            reservation: defaults.reservation,
            samples: defaults.sample_count,
            scenario: defaults.scenario,
            capacity: defaults.capacity,
            debug: false,
        }
    }
}

fn parse_policy(value: &str) -> Option<SchedulingReservation> {
    match value.to_ascii_lowercase().as_str() {
        "deadline" | "edf" => Some(PipelineConfig::default().reservation),
        "rr" | "round-robin" | "round_robin" => {
            Some(SchedulingReservation::FixedPriorityRoundRobin { priority: None })
        }
        _ => None,
    }
}

/// Parse command-line arguments into `CliOptions`.
///
/// Supports `--flag=value` and `--flag value` forms:
/// - `--policy <deadline|rr>`: scheduling policy for the producer
/// - `--runtime-ms/--deadline-ms/--period-ms <n>`: deadline reservation parameters
/// - `--samples <n>`: sample budget; `0` means run until Ctrl+C
/// - `--scenario <name>`: run identifier (channel and results-file name)
/// - `--capacity <n>`: channel capacity
/// - `--debug`: verbose logging
fn parse_cli_options() -> CliOptions {
    let mut options = CliOptions::default();
    let mut runtime_ms: Option<u64> = None;
    let mut deadline_ms: Option<u64> = None;
    let mut period_ms: Option<u64> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut take_value = |inline: Option<String>| inline.or_else(|| args.next());
        match key.as_str() {
            "--policy" => {
                if let Some(value) = take_value(value) {
                    if let Some(reservation) = parse_policy(&value) {
                        options.reservation = reservation;
                    }
                }
            }
            "--runtime-ms" => runtime_ms = take_value(value).and_then(|v| v.parse().ok()),
            "--deadline-ms" => deadline_ms = take_value(value).and_then(|v| v.parse().ok()),
            "--period-ms" => period_ms = take_value(value).and_then(|v| v.parse().ok()),
            "--samples" => {
                if let Some(count) = take_value(value).and_then(|v| v.parse::<u64>().ok()) {
                    options.samples = if count == 0 { None } else { Some(count) };
                }
            }
            "--scenario" => {
                if let Some(name) = take_value(value) {
                    options.scenario = name;
                }
            }
            "--capacity" => {
                if let Some(capacity) = take_value(value).and_then(|v| v.parse().ok()) {
                    options.capacity = capacity;
                }
            }
            "--debug" => options.debug = true,
            _ => {}
        }
    }

    // Explicit reservation parameters refine the deadline policy.
    if let SchedulingReservation::Deadline {
        runtime,
        deadline,
        period,
    } = options.reservation
    {
        options.reservation = SchedulingReservation::Deadline {
            runtime: runtime_ms.map_or(runtime, Duration::from_millis),
            deadline: deadline_ms.map_or(deadline, Duration::from_millis),
            period: period_ms.map_or(period, Duration::from_millis),
        };
    }
    options
}

fn main() {
    let options = parse_cli_options();

    let default_level = if options.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = PipelineConfig {
        reservation: options.reservation,
        sample_count: options.samples,
        capacity: options.capacity,
        scenario: options.scenario,
        ..PipelineConfig::default()
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            error!(source = "main", %err, "invalid configuration");
            process::exit(1);
        }
    };

    let stop = pipeline.stop_flag();
    if let Err(err) = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed)) {
        error!(source = "main", %err, "failed to install signal handler");
        process::exit(1);
    }

    match pipeline.run() {
        Ok(report) => {
            info!(
                source = "main",
                sent = report.sent,
                received = report.samples.len(),
                results = %report.results_path.display(),
                "run finished"
            );
        }
        Err(err) => {
            error!(source = "main", %err, "pipeline failed");
            process::exit(1);
        }
    }
}
