mod config;
mod logging;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use vdb_client::{RunOrchestrator, RunSnapshot, ServiceClient, TransportError};
use vdb_core::vcd::{self, DEFAULT_TRACE_WINDOW};
use vdb_core::wire::{DEFAULT_MAX_ITERATIONS, DEFAULT_TESTGEN_ITERATIONS};
use vdb_core::{replay, CaptureRequest, CaptureState, CreateRunRequest, RunMode, RunStatus};

use crate::config::{config_path, load_config, Overrides, Settings};
use crate::render::DEFAULT_WAVE_COLUMNS;

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "vdb", version, about = "Drive and inspect remote hardware verification runs")]
struct Cli {
    /// Service root, e.g. http://127.0.0.1:8080
    #[arg(long, global = true)]
    server: Option<String>,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Timeout for one-shot requests, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Fail a run whose stream stays silent this many seconds
    #[arg(long, global = true)]
    stall_timeout: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start an optimization run and follow it to the end
    Optimize {
        #[arg(long)]
        design: PathBuf,
        #[arg(long)]
        testbench: PathBuf,
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Emit one JSON snapshot per change instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Start a test-generation run and follow it to the end
    Testgen {
        #[arg(long)]
        design: PathBuf,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Poll a run's history and rebuild its record
    Status {
        run_id: String,
        #[arg(long, default_value = "optimize")]
        mode: RunMode,
        #[arg(long)]
        json: bool,
    },
    /// Simulate with waveform capture and draw the result
    Capture {
        #[arg(long)]
        design: PathBuf,
        #[arg(long)]
        testbench: PathBuf,
        /// Cursor position for the value readout
        #[arg(long)]
        at: Option<u64>,
        #[arg(long, default_value_t = DEFAULT_WAVE_COLUMNS)]
        width: usize,
    },
    /// Analyze a local VCD file
    Vcd {
        file: PathBuf,
        #[arg(long)]
        at: Option<u64>,
        /// List the changes leading up to this instant
        #[arg(long)]
        trace_at: Option<u64>,
        #[arg(long, default_value_t = DEFAULT_TRACE_WINDOW)]
        window: u64,
        #[arg(long, default_value_t = DEFAULT_WAVE_COLUMNS)]
        width: usize,
        #[arg(long)]
        json: bool,
    },
    /// Check that the service is up
    Health,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Optimize { .. } => "optimize",
            Command::Testgen { .. } => "testgen",
            Command::Status { .. } => "status",
            Command::Capture { .. } => "capture",
            Command::Vcd { .. } => "vcd",
            Command::Health => "health",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let lookup = |key: &str| env::var(key).ok();
    let path = config_path(cli.config.clone(), lookup);
    let file = load_config(&path)?;
    let overrides = Overrides {
        server_url: cli.server.clone(),
        request_timeout_secs: cli.timeout,
        stall_timeout_secs: cli.stall_timeout,
        log_dir: cli.log_dir.clone(),
    };
    let settings = Settings::resolve(&overrides, &file, lookup);
    let _log_guard = logging::init_logging(&settings.log_dir, cli.command.name(), settings.log_stdout);
    info!(command = cli.command.name(), server = %settings.server_url, "vdb_start");

    match cli.command {
        Command::Optimize {
            design,
            testbench,
            max_iterations,
            json,
        } => {
            let max = max_iterations
                .or(settings.max_iterations)
                .unwrap_or(DEFAULT_MAX_ITERATIONS);
            let request =
                CreateRunRequest::optimize(read_source(&design).await?, read_source(&testbench).await?, max);
            follow_run(&settings, request, json).await
        }
        Command::Testgen {
            design,
            max_iterations,
            json,
        } => {
            let max = max_iterations
                .or(settings.max_iterations)
                .unwrap_or(DEFAULT_TESTGEN_ITERATIONS);
            let request = CreateRunRequest::testgen(read_source(&design).await?, max);
            follow_run(&settings, request, json).await
        }
        Command::Status { run_id, mode, json } => {
            let client = service_client(&settings)?;
            let response = client.status(&run_id).await?;
            let record = replay(mode, &response.run_id, &response.history);
            let snapshot = RunSnapshot::of(&record);
            if json {
                println!(
                    "{}",
                    serde_json::to_string(&json!({
                        "server_status": response.status,
                        "snapshot": snapshot,
                    }))?
                );
            } else {
                println!("server status: {}", response.status);
                println!("{}", render::progress_line(&snapshot));
                print!("{}", render::bar_chart(&snapshot.metrics));
                println!("{}", render::banner(&snapshot.metrics));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Capture {
            design,
            testbench,
            at,
            width,
        } => {
            let client = service_client(&settings)?;
            let request = CaptureRequest {
                design_code: read_source(&design).await?,
                testbench_code: read_source(&testbench).await?,
            };
            let response = client.capture(&request).await?;
            let mut state = CaptureState::new();
            state.populate(response);
            if let Some(error) = state.error() {
                eprintln!("capture failed: {error}");
                return Ok(ExitCode::FAILURE);
            }
            if let Some(path) = state.capture_path() {
                println!("capture: {path}");
            }
            if let Some(passed) = state.passed() {
                println!("tests {}", if passed { "passed" } else { "failed" });
            }
            print_waveform(&mut state, at, width);
            Ok(ExitCode::SUCCESS)
        }
        Command::Vcd {
            file,
            at,
            trace_at,
            window,
            width,
            json,
        } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let waveform =
                vcd::parse_vcd(&text).with_context(|| format!("parsing {}", file.display()))?;
            let summary = vcd::summary(&waveform);
            let coverage = vcd::toggle_coverage(&waveform);
            let trace = trace_at.map(|time| vcd::trace_failure(&waveform, time, window));
            if json {
                println!(
                    "{}",
                    serde_json::to_string(&json!({
                        "summary": summary,
                        "coverage": coverage,
                        "trace": trace,
                    }))?
                );
                return Ok(ExitCode::SUCCESS);
            }
            print!("{}", render::summary_table(&summary, &coverage));
            if let Some(trace) = &trace {
                println!("changes before t={}:", trace_at.unwrap_or_default());
                print!("{}", render::trace_table(trace));
            }
            let end_time = waveform.end_time;
            let mut state = CaptureState::new();
            state.load(waveform.into_signals(), end_time);
            print_waveform(&mut state, at, width);
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let health = service_client(&settings)?.health().await?;
            println!("{}", health.status);
            Ok(if health.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn service_client(settings: &Settings) -> Result<ServiceClient> {
    ServiceClient::new(&settings.server_url, settings.request_timeout)
        .with_context(|| format!("service url {}", settings.server_url))
}

async fn read_source(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

fn print_waveform(state: &mut CaptureState, at: Option<u64>, width: usize) {
    if state.is_empty() {
        println!("no signals captured");
        return;
    }
    if let Some(at) = at {
        state.set_cursor(at);
    }
    print!("{}", render::waveform(state, width));
    print!("{}", render::cursor_table(&state.values_at_cursor()));
}

async fn follow_run(settings: &Settings, request: CreateRunRequest, json: bool) -> Result<ExitCode> {
    let client = service_client(settings)?;
    let mut orchestrator = RunOrchestrator::new(client).with_stall_timeout(settings.stall_timeout);
    let mut snapshots = orchestrator.subscribe();
    let mut errors = orchestrator.subscribe_errors();
    let mut printer = SnapshotPrinter::new(json);

    orchestrator.start(request).await;
    printer.drain(&mut snapshots);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    while orchestrator.active_channel().is_some() {
        tokio::select! {
            outcome = orchestrator.pump() => {
                printer.drain(&mut snapshots);
                if outcome.map(|outcome| outcome.is_final()).unwrap_or(true) {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                warn!("run_interrupted");
                orchestrator.stop();
                interrupted = true;
            }
        }
    }
    printer.drain(&mut snapshots);
    let transport_failed = report_transport_errors(&mut errors, json);

    let record = orchestrator.record();
    if !json && !interrupted {
        let snapshot = orchestrator.snapshot();
        print!("{}", render::bar_chart(&snapshot.metrics));
        println!("{}", render::banner(&snapshot.metrics));
    }
    if let Some(run_id) = &record.run_id {
        info!(run_id = %run_id, status = %record.status, "vdb_run_done");
    }
    Ok(if interrupted {
        ExitCode::from(EXIT_INTERRUPTED)
    } else if record.status == RunStatus::Completed && !transport_failed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn report_transport_errors(errors: &mut UnboundedReceiver<TransportError>, json: bool) -> bool {
    let mut failed = false;
    while let Ok(error) = errors.try_recv() {
        failed = true;
        if json {
            println!("{}", json!({"transport_error": error.to_string()}));
        } else {
            eprintln!("transport error: {error}");
        }
    }
    failed
}

struct SnapshotPrinter {
    json: bool,
    last_line: Option<String>,
}

impl SnapshotPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            last_line: None,
        }
    }

    fn drain(&mut self, snapshots: &mut UnboundedReceiver<RunSnapshot>) {
        while let Ok(snapshot) = snapshots.try_recv() {
            if self.json {
                match serde_json::to_string(&snapshot) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!("snapshot_encode_error: {err}"),
                }
                continue;
            }
            let line = render::progress_line(&snapshot);
            if self.last_line.as_deref() != Some(line.as_str()) {
                println!("{line}");
                self.last_line = Some(line);
            }
        }
    }
}
